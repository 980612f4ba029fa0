//! Learned override patterns with reinforcement, decay and JSON persistence
//!
//! # Pattern Lifecycle
//!
//! ```text
//! override seen once  -> pending (not a pattern yet)
//! override repeated   -> pattern created at the initial confidence (0.6)
//! further repeats     -> confidence += 0.1 × (1 − confidence), capped at 0.95
//! 7+ days unapplied   -> exponential decay; evicted below the floor
//! ```
//!
//! The persisted document is
//! `{"patterns": [...], "last_updated": <epoch>, "stats": {...}}`.

use super::criteria;
use super::Context;
use crate::config::LearningConfig;
use crate::error::{Result, VigilError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reinforcement never pushes confidence past this
pub const MAX_CONFIDENCE: f64 = 0.95;

const REINFORCEMENT_RATE: f64 = 0.1;

/// Application timestamps kept for timing-regularity scoring
const MAX_APPLICATION_TIMES: usize = 20;

/// Occurrences of the same override before a pattern is created
const OVERRIDES_TO_LEARN: u32 = 2;

/// A learned condition under which a rule override recurs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub id: String,
    pub rule_id: String,
    pub pattern_type: String,
    pub criteria: Map<String, Value>,
    pub confidence: f64,
    pub frequency: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub last_applied: Option<DateTime<Utc>>,
    #[serde(default)]
    pub application_count: u32,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub failure_count: u32,
    /// Consecutive failures since the last success
    #[serde(default)]
    pub recent_failures: u32,
    #[serde(default)]
    pub manually_confirmed: bool,
    #[serde(default)]
    pub application_times: Vec<DateTime<Utc>>,
    /// Inactivity before this instant has already been charged as decay
    #[serde(default)]
    pub decayed_at: Option<DateTime<Utc>>,
}

impl LearnedPattern {
    pub fn new(
        rule_id: impl Into<String>,
        pattern_type: impl Into<String>,
        criteria: Map<String, Value>,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule_id.into(),
            pattern_type: pattern_type.into(),
            criteria,
            confidence: confidence.clamp(0.0, MAX_CONFIDENCE),
            frequency: 1,
            first_seen: now,
            last_seen: now,
            last_applied: None,
            application_count: 0,
            success_count: 0,
            failure_count: 0,
            recent_failures: 0,
            manually_confirmed: false,
            application_times: Vec::new(),
            decayed_at: None,
        }
    }

    pub fn matches(&self, context: &Context) -> bool {
        criteria::matches(&self.criteria, context)
    }

    /// Another occurrence of the same override: diminishing-returns growth
    pub fn reinforce(&mut self, now: DateTime<Utc>) {
        self.frequency = self.frequency.saturating_add(1);
        self.confidence =
            (self.confidence + REINFORCEMENT_RATE * (1.0 - self.confidence)).min(MAX_CONFIDENCE);
        self.last_seen = now;
    }

    /// The pattern was used to adapt an enforcement decision
    pub fn apply(&mut self, now: DateTime<Utc>) {
        self.application_count = self.application_count.saturating_add(1);
        self.last_applied = Some(now);
        self.application_times.push(now);
        if self.application_times.len() > MAX_APPLICATION_TIMES {
            let excess = self.application_times.len() - MAX_APPLICATION_TIMES;
            self.application_times.drain(..excess);
        }
    }

    pub fn record_outcome(&mut self, successful: bool) {
        if successful {
            self.success_count = self.success_count.saturating_add(1);
            self.recent_failures = 0;
        } else {
            self.failure_count = self.failure_count.saturating_add(1);
            self.recent_failures = self.recent_failures.saturating_add(1);
        }
    }

    /// Most recent reinforcement or application
    pub fn last_activity(&self) -> DateTime<Utc> {
        match self.last_applied {
            Some(applied) if applied > self.last_seen => applied,
            _ => self.last_seen,
        }
    }

    /// Last application, or creation for a pattern never applied
    ///
    /// Reinforcement does not reset it.
    pub fn decay_clock_start(&self) -> DateTime<Utc> {
        self.last_applied.unwrap_or(self.first_seen)
    }

    /// Charge time without an application past the grace period as
    /// exponential decay
    ///
    /// Returns whether confidence changed. Repeated calls never double-charge
    /// the same interval.
    pub fn apply_decay(&mut self, now: DateTime<Utc>, grace_days: f64, rate_per_day: f64) -> bool {
        let grace = chrono::Duration::seconds((grace_days * 86400.0) as i64);
        let grace_end = self.decay_clock_start() + grace;
        if now <= grace_end {
            return false;
        }

        let start = match self.decayed_at {
            Some(decayed) if decayed > grace_end => decayed,
            _ => grace_end,
        };
        if now <= start {
            return false;
        }

        let days = (now - start).num_seconds() as f64 / 86400.0;
        self.confidence *= (-rate_per_day * days).exp();
        self.decayed_at = Some(now);
        true
    }

    fn rank(&self, other: &Self) -> Ordering {
        self.confidence
            .partial_cmp(&other.confidence)
            .unwrap_or(Ordering::Equal)
            .then(self.frequency.cmp(&other.frequency))
    }
}

/// Candidate for promotion to a static rule exception
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionSuggestion {
    pub pattern_id: String,
    pub rule_id: String,
    pub criteria: Map<String, Value>,
    pub confidence: f64,
    pub application_count: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreStats {
    pub total_patterns: usize,
    pub patterns_created: u64,
    pub patterns_reinforced: u64,
    pub patterns_evicted: u64,
    pub patterns_decayed: u64,
    pub applications: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    patterns: Vec<LearnedPattern>,
    last_updated: i64,
    #[serde(default)]
    stats: StoreStats,
}

#[derive(Debug, Clone)]
struct StoreSettings {
    initial_confidence: f64,
    min_confidence: f64,
    max_patterns_per_rule: usize,
    decay_grace_days: f64,
    decay_rate_per_day: f64,
}

/// Keyed pattern collection indexed by rule
pub struct LearnedPatternStore {
    path: Option<PathBuf>,
    settings: StoreSettings,
    patterns: HashMap<String, LearnedPattern>,
    rule_index: HashMap<String, HashSet<String>>,
    pending_overrides: HashMap<String, u32>,
    stats: StoreStats,
    dirty: bool,
}

impl LearnedPatternStore {
    /// Empty store that is never written to disk
    pub fn in_memory(config: &LearningConfig) -> Self {
        Self {
            path: None,
            settings: StoreSettings {
                initial_confidence: config.initial_confidence,
                min_confidence: config.min_confidence,
                max_patterns_per_rule: config.max_patterns_per_rule.max(1),
                decay_grace_days: config.decay_grace_days,
                decay_rate_per_day: config.decay_rate_per_day,
            },
            patterns: HashMap::new(),
            rule_index: HashMap::new(),
            pending_overrides: HashMap::new(),
            stats: StoreStats::default(),
            dirty: false,
        }
    }

    /// Open the store at `path`, decaying and pruning what was loaded
    ///
    /// A missing file yields an empty store. A corrupt or unreadable file is
    /// logged and also yields an empty store.
    pub fn open(path: impl Into<PathBuf>, config: &LearningConfig) -> Self {
        let path = path.into();
        let mut store = Self::in_memory(config);
        store.path = Some(path.clone());

        if path.exists() {
            match store.load_from(&path) {
                Ok(count) => info!("Loaded {} learned patterns from {}", count, path.display()),
                Err(e) => {
                    warn!(
                        "Failed to load pattern store {}: {}. Starting empty",
                        path.display(),
                        e
                    );
                    store.patterns.clear();
                    store.rule_index.clear();
                    store.stats = StoreStats::default();
                }
            }
        }

        store.apply_decay(Utc::now());
        store
    }

    fn load_from(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedStore = serde_json::from_str(&content)?;

        self.stats = persisted.stats;
        for pattern in persisted.patterns {
            self.index(pattern);
        }
        self.stats.total_patterns = self.patterns.len();
        Ok(self.patterns.len())
    }

    /// Write patterns at or above the confidence floor; no-op for in-memory stores
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut patterns: Vec<LearnedPattern> = self
            .patterns
            .values()
            .filter(|p| p.confidence >= self.settings.min_confidence)
            .cloned()
            .collect();
        patterns.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.id.cmp(&b.id)));

        let document = PersistedStore {
            patterns,
            last_updated: Utc::now().timestamp(),
            stats: self.stats.clone(),
        };

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(&document)?)?;
        std::fs::rename(&tmp_path, &path)?;

        self.dirty = false;
        debug!("Saved {} patterns to {}", document.patterns.len(), path.display());
        Ok(())
    }

    /// Whether there are unsaved changes
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn index(&mut self, pattern: LearnedPattern) {
        self.rule_index
            .entry(pattern.rule_id.clone())
            .or_default()
            .insert(pattern.id.clone());
        self.patterns.insert(pattern.id.clone(), pattern);
    }

    /// Create a pattern at the initial confidence, evicting to respect the per-rule cap
    pub fn add_pattern(
        &mut self,
        rule_id: &str,
        pattern_type: &str,
        criteria_map: Map<String, Value>,
    ) -> Result<String> {
        self.add_pattern_at(rule_id, pattern_type, criteria_map, Utc::now())
    }

    pub fn add_pattern_at(
        &mut self,
        rule_id: &str,
        pattern_type: &str,
        criteria_map: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        criteria::validate(&criteria_map)?;

        self.make_room(rule_id);

        let pattern = LearnedPattern::new(
            rule_id,
            pattern_type,
            criteria_map,
            self.settings.initial_confidence,
            now,
        );
        let id = pattern.id.clone();
        debug!("Learned new pattern {} for rule {}", id, rule_id);

        self.index(pattern);
        self.stats.patterns_created += 1;
        self.stats.total_patterns = self.patterns.len();
        self.dirty = true;
        Ok(id)
    }

    fn make_room(&mut self, rule_id: &str) {
        let Some(ids) = self.rule_index.get(rule_id) else {
            return;
        };
        if ids.len() < self.settings.max_patterns_per_rule {
            return;
        }

        let mut ranked: Vec<&LearnedPattern> =
            ids.iter().filter_map(|id| self.patterns.get(id)).collect();
        ranked.sort_by(|a, b| a.rank(b));

        let excess = ids.len() + 1 - self.settings.max_patterns_per_rule;
        let victims: Vec<String> = ranked.iter().take(excess).map(|p| p.id.clone()).collect();

        for id in victims {
            debug!("Evicting pattern {} from rule {} (cap reached)", id, rule_id);
            self.remove_pattern(&id);
            self.stats.patterns_evicted += 1;
        }
    }

    /// Reinforce a pattern; returns its new confidence
    pub fn update_pattern(&mut self, pattern_id: &str) -> Result<f64> {
        self.update_pattern_at(pattern_id, Utc::now())
    }

    pub fn update_pattern_at(&mut self, pattern_id: &str, now: DateTime<Utc>) -> Result<f64> {
        let pattern = self
            .patterns
            .get_mut(pattern_id)
            .ok_or_else(|| VigilError::PatternNotFound(pattern_id.to_string()))?;

        pattern.reinforce(now);
        self.stats.patterns_reinforced += 1;
        self.dirty = true;
        Ok(pattern.confidence)
    }

    /// Record an override; creates the pattern on the first repeat and reinforces after
    ///
    /// Returns the id of the created or reinforced pattern, or `None` while
    /// the override has been seen only once.
    pub fn observe_override(
        &mut self,
        rule_id: &str,
        pattern_type: &str,
        criteria_map: Map<String, Value>,
    ) -> Result<Option<String>> {
        let existing = self.rule_index.get(rule_id).and_then(|ids| {
            ids.iter()
                .find(|id| {
                    self.patterns
                        .get(*id)
                        .is_some_and(|p| same_criteria(&p.criteria, &criteria_map))
                })
                .cloned()
        });

        if let Some(id) = existing {
            self.update_pattern(&id)?;
            return Ok(Some(id));
        }

        let key = pending_key(rule_id, &criteria_map);
        let seen = self.pending_overrides.entry(key.clone()).or_insert(0);
        *seen += 1;

        if *seen < OVERRIDES_TO_LEARN {
            return Ok(None);
        }

        self.pending_overrides.remove(&key);
        let id = self.add_pattern(rule_id, pattern_type, criteria_map)?;
        Ok(Some(id))
    }

    pub fn get_pattern(&self, pattern_id: &str) -> Option<&LearnedPattern> {
        self.patterns.get(pattern_id)
    }

    /// Patterns of `rule_id` whose criteria match, best first by (confidence, frequency)
    pub fn get_matching_patterns(&self, rule_id: &str, context: &Context) -> Vec<&LearnedPattern> {
        let Some(ids) = self.rule_index.get(rule_id) else {
            return Vec::new();
        };

        let mut matching: Vec<&LearnedPattern> = ids
            .iter()
            .filter_map(|id| self.patterns.get(id))
            .filter(|p| p.matches(context))
            .collect();

        matching.sort_by(|a, b| b.rank(a));
        matching
    }

    pub fn apply_pattern(&mut self, pattern_id: &str) -> Result<()> {
        let pattern = self
            .patterns
            .get_mut(pattern_id)
            .ok_or_else(|| VigilError::PatternNotFound(pattern_id.to_string()))?;

        pattern.apply(Utc::now());
        self.stats.applications += 1;
        self.dirty = true;
        Ok(())
    }

    pub fn record_outcome(&mut self, pattern_id: &str, successful: bool) -> Result<()> {
        let pattern = self
            .patterns
            .get_mut(pattern_id)
            .ok_or_else(|| VigilError::PatternNotFound(pattern_id.to_string()))?;

        pattern.record_outcome(successful);
        self.dirty = true;
        Ok(())
    }

    pub fn set_manually_confirmed(&mut self, pattern_id: &str, confirmed: bool) -> Result<()> {
        let pattern = self
            .patterns
            .get_mut(pattern_id)
            .ok_or_else(|| VigilError::PatternNotFound(pattern_id.to_string()))?;

        pattern.manually_confirmed = confirmed;
        self.dirty = true;
        Ok(())
    }

    pub fn remove_pattern(&mut self, pattern_id: &str) -> Option<LearnedPattern> {
        let pattern = self.patterns.remove(pattern_id)?;

        if let Some(ids) = self.rule_index.get_mut(&pattern.rule_id) {
            ids.remove(pattern_id);
            if ids.is_empty() {
                self.rule_index.remove(&pattern.rule_id);
            }
        }

        self.stats.total_patterns = self.patterns.len();
        self.dirty = true;
        Some(pattern)
    }

    /// Decay every pattern and evict those below the floor; returns the eviction count
    pub fn apply_decay(&mut self, now: DateTime<Utc>) -> usize {
        let mut below_floor = Vec::new();

        for pattern in self.patterns.values_mut() {
            if pattern.apply_decay(
                now,
                self.settings.decay_grace_days,
                self.settings.decay_rate_per_day,
            ) {
                self.stats.patterns_decayed += 1;
                self.dirty = true;
            }
            if pattern.confidence < self.settings.min_confidence {
                below_floor.push(pattern.id.clone());
            }
        }

        for id in &below_floor {
            debug!("Evicting decayed pattern {}", id);
            self.remove_pattern(id);
            self.stats.patterns_evicted += 1;
        }

        below_floor.len()
    }

    /// Patterns trusted and exercised enough to become static rule exceptions
    pub fn suggest_permanent_exceptions(
        &self,
        confidence_threshold: f64,
        application_threshold: u32,
    ) -> Vec<ExceptionSuggestion> {
        let mut suggestions: Vec<ExceptionSuggestion> = self
            .patterns
            .values()
            .filter(|p| {
                p.confidence >= confidence_threshold && p.application_count >= application_threshold
            })
            .map(|p| ExceptionSuggestion {
                pattern_id: p.id.clone(),
                rule_id: p.rule_id.clone(),
                criteria: p.criteria.clone(),
                confidence: p.confidence,
                application_count: p.application_count,
                reason: format!(
                    "Applied {} times at {:.0}% confidence; consider a permanent exception",
                    p.application_count,
                    p.confidence * 100.0
                ),
            })
            .collect();

        suggestions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then(b.application_count.cmp(&a.application_count))
        });
        suggestions
    }

    pub fn patterns(&self) -> impl Iterator<Item = &LearnedPattern> {
        self.patterns.values()
    }

    pub fn rule_pattern_count(&self, rule_id: &str) -> usize {
        self.rule_index.get(rule_id).map_or(0, HashSet::len)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }
}

fn canonical(criteria_map: &Map<String, Value>) -> BTreeMap<&str, &Value> {
    criteria_map.iter().map(|(k, v)| (k.as_str(), v)).collect()
}

fn same_criteria(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    canonical(a) == canonical(b)
}

fn pending_key(rule_id: &str, criteria_map: &Map<String, Value>) -> String {
    let body = serde_json::to_string(&canonical(criteria_map)).unwrap_or_default();
    format!("{}\u{1f}{}", rule_id, body)
}
