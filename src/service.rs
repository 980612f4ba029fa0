//! Event pipeline: the single consumer of the event queue
//!
//! Every event updates the intent detector. Three event types additionally
//! drive learning:
//!
//! - `rule_override`: the developer overrode a rule. Recorded as an
//!   exception for clustering and observed by the pattern store.
//! - `rule_check`: the host asks which level to enforce. Answered with an
//!   [`AdaptationDecision`].
//! - `adaptation_feedback`: whether a past adaptation turned out well.
//!
//! The pipeline owns all learning state, so nothing in here is locked.

use crate::config::VigilConfig;
use crate::error::Result;
use crate::events::Event;
use crate::intent::IntentDetector;
use crate::learning::clustering::is_test_path;
use crate::learning::{
    AdaptationDecision, AdaptationEngine, AdaptationOutcome, ConfidenceFactors, ConfidenceScorer,
    Context, EnforcementLevel, ExceptionCluster, ExceptionClusterer, ExceptionRecord,
    LearnedPatternStore, RuleAdjustment,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const RULE_OVERRIDE: &str = "rule_override";
pub const RULE_CHECK: &str = "rule_check";
pub const ADAPTATION_FEEDBACK: &str = "adaptation_feedback";

/// Context fields that become pattern criteria when an override is learned
const CRITERIA_FIELDS: &[&str] = &[
    "file_type",
    "is_test_file",
    "workflow_phase",
    "user_intent",
    "tool",
];

/// Clusters, suggestions, parked overrides and outcome history persisted
/// next to the pattern store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationReport {
    pub generated_at: Option<DateTime<Utc>>,
    pub clusters: Vec<ExceptionCluster>,
    pub adjustments: Vec<RuleAdjustment>,
    pub pending: Vec<ExceptionRecord>,
    pub outcomes: Vec<AdaptationOutcome>,
}

impl AdaptationReport {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load, treating a missing or unreadable file as an empty report
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            warn!("Failed to load adaptation report {}: {}", path.display(), e);
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Counters for the lifetime of one pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub events_processed: u64,
    pub overrides_recorded: u64,
    pub patterns_touched: u64,
    pub rule_checks: u64,
    pub adaptations: u64,
    pub feedback_recorded: u64,
}

pub struct EventPipeline {
    detector: IntentDetector,
    store: LearnedPatternStore,
    clusterer: ExceptionClusterer,
    engine: AdaptationEngine,
    adaptations_path: Option<PathBuf>,
    report_dirty: bool,
    stats: PipelineStats,
}

impl EventPipeline {
    /// Pipeline backed by the pattern store and adaptation report in `learning.data_dir`
    pub fn open(config: &VigilConfig) -> Result<Self> {
        let factors = ConfidenceFactors::from_config(&config.learning.weights)?;
        let store = LearnedPatternStore::open(config.learning.patterns_path(), &config.learning);

        let adaptations_path = config.learning.adaptations_path();
        let report = AdaptationReport::load_or_default(&adaptations_path);
        info!(
            "Restored {} clusters, {} parked overrides and {} adaptation outcomes",
            report.clusters.len(),
            report.pending.len(),
            report.outcomes.len()
        );

        Ok(Self {
            detector: IntentDetector::new(&config.intent),
            store,
            clusterer: ExceptionClusterer::with_state(
                config.clustering.clone(),
                report.clusters,
                report.pending,
            ),
            engine: AdaptationEngine::new(
                ConfidenceScorer::new(factors),
                config.learning.adaptation_threshold,
            )
            .with_history(report.outcomes),
            adaptations_path: Some(adaptations_path),
            report_dirty: false,
            stats: PipelineStats::default(),
        })
    }

    /// Pipeline that never touches disk
    pub fn in_memory(config: &VigilConfig) -> Result<Self> {
        let factors = ConfidenceFactors::from_config(&config.learning.weights)?;
        Ok(Self {
            detector: IntentDetector::new(&config.intent),
            store: LearnedPatternStore::in_memory(&config.learning),
            clusterer: ExceptionClusterer::new(config.clustering.clone()),
            engine: AdaptationEngine::new(
                ConfidenceScorer::new(factors),
                config.learning.adaptation_threshold,
            ),
            adaptations_path: None,
            report_dirty: false,
            stats: PipelineStats::default(),
        })
    }

    /// Feed one event through detection and learning
    ///
    /// Returns a decision for `rule_check` events.
    pub fn process(&mut self, event: &Event) -> Option<AdaptationDecision> {
        self.stats.events_processed += 1;
        let intent = self.detector.update(event);
        debug!(
            "Event '{}' -> intent {} ({:.2})",
            event.event_type, intent.intent_type, intent.confidence
        );

        match event.event_type.as_str() {
            RULE_OVERRIDE => {
                self.handle_override(event);
                None
            }
            RULE_CHECK => self.handle_rule_check(event),
            ADAPTATION_FEEDBACK => {
                self.handle_feedback(event);
                None
            }
            _ => None,
        }
    }

    /// Live context for a rule event: its `context` object enriched with
    /// the file it touches and the current intent
    pub fn context_for(&self, event: &Event) -> Context {
        let mut context = event
            .data
            .get("context")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if let Some(path) = event.file_path() {
            context
                .entry("file_path")
                .or_insert_with(|| Value::String(path.to_string()));
        }

        if let Some(path) = context.get("file_path").and_then(Value::as_str).map(str::to_string) {
            if let Some(ext) = Path::new(&path).extension().and_then(|e| e.to_str()) {
                context
                    .entry("file_type")
                    .or_insert_with(|| Value::String(ext.to_lowercase()));
            }
            context
                .entry("is_test_file")
                .or_insert_with(|| Value::Bool(is_test_path(&path)));
        }

        if let Some(phase) = event.data.get("workflow_phase") {
            context
                .entry("workflow_phase")
                .or_insert_with(|| phase.clone());
        }

        let current = self.detector.current_intent();
        if current.intent_type != crate::intent::IntentType::Idle {
            let intent = Value::String(current.intent_type.as_str().to_string());
            context.entry("user_intent").or_insert_with(|| intent.clone());
            context.entry("intent").or_insert(intent);
        }

        context
    }

    fn handle_override(&mut self, event: &Event) {
        let Some(rule_id) = str_field(event, "rule_id") else {
            warn!("rule_override event without rule_id ignored");
            return;
        };
        self.stats.overrides_recorded += 1;
        self.report_dirty = true;

        let context = self.context_for(event);
        let mut record = ExceptionRecord::new(rule_id.clone(), context.clone());
        record.timestamp = event.timestamp;
        if let Some(reason) = str_field(event, "reason") {
            record = record.with_reason(reason);
        }

        if self.clusterer.find_cluster_for_exception(record).is_none()
            && self.clusterer.needs_recluster()
        {
            let formed = self.clusterer.recluster();
            if formed > 0 {
                info!("Re-clustering formed {} new override clusters", formed);
            }
        }

        let criteria: serde_json::Map<String, Value> = context
            .iter()
            .filter(|(k, _)| CRITERIA_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if criteria.is_empty() {
            debug!("Override of {} carries no learnable context", rule_id);
            return;
        }

        let pattern_type = str_field(event, "pattern_type").unwrap_or_else(|| "context".to_string());
        match self.store.observe_override(&rule_id, &pattern_type, criteria) {
            Ok(Some(pattern_id)) => {
                self.stats.patterns_touched += 1;
                debug!("Override of {} reinforced pattern {}", rule_id, pattern_id);
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to learn from override of {}: {}", rule_id, e),
        }
    }

    fn handle_rule_check(&mut self, event: &Event) -> Option<AdaptationDecision> {
        let Some(rule_id) = str_field(event, "rule_id") else {
            warn!("rule_check event without rule_id ignored");
            return None;
        };
        let base_level = str_field(event, "level")
            .and_then(|l| EnforcementLevel::parse(&l))
            .unwrap_or(EnforcementLevel::Warn);

        self.stats.rule_checks += 1;
        let context = self.context_for(event);
        let decision = self.engine.decide(&self.store, &rule_id, base_level, &context);

        if decision.adapted {
            self.stats.adaptations += 1;
            if let Some(pattern_id) = &decision.pattern_id {
                if let Err(e) = self.store.apply_pattern(pattern_id) {
                    warn!("Failed to record application of {}: {}", pattern_id, e);
                }
            }
        }

        info!(
            "Rule {}: enforce {} (base {}, confidence {:.2}) - {}",
            decision.rule_id, decision.level, decision.base_level, decision.confidence, decision.reason
        );
        Some(decision)
    }

    fn handle_feedback(&mut self, event: &Event) {
        let Some(rule_id) = str_field(event, "rule_id") else {
            warn!("adaptation_feedback event without rule_id ignored");
            return;
        };
        let Some(successful) = event.data.get("successful").and_then(Value::as_bool) else {
            warn!("adaptation_feedback for {} without 'successful' ignored", rule_id);
            return;
        };

        let level = |field: &str| {
            str_field(event, field)
                .and_then(|l| EnforcementLevel::parse(&l))
                .unwrap_or(EnforcementLevel::Warn)
        };

        self.engine.record_outcome(AdaptationOutcome {
            rule_id: rule_id.clone(),
            from_level: level("from_level"),
            to_level: level("to_level"),
            successful,
            recorded_at: event.timestamp,
        });
        self.stats.feedback_recorded += 1;
        self.report_dirty = true;

        if let Some(pattern_id) = str_field(event, "pattern_id") {
            if let Err(e) = self.store.record_outcome(&pattern_id, successful) {
                warn!("Feedback for unknown pattern {}: {}", pattern_id, e);
            }
        }
    }

    pub fn report(&self) -> AdaptationReport {
        AdaptationReport {
            generated_at: Some(Utc::now()),
            clusters: self.clusterer.clusters().to_vec(),
            adjustments: self.clusterer.suggest_rule_adjustments(),
            pending: self.clusterer.pending().cloned().collect(),
            outcomes: self.engine.history().cloned().collect(),
        }
    }

    /// Decay the store, then write whatever changed since the last persist
    pub fn persist(&mut self) -> Result<()> {
        let evicted = self.store.apply_decay(Utc::now());
        if evicted > 0 {
            info!("Evicted {} decayed patterns", evicted);
        }

        if self.store.is_dirty() {
            self.store.save()?;
        }
        if self.report_dirty {
            if let Some(path) = &self.adaptations_path {
                self.report().save(path)?;
            }
            self.report_dirty = false;
        }
        Ok(())
    }

    pub fn detector(&self) -> &IntentDetector {
        &self.detector
    }

    pub fn store(&self) -> &LearnedPatternStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LearnedPatternStore {
        &mut self.store
    }

    pub fn clusterer(&self) -> &ExceptionClusterer {
        &self.clusterer
    }

    pub fn engine(&self) -> &AdaptationEngine {
        &self.engine
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

fn str_field(event: &Event, field: &str) -> Option<String> {
    event
        .data
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Consume `queue` until `cancel` fires and the queue drains
///
/// Cancellation closes the queue; events already buffered are still
/// processed. State is persisted every `persist_interval` and once more on
/// exit. Returns the pipeline so callers can inspect its final state.
pub async fn run(
    mut pipeline: EventPipeline,
    queue: Arc<crate::queue::EventQueue>,
    poll_interval: Duration,
    persist_interval: Duration,
    cancel: CancellationToken,
) -> EventPipeline {
    info!("Event pipeline started");

    let mut persist_tick = tokio::time::interval(persist_interval.max(Duration::from_millis(10)));
    persist_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    persist_tick.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled(), if !queue.is_closed() => {
                debug!("Pipeline cancelled, draining {} buffered events", queue.len());
                queue.close();
            }
            _ = persist_tick.tick() => {
                if let Err(e) = pipeline.persist() {
                    warn!("Failed to persist learning state: {}", e);
                }
            }
            next = queue.get(poll_interval) => match next {
                Some(event) => {
                    pipeline.process(&event);
                }
                None if queue.is_closed() && queue.is_empty() => break,
                None => {}
            }
        }
    }

    if let Err(e) = pipeline.persist() {
        warn!("Failed to persist learning state on shutdown: {}", e);
    }

    let stats = pipeline.stats();
    info!(
        "Event pipeline stopped after {} events ({} overrides, {} rule checks)",
        stats.events_processed, stats.overrides_recorded, stats.rule_checks
    );
    pipeline
}
