//! Grouping of similar rule overrides
//!
//! Individual overrides are noise; a cluster of similar ones is a signal that
//! a rule is miscalibrated for some context. Clustering is greedy and
//! per-rule: a seed absorbs every unassigned record similar enough to it, and
//! the group only becomes a cluster once it reaches the minimum size.

use super::EnforcementLevel;
use crate::config::ClusteringConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

/// Feature weights for record similarity
pub const FEATURE_WEIGHTS: &[(&str, f64)] = &[
    ("file_path", 0.3),
    ("user_intent", 0.3),
    ("workflow_phase", 0.2),
    ("developer_experience", 0.1),
    ("time_pressure", 0.1),
];

/// A test-file cluster larger than this suggests relaxing the rule to INFORM
const TEST_FILE_RELAX_SIZE: usize = 5;

/// One observed override of a rule, with the context it happened in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub id: String,
    pub rule_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub features: Map<String, Value>,
}

impl ExceptionRecord {
    pub fn new(rule_id: impl Into<String>, features: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule_id.into(),
            timestamp: Utc::now(),
            reason: None,
            features,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A materialized group of similar overrides of one rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionCluster {
    pub id: String,
    pub rule_id: String,

    /// Representative features: mode per string field, mean per numeric field
    pub center: Map<String, Value>,

    pub members: Vec<ExceptionRecord>,

    /// Most frequent member reason, or a generic description
    pub common_reason: String,

    pub size: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExceptionCluster {
    fn new(rule_id: String, members: Vec<ExceptionRecord>) -> Self {
        let now = Utc::now();
        let mut cluster = Self {
            id: Uuid::new_v4().to_string(),
            rule_id,
            center: Map::new(),
            members,
            common_reason: String::new(),
            size: 0,
            created_at: now,
            updated_at: now,
        };
        cluster.refresh();
        cluster
    }

    fn add_member(&mut self, record: ExceptionRecord) {
        self.members.push(record);
        self.refresh();
    }

    /// Recompute size, center and common reason after a membership change
    fn refresh(&mut self) {
        self.size = self.members.len();
        self.center = compute_center(&self.members);
        self.common_reason = common_reason(&self.rule_id, &self.members);
        self.updated_at = Utc::now();
    }

    /// Whether the center describes test-file activity
    pub fn is_test_file_context(&self) -> bool {
        if self.center.get("is_test_file") == Some(&Value::Bool(true)) {
            return true;
        }
        self.center
            .get("file_path")
            .and_then(Value::as_str)
            .is_some_and(is_test_path)
    }
}

/// Suggested change to a rule backed by a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAdjustment {
    pub rule_id: String,
    pub cluster_id: String,

    /// Level to relax to, when the cluster justifies a blanket relaxation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_level: Option<EnforcementLevel>,

    /// Context the adjustment should be scoped to
    pub criteria: Map<String, Value>,

    pub reason: String,

    /// Number of overrides backing the suggestion
    pub support: usize,
}

/// Incremental and batch clustering of exception records
///
/// Records that join no cluster wait in a bounded parked pool, oldest first.
pub struct ExceptionClusterer {
    config: ClusteringConfig,
    clusters: Vec<ExceptionCluster>,
    pending: VecDeque<ExceptionRecord>,
    parked_since_recluster: usize,
    pending_dropped: u64,
}

impl ExceptionClusterer {
    pub fn new(config: ClusteringConfig) -> Self {
        Self::with_state(config, Vec::new(), Vec::new())
    }

    /// Restore previously materialized clusters and the parked pool
    pub fn with_state(
        config: ClusteringConfig,
        clusters: Vec<ExceptionCluster>,
        pending: Vec<ExceptionRecord>,
    ) -> Self {
        let mut clusterer = Self {
            config,
            clusters,
            pending: VecDeque::new(),
            parked_since_recluster: 0,
            pending_dropped: 0,
        };
        for record in pending {
            clusterer.park(record);
        }
        clusterer
    }

    fn park(&mut self, record: ExceptionRecord) {
        self.pending.push_back(record);
        while self.pending.len() > self.config.max_pending.max(1) {
            self.pending.pop_front();
            self.pending_dropped += 1;
        }
    }

    /// Greedy single-pass clustering of `records`, grouped by rule
    ///
    /// Newly formed clusters are kept and returned; records that end up in no
    /// cluster are parked for a later [`recluster`](Self::recluster).
    pub fn cluster_exceptions(&mut self, records: Vec<ExceptionRecord>) -> Vec<ExceptionCluster> {
        let mut by_rule: Vec<(String, Vec<ExceptionRecord>)> = Vec::new();
        for record in records {
            match by_rule.iter_mut().find(|(rule, _)| *rule == record.rule_id) {
                Some((_, group)) => group.push(record),
                None => by_rule.push((record.rule_id.clone(), vec![record])),
            }
        }

        let mut formed = Vec::new();
        for (rule_id, group) in by_rule {
            let (clusters, leftover) = self.greedy(rule_id, group);
            formed.extend(clusters);
            for record in leftover {
                self.park(record);
            }
        }

        self.clusters.extend(formed.iter().cloned());
        formed
    }

    fn greedy(
        &self,
        rule_id: String,
        records: Vec<ExceptionRecord>,
    ) -> (Vec<ExceptionCluster>, Vec<ExceptionRecord>) {
        let mut pool: VecDeque<ExceptionRecord> = records.into();
        let mut clusters = Vec::new();
        let mut leftover = Vec::new();

        while let Some(seed) = pool.pop_front() {
            let (absorbed, rest): (Vec<_>, Vec<_>) = pool
                .drain(..)
                .partition(|r| similarity(&seed.features, &r.features) >= self.config.similarity_threshold);

            if absorbed.len() + 1 >= self.config.min_cluster_size {
                let mut members = Vec::with_capacity(absorbed.len() + 1);
                members.push(seed);
                members.extend(absorbed);
                debug!("Formed cluster of {} overrides for rule {}", members.len(), rule_id);
                clusters.push(ExceptionCluster::new(rule_id.clone(), members));
                pool = rest.into();
            } else {
                // The seed fails to form a cluster; its neighbours stay in play
                leftover.push(seed);
                pool = absorbed.into_iter().chain(rest).collect();
            }
        }

        (clusters, leftover)
    }

    /// Join the most similar cluster of the same rule, or park the record
    ///
    /// Returns the id of the joined cluster.
    pub fn find_cluster_for_exception(&mut self, record: ExceptionRecord) -> Option<String> {
        let threshold = self.config.assignment_threshold;
        let best = self
            .clusters
            .iter_mut()
            .filter(|c| c.rule_id == record.rule_id)
            .map(|c| {
                let score = similarity(&c.center, &record.features);
                (c, score)
            })
            .filter(|(_, score)| *score >= threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((cluster, score)) => {
                debug!(
                    "Override of {} joined cluster {} (similarity {:.2})",
                    record.rule_id, cluster.id, score
                );
                cluster.add_member(record);
                Some(cluster.id.clone())
            }
            None => {
                self.park(record);
                self.parked_since_recluster += 1;
                None
            }
        }
    }

    /// Batch-cluster the parked records; returns the number of new clusters
    pub fn recluster(&mut self) -> usize {
        self.recluster_at(Utc::now())
    }

    /// [`recluster`](Self::recluster) with a caller-supplied clock
    ///
    /// Records older than `pending_max_age_days` are discarded first.
    /// Leftovers go back to the pool without counting as new arrivals.
    pub fn recluster_at(&mut self, now: DateTime<Utc>) -> usize {
        self.parked_since_recluster = 0;

        let cutoff = now - chrono::Duration::days(self.config.pending_max_age_days);
        let before = self.pending.len();
        let parked: Vec<ExceptionRecord> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .collect();
        if parked.len() < before {
            debug!("Discarded {} stale parked overrides", before - parked.len());
        }

        if parked.is_empty() {
            return 0;
        }
        self.cluster_exceptions(parked).len()
    }

    /// Whether enough records were parked since the last pass to run another
    pub fn needs_recluster(&self) -> bool {
        self.parked_since_recluster >= self.config.recluster_batch.max(1)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Parked records, oldest first
    pub fn pending(&self) -> impl Iterator<Item = &ExceptionRecord> {
        self.pending.iter()
    }

    /// Parked records dropped to keep the pool within `max_pending`
    pub fn pending_dropped(&self) -> u64 {
        self.pending_dropped
    }

    pub fn clusters(&self) -> &[ExceptionCluster] {
        &self.clusters
    }

    pub fn get_cluster(&self, cluster_id: &str) -> Option<&ExceptionCluster> {
        self.clusters.iter().find(|c| c.id == cluster_id)
    }

    /// Translate clusters into rule-adjustment suggestions, largest first
    pub fn suggest_rule_adjustments(&self) -> Vec<RuleAdjustment> {
        let mut adjustments: Vec<RuleAdjustment> = self
            .clusters
            .iter()
            .map(|cluster| {
                let criteria = scoped_criteria(&cluster.center);
                if cluster.is_test_file_context() && cluster.size > TEST_FILE_RELAX_SIZE {
                    RuleAdjustment {
                        rule_id: cluster.rule_id.clone(),
                        cluster_id: cluster.id.clone(),
                        suggested_level: Some(EnforcementLevel::Inform),
                        criteria,
                        reason: format!(
                            "Relax to INFORM for test-file context ({} overrides)",
                            cluster.size
                        ),
                        support: cluster.size,
                    }
                } else {
                    RuleAdjustment {
                        rule_id: cluster.rule_id.clone(),
                        cluster_id: cluster.id.clone(),
                        suggested_level: None,
                        criteria,
                        reason: format!(
                            "Add an exception: {} ({} overrides)",
                            cluster.common_reason, cluster.size
                        ),
                        support: cluster.size,
                    }
                }
            })
            .collect();

        adjustments.sort_by(|a, b| b.support.cmp(&a.support));
        adjustments
    }
}

/// Weighted feature similarity in [0, 1]
///
/// Only weighted features present in at least one side count; a feature
/// missing on one side scores 0. Strings compare equal/unequal, numbers by
/// `max(0, 1 − |Δ|)`.
pub fn similarity(a: &Map<String, Value>, b: &Map<String, Value>) -> f64 {
    let mut score = 0.0;
    let mut weight_total = 0.0;

    for (feature, weight) in FEATURE_WEIGHTS {
        let matched = match (a.get(*feature), b.get(*feature)) {
            (None, None) => continue,
            (Some(x), Some(y)) => feature_similarity(x, y),
            _ => 0.0,
        };
        score += weight * matched;
        weight_total += weight;
    }

    if weight_total == 0.0 {
        0.0
    } else {
        score / weight_total
    }
}

fn feature_similarity(a: &Value, b: &Value) -> f64 {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (1.0 - (x - y).abs()).max(0.0),
        _ => {
            if a == b {
                1.0
            } else {
                0.0
            }
        }
    }
}

fn compute_center(members: &[ExceptionRecord]) -> Map<String, Value> {
    let mut fields: Vec<&String> = Vec::new();
    for member in members {
        for key in member.features.keys() {
            if !fields.contains(&key) {
                fields.push(key);
            }
        }
    }

    let mut center = Map::new();
    for field in fields {
        let values: Vec<&Value> = members.iter().filter_map(|m| m.features.get(field)).collect();

        let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
        let value = if !numbers.is_empty() && numbers.len() == values.len() {
            let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
            serde_json::Number::from_f64(mean).map_or(Value::Null, Value::Number)
        } else {
            mode(&values).cloned().unwrap_or(Value::Null)
        };
        center.insert(field.clone(), value);
    }
    center
}

/// Most frequent value; ties go to the first seen
fn mode<'a>(values: &[&'a Value]) -> Option<&'a Value> {
    let mut counts: Vec<(&Value, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| v == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&Value, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((value, count));
        }
    }
    best.map(|(v, _)| v)
}

fn common_reason(rule_id: &str, members: &[ExceptionRecord]) -> String {
    let reasons: Vec<Value> = members
        .iter()
        .filter_map(|m| m.reason.as_ref())
        .filter(|r| !r.trim().is_empty())
        .map(|r| Value::String(r.clone()))
        .collect();
    let refs: Vec<&Value> = reasons.iter().collect();

    match mode(&refs).and_then(Value::as_str) {
        Some(reason) => reason.to_string(),
        None => format!("{} similar overrides of {}", members.len(), rule_id),
    }
}

/// Center fields usable as exact-match criteria
fn scoped_criteria(center: &Map<String, Value>) -> Map<String, Value> {
    center
        .iter()
        .filter(|(_, v)| v.is_string() || v.is_boolean())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Heuristic for test-file paths (`tests/`, `test_*`, `*_test.*`, `*.spec.*`)
pub fn is_test_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    let name = lower.rsplit('/').next().unwrap_or(&lower);
    lower.contains("/tests/")
        || lower.contains("/test/")
        || lower.starts_with("tests/")
        || lower.starts_with("test/")
        || name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
}
