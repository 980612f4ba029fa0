//! Override learning
//!
//! - [`pattern_store`]: criteria-matched patterns with reinforcement and decay
//! - [`confidence`]: multi-factor scoring of patterns and proposed adaptations
//! - [`clustering`]: grouping of similar override records into systemic signals
//! - [`adaptation`]: turning matching patterns into enforcement decisions

pub mod adaptation;
pub mod clustering;
pub mod confidence;
pub mod criteria;
pub mod pattern_store;

pub use adaptation::{AdaptationDecision, AdaptationEngine};
pub use clustering::{ExceptionCluster, ExceptionClusterer, ExceptionRecord, RuleAdjustment};
pub use confidence::{ConfidenceFactors, ConfidenceScorer};
pub use pattern_store::{ExceptionSuggestion, LearnedPattern, LearnedPatternStore, StoreStats};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Live context a pattern is matched against (current file, workflow phase, intent, ...)
pub type Context = Map<String, Value>;

/// Enforcement strength of a rule, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnforcementLevel {
    Inform,
    Warn,
    Justify,
    Block,
}

impl EnforcementLevel {
    pub fn rank(&self) -> i32 {
        match self {
            EnforcementLevel::Inform => 0,
            EnforcementLevel::Warn => 1,
            EnforcementLevel::Justify => 2,
            EnforcementLevel::Block => 3,
        }
    }

    /// One step weaker, saturating at `Inform`
    pub fn relaxed(&self) -> Self {
        match self {
            EnforcementLevel::Block => EnforcementLevel::Justify,
            EnforcementLevel::Justify => EnforcementLevel::Warn,
            EnforcementLevel::Warn | EnforcementLevel::Inform => EnforcementLevel::Inform,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "INFORM" => Some(EnforcementLevel::Inform),
            "WARN" => Some(EnforcementLevel::Warn),
            "JUSTIFY" => Some(EnforcementLevel::Justify),
            "BLOCK" => Some(EnforcementLevel::Block),
            _ => None,
        }
    }
}

impl std::fmt::Display for EnforcementLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EnforcementLevel::Inform => "INFORM",
            EnforcementLevel::Warn => "WARN",
            EnforcementLevel::Justify => "JUSTIFY",
            EnforcementLevel::Block => "BLOCK",
        };
        f.write_str(name)
    }
}

/// Result of a past adaptation, fed back by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationOutcome {
    pub rule_id: String,
    pub from_level: EnforcementLevel,
    pub to_level: EnforcementLevel,
    pub successful: bool,
    pub recorded_at: DateTime<Utc>,
}
