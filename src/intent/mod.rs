//! Developer intent classification
//!
//! Scores the recent event window against behavioral pattern definitions
//! (exploring, implementing, debugging, refactoring, testing, documenting)
//! and keeps a hysteresis-filtered "current" intent.

pub mod detector;
pub mod patterns;

pub use detector::{IntentDetector, IntentSummary};
pub use patterns::{default_patterns, Indicator, PatternDefinition, PatternScore, TimeSpan};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// High-level activity category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Exploring,
    Implementing,
    Debugging,
    Refactoring,
    Testing,
    Documenting,
    Idle,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Exploring => "exploring",
            IntentType::Implementing => "implementing",
            IntentType::Debugging => "debugging",
            IntentType::Refactoring => "refactoring",
            IntentType::Testing => "testing",
            IntentType::Documenting => "documenting",
            IntentType::Idle => "idle",
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent_type: IntentType,

    /// Confidence in [0.0, 1.0]
    pub confidence: f64,

    /// Named sub-scores that produced the confidence
    pub evidence: BTreeMap<String, f64>,

    pub detected_at: DateTime<Utc>,
}

impl Intent {
    pub fn idle(confidence: f64, detected_at: DateTime<Utc>) -> Self {
        Self {
            intent_type: IntentType::Idle,
            confidence,
            evidence: BTreeMap::new(),
            detected_at,
        }
    }
}
