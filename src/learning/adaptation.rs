//! Turning learned patterns into enforcement decisions

use super::confidence::ConfidenceScorer;
use super::pattern_store::LearnedPatternStore;
use super::{AdaptationOutcome, Context, EnforcementLevel};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Outcomes kept for historical success rates
const MAX_HISTORY: usize = 500;

/// Effective enforcement for one rule check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationDecision {
    pub rule_id: String,
    pub base_level: EnforcementLevel,

    /// Level to enforce; equals `base_level` unless `adapted`
    pub level: EnforcementLevel,

    pub adapted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,

    /// Score of the best matching pattern (0 when none matched)
    pub pattern_score: f64,

    /// Confidence in the proposed level change (0 when none was proposed)
    pub confidence: f64,

    pub reason: String,
}

impl AdaptationDecision {
    fn keep(rule_id: &str, base_level: EnforcementLevel, reason: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            base_level,
            level: base_level,
            adapted: false,
            pattern_id: None,
            pattern_score: 0.0,
            confidence: 0.0,
            reason: reason.into(),
        }
    }
}

/// Proposes one-step relaxations backed by learned patterns
pub struct AdaptationEngine {
    scorer: ConfidenceScorer,
    threshold: f64,
    history: VecDeque<AdaptationOutcome>,
}

impl AdaptationEngine {
    pub fn new(scorer: ConfidenceScorer, threshold: f64) -> Self {
        Self {
            scorer,
            threshold,
            history: VecDeque::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<AdaptationOutcome>) -> Self {
        for outcome in history {
            self.record_outcome(outcome);
        }
        self
    }

    pub fn scorer(&self) -> &ConfidenceScorer {
        &self.scorer
    }

    /// Decide the level for `rule_id` in `context`
    ///
    /// The best matching pattern must score at least the threshold, and so
    /// must the confidence in relaxing by one level; otherwise the base level
    /// stands. The caller records the application on the store.
    pub fn decide(
        &self,
        store: &LearnedPatternStore,
        rule_id: &str,
        base_level: EnforcementLevel,
        context: &Context,
    ) -> AdaptationDecision {
        let matching = store.get_matching_patterns(rule_id, context);
        let Some(pattern) = matching.first() else {
            return AdaptationDecision::keep(rule_id, base_level, "No learned pattern matches");
        };

        let proposed = base_level.relaxed();
        if proposed == base_level {
            return AdaptationDecision::keep(rule_id, base_level, "Already at the weakest level");
        }

        let pattern_score = self.scorer.score_pattern(pattern, context);
        let history: Vec<AdaptationOutcome> = self.history.iter().cloned().collect();
        let confidence = self.scorer.calculate_adaptation_confidence(
            rule_id,
            base_level,
            proposed,
            context,
            &history,
        );

        debug!(
            "Rule {}: pattern {} scored {:.2}, relaxing {} -> {} at {:.2}",
            rule_id, pattern.id, pattern_score, base_level, proposed, confidence
        );

        let adapted = pattern_score >= self.threshold && confidence >= self.threshold;
        let reason = if adapted {
            format!(
                "Learned pattern {} ({} occurrences) supports {}",
                pattern.id, pattern.frequency, proposed
            )
        } else {
            format!(
                "Pattern {} below threshold {:.2} (score {:.2}, confidence {:.2})",
                pattern.id, self.threshold, pattern_score, confidence
            )
        };

        AdaptationDecision {
            rule_id: rule_id.to_string(),
            base_level,
            level: if adapted { proposed } else { base_level },
            adapted,
            pattern_id: Some(pattern.id.clone()),
            pattern_score,
            confidence,
            reason,
        }
    }

    pub fn record_outcome(&mut self, outcome: AdaptationOutcome) {
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(outcome);
    }

    /// Outcomes oldest first
    pub fn history(&self) -> impl Iterator<Item = &AdaptationOutcome> {
        self.history.iter()
    }

    /// Fraction of successful adaptations of `rule_id`, if any were recorded
    pub fn success_rate(&self, rule_id: &str) -> Option<f64> {
        let outcomes: Vec<&AdaptationOutcome> =
            self.history.iter().filter(|o| o.rule_id == rule_id).collect();
        if outcomes.is_empty() {
            return None;
        }
        let successes = outcomes.iter().filter(|o| o.successful).count();
        Some(successes as f64 / outcomes.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LearningConfig;
    use chrono::Utc;
    use serde_json::{json, Map, Value};

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn engine() -> AdaptationEngine {
        AdaptationEngine::new(ConfidenceScorer::default(), 0.6)
    }

    fn store_with_pattern() -> (LearnedPatternStore, String) {
        let mut store = LearnedPatternStore::in_memory(&LearningConfig::default());
        let id = store
            .add_pattern("no-print", "file_context", map(json!({"file_type": "py"})))
            .unwrap();
        store.update_pattern(&id).unwrap();
        (store, id)
    }

    #[test]
    fn test_no_pattern_keeps_base_level() {
        let store = LearnedPatternStore::in_memory(&LearningConfig::default());
        let decision = engine().decide(&store, "no-print", EnforcementLevel::Block, &Map::new());
        assert!(!decision.adapted);
        assert_eq!(decision.level, EnforcementLevel::Block);
        assert_eq!(decision.pattern_id, None);
    }

    #[test]
    fn test_matching_pattern_relaxes_one_level() {
        let (store, id) = store_with_pattern();
        let context = map(json!({"file_type": "py", "intent": "testing"}));

        let decision = engine().decide(&store, "no-print", EnforcementLevel::Justify, &context);
        assert!(decision.adapted, "{}", decision.reason);
        assert_eq!(decision.level, EnforcementLevel::Warn);
        assert_eq!(decision.pattern_id, Some(id));
        assert!(decision.confidence >= 0.6);
    }

    #[test]
    fn test_poor_history_blocks_adaptation() {
        let (store, _) = store_with_pattern();
        let context = map(json!({"file_type": "py"}));
        let failures = (0..5).map(|_| AdaptationOutcome {
            rule_id: "no-print".into(),
            from_level: EnforcementLevel::Justify,
            to_level: EnforcementLevel::Warn,
            successful: false,
            recorded_at: Utc::now(),
        });
        let engine = engine().with_history(failures.collect());

        let decision = engine.decide(&store, "no-print", EnforcementLevel::Justify, &context);
        assert!(!decision.adapted);
        assert_eq!(decision.level, EnforcementLevel::Justify);
        assert_eq!(engine.success_rate("no-print"), Some(0.0));
        assert_eq!(engine.success_rate("other"), None);
    }

    #[test]
    fn test_inform_cannot_relax() {
        let (store, _) = store_with_pattern();
        let decision = engine().decide(
            &store,
            "no-print",
            EnforcementLevel::Inform,
            &map(json!({"file_type": "py"})),
        );
        assert!(!decision.adapted);
        assert_eq!(decision.level, EnforcementLevel::Inform);
    }
}
