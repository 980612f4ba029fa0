//! Multi-factor confidence scoring
//!
//! # Pattern Score
//!
//! ```text
//! score = w_f × frequency + w_r × recency + w_c × consistency + w_m × context_match
//! ```
//!
//! followed by multiplicative modifiers and a clamp to [0, 1]. See
//! [`ConfidenceScorer::score_pattern`].

use super::criteria;
use super::pattern_store::LearnedPattern;
use super::{AdaptationOutcome, Context, EnforcementLevel};
use crate::config::WeightsConfig;
use crate::error::{Result, VigilError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Frequency at which the log curve reaches 1.0
const FREQUENCY_SATURATION: f64 = 50.0;

const ADAPTATION_MIN: f64 = 0.1;
const ADAPTATION_MAX: f64 = 0.95;

/// Validated weights for the four sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    frequency: f64,
    recency: f64,
    consistency: f64,
    context_match: f64,
}

impl ConfidenceFactors {
    /// Fails unless the weights are non-negative and sum to 1.0 ± 0.01
    pub fn new(frequency: f64, recency: f64, consistency: f64, context_match: f64) -> Result<Self> {
        let weights = [frequency, recency, consistency, context_match];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(VigilError::InvalidWeights(format!(
                "weights must be finite and non-negative, got {:?}",
                weights
            )));
        }

        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(VigilError::InvalidWeights(format!(
                "weights must sum to 1.0, got {:.3}",
                sum
            )));
        }

        Ok(Self {
            frequency,
            recency,
            consistency,
            context_match,
        })
    }

    pub fn from_config(weights: &WeightsConfig) -> Result<Self> {
        Self::new(
            weights.frequency,
            weights.recency,
            weights.consistency,
            weights.context_match,
        )
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn recency(&self) -> f64 {
        self.recency
    }

    pub fn consistency(&self) -> f64 {
        self.consistency
    }

    pub fn context_match(&self) -> f64 {
        self.context_match
    }
}

impl Default for ConfidenceFactors {
    fn default() -> Self {
        Self {
            frequency: 0.3,
            recency: 0.2,
            consistency: 0.3,
            context_match: 0.2,
        }
    }
}

/// Scores learned patterns and proposed enforcement changes
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    factors: ConfidenceFactors,
}

impl ConfidenceScorer {
    pub fn new(factors: ConfidenceFactors) -> Self {
        Self { factors }
    }

    pub fn factors(&self) -> &ConfidenceFactors {
        &self.factors
    }

    /// How far to trust `pattern` in `context`, in [0, 1]
    pub fn score_pattern(&self, pattern: &LearnedPattern, context: &Context) -> f64 {
        self.score_pattern_at(pattern, context, Utc::now())
    }

    pub fn score_pattern_at(
        &self,
        pattern: &LearnedPattern,
        context: &Context,
        now: DateTime<Utc>,
    ) -> f64 {
        let base = self.factors.frequency * frequency_score(pattern.frequency)
            + self.factors.recency * recency_score(pattern.last_activity(), now)
            + self.factors.consistency * consistency_score(pattern)
            + self.factors.context_match * context_match_score(pattern, context);

        let mut score = base;
        if pattern.frequency > 20 {
            score *= 1.1;
        }
        if pattern.manually_confirmed {
            score *= 1.2;
        }
        if pattern.recent_failures > 0 {
            score *= 0.9_f64.powi(pattern.recent_failures.min(i32::MAX as u32) as i32);
        }
        if flag(context, "critical_operation") {
            score *= 0.8;
        }
        if high_experience(context) {
            score *= 1.05;
        }

        score.clamp(0.0, 1.0)
    }

    /// Confidence that moving `rule_id` from `base` to `adapted` is safe
    ///
    /// ```text
    /// 0.4 × (1 − 0.2 × |Δlevel|) + 0.3 × clarity + 0.3 × historical success
    /// ```
    ///
    /// clamped to [0.1, 0.95]. Only outcomes for `rule_id` count towards the
    /// historical rate; with none it is 0.5.
    pub fn calculate_adaptation_confidence(
        &self,
        rule_id: &str,
        base: EnforcementLevel,
        adapted: EnforcementLevel,
        context: &Context,
        history: &[AdaptationOutcome],
    ) -> f64 {
        let delta = (adapted.rank() - base.rank()).abs() as f64;
        let jump = (1.0 - 0.2 * delta).max(0.0);

        let (successes, total) = history
            .iter()
            .filter(|o| o.rule_id == rule_id)
            .fold((0usize, 0usize), |(s, t), o| {
                (s + usize::from(o.successful), t + 1)
            });
        let historical = if total == 0 {
            0.5
        } else {
            successes as f64 / total as f64
        };

        let confidence = 0.4 * jump + 0.3 * context_clarity(context) + 0.3 * historical;
        confidence.clamp(ADAPTATION_MIN, ADAPTATION_MAX)
    }
}

/// `ln(1 + f) / ln(1 + 50)`, saturating at 1.0
pub fn frequency_score(frequency: u32) -> f64 {
    ((1.0 + frequency as f64).ln() / (1.0 + FREQUENCY_SATURATION).ln()).min(1.0)
}

/// Step function over time since `last_activity`, exponential past a month
pub fn recency_score(last_activity: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let hours = (now - last_activity).num_seconds().max(0) as f64 / 3600.0;
    let days = hours / 24.0;

    if hours < 1.0 {
        1.0
    } else if hours < 24.0 {
        0.9
    } else if days < 7.0 {
        0.7
    } else if days < 30.0 {
        0.5
    } else {
        0.5 * (-(days - 30.0) / 30.0).exp()
    }
}

/// 70% success rate, 30% regularity of the gaps between applications
pub fn consistency_score(pattern: &LearnedPattern) -> f64 {
    let outcomes = pattern.success_count + pattern.failure_count;
    let success_rate = if outcomes == 0 {
        0.5
    } else {
        pattern.success_count as f64 / outcomes as f64
    };

    0.7 * success_rate + 0.3 * timing_regularity(&pattern.application_times)
}

/// `1 / (1 + cv)` over inter-application gaps; 0.5 with fewer than two gaps
fn timing_regularity(times: &[DateTime<Utc>]) -> f64 {
    if times.len() < 3 {
        return 0.5;
    }

    let gaps: Vec<f64> = times
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_milliseconds().max(0) as f64)
        .collect();

    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    if mean <= 0.0 {
        return 0.5;
    }

    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
    let cv = variance.sqrt() / mean;
    1.0 / (1.0 + cv)
}

/// Mean per-field similarity of the criteria against the context
pub fn context_match_score(pattern: &LearnedPattern, context: &Context) -> f64 {
    if pattern.criteria.is_empty() {
        return 1.0;
    }

    let total: f64 = pattern
        .criteria
        .iter()
        .map(|(field, expected)| {
            context
                .get(field)
                .map_or(0.0, |actual| criteria::field_similarity(expected, actual))
        })
        .sum();

    total / pattern.criteria.len() as f64
}

fn context_clarity(context: &Context) -> f64 {
    let mut clarity = 0.5;
    let intent = known(context, "intent").or_else(|| known(context, "user_intent"));
    if intent.is_some() {
        clarity += 0.2;
    }
    if known(context, "workflow_phase").is_some() {
        clarity += 0.15;
    }
    if known(context, "file_path").is_some() {
        clarity += 0.15;
    }
    f64::min(clarity, 1.0)
}

fn known<'a>(context: &'a Context, field: &str) -> Option<&'a str> {
    context
        .get(field)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty() && !matches!(*v, "unknown" | "idle"))
}

fn flag(context: &Context, field: &str) -> bool {
    match context.get(field) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.as_str(), "true" | "yes"),
        _ => false,
    }
}

fn high_experience(context: &Context) -> bool {
    match context.get("developer_experience") {
        Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "high" | "senior" | "expert"),
        Some(value) => value.as_f64().is_some_and(|v| v >= 0.8),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn pattern(frequency: u32) -> LearnedPattern {
        let mut p = LearnedPattern::new(
            "no-print",
            "file_context",
            map(json!({"file_type": "py", "workflow_phase": "implement"})),
            0.6,
            Utc::now(),
        );
        p.frequency = frequency;
        p
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(ConfidenceFactors::new(0.3, 0.2, 0.3, 0.2).is_ok());
        assert!(ConfidenceFactors::new(0.3, 0.2, 0.3, 0.205).is_ok());
        assert!(matches!(
            ConfidenceFactors::new(0.5, 0.5, 0.5, 0.5),
            Err(VigilError::InvalidWeights(_))
        ));
        assert!(ConfidenceFactors::new(1.2, -0.2, 0.0, 0.0).is_err());

        // Off by 0.03: outside the tolerance
        assert!(matches!(
            ConfidenceFactors::new(0.33, 0.2, 0.3, 0.2),
            Err(VigilError::InvalidWeights(_))
        ));
        assert!(ConfidenceFactors::new(0.27, 0.2, 0.3, 0.2).is_err());
    }

    #[test]
    fn test_frequency_curve_saturates() {
        assert_eq!(frequency_score(0), 0.0);
        assert!(frequency_score(5) < frequency_score(10));
        assert!((frequency_score(50) - 1.0).abs() < 1e-9);
        assert_eq!(frequency_score(500), 1.0);
    }

    #[test]
    fn test_recency_steps() {
        let now = Utc::now();
        assert_eq!(recency_score(now - chrono::Duration::minutes(10), now), 1.0);
        assert_eq!(recency_score(now - chrono::Duration::hours(5), now), 0.9);
        assert_eq!(recency_score(now - chrono::Duration::days(3), now), 0.7);
        assert_eq!(recency_score(now - chrono::Duration::days(20), now), 0.5);
        assert!(recency_score(now - chrono::Duration::days(60), now) < 0.5);
    }

    #[test]
    fn test_regular_applications_score_higher() {
        let start = Utc::now() - chrono::Duration::days(1);
        let mut regular = pattern(5);
        let mut erratic = pattern(5);
        for i in 0..5 {
            regular.application_times.push(start + chrono::Duration::minutes(10 * i));
        }
        for minutes in [0, 1, 2, 90, 91] {
            erratic.application_times.push(start + chrono::Duration::minutes(minutes));
        }

        assert!((timing_regularity(&regular.application_times) - 1.0).abs() < 1e-9);
        assert!(consistency_score(&regular) > consistency_score(&erratic));
    }

    #[test]
    fn test_context_match_kinds() {
        let p = pattern(3);
        assert_eq!(
            context_match_score(&p, &map(json!({"file_type": "py", "workflow_phase": "implement"}))),
            1.0
        );
        assert_eq!(context_match_score(&p, &map(json!({"file_type": "py"}))), 0.5);
        assert_eq!(context_match_score(&p, &Map::new()), 0.0);
    }

    #[test]
    fn test_modifiers() {
        let scorer = ConfidenceScorer::default();
        let now = Utc::now();
        let context = map(json!({"file_type": "py", "workflow_phase": "implement"}));

        let plain = pattern(10);
        let base = scorer.score_pattern_at(&plain, &context, now);

        let mut confirmed = plain.clone();
        confirmed.manually_confirmed = true;
        assert!(scorer.score_pattern_at(&confirmed, &context, now) > base);

        let mut failing = plain.clone();
        failing.recent_failures = 2;
        let failing_score = scorer.score_pattern_at(&failing, &context, now);
        assert!((failing_score - base * 0.81).abs() < 1e-9);

        let mut critical = context.clone();
        critical.insert("critical_operation".into(), json!(true));
        assert!((scorer.score_pattern_at(&plain, &critical, now) - base * 0.8).abs() < 1e-9);

        let mut expert = context.clone();
        expert.insert("developer_experience".into(), json!("high"));
        assert!(scorer.score_pattern_at(&plain, &expert, now) > base);
    }

    #[test]
    fn test_score_is_clamped() {
        let scorer = ConfidenceScorer::default();
        let mut p = pattern(100);
        p.manually_confirmed = true;
        p.success_count = 50;
        let context = map(json!({"file_type": "py", "workflow_phase": "implement", "developer_experience": 0.9}));
        assert_eq!(scorer.score_pattern(&p, &context), 1.0);
    }

    #[test]
    fn test_adaptation_confidence_prefers_small_jumps() {
        let scorer = ConfidenceScorer::default();
        let context = map(json!({"intent": "testing", "workflow_phase": "implement", "file_path": "tests/a.py"}));

        let one_step = scorer.calculate_adaptation_confidence(
            "r",
            EnforcementLevel::Block,
            EnforcementLevel::Justify,
            &context,
            &[],
        );
        let three_steps = scorer.calculate_adaptation_confidence(
            "r",
            EnforcementLevel::Block,
            EnforcementLevel::Inform,
            &context,
            &[],
        );

        // 0.4 × 0.8 + 0.3 × 1.0 + 0.3 × 0.5
        assert!((one_step - 0.77).abs() < 1e-9);
        assert!(three_steps < one_step);
    }

    #[test]
    fn test_adaptation_confidence_uses_rule_history() {
        let scorer = ConfidenceScorer::default();
        let outcome = |rule: &str, successful| AdaptationOutcome {
            rule_id: rule.to_string(),
            from_level: EnforcementLevel::Warn,
            to_level: EnforcementLevel::Inform,
            successful,
            recorded_at: Utc::now(),
        };
        let history = vec![outcome("r", false), outcome("r", false), outcome("other", true)];

        let confidence = scorer.calculate_adaptation_confidence(
            "r",
            EnforcementLevel::Warn,
            EnforcementLevel::Inform,
            &Map::new(),
            &history,
        );
        // 0.4 × 0.8 + 0.3 × 0.5 + 0.3 × 0.0
        assert!((confidence - 0.47).abs() < 1e-9);
    }

    #[test]
    fn test_adaptation_confidence_bounds() {
        let scorer = ConfidenceScorer::default();
        let history: Vec<AdaptationOutcome> = (0..10)
            .map(|_| AdaptationOutcome {
                rule_id: "r".into(),
                from_level: EnforcementLevel::Warn,
                to_level: EnforcementLevel::Warn,
                successful: true,
                recorded_at: Utc::now(),
            })
            .collect();
        let context = map(json!({"intent": "testing", "workflow_phase": "x", "file_path": "y"}));

        let high = scorer.calculate_adaptation_confidence(
            "r",
            EnforcementLevel::Warn,
            EnforcementLevel::Warn,
            &context,
            &history,
        );
        assert_eq!(high, 0.95);
    }
}
