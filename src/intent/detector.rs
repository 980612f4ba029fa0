//! Sliding-window intent detector with hysteresis

use super::patterns::{default_patterns, PatternDefinition, PatternScore};
use super::{Intent, IntentType};
use crate::config::IntentConfig;
use crate::events::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Below this the best pattern is reported as idle
const MIN_PATTERN_CONFIDENCE: f64 = 0.3;

/// A different intent must exceed this to replace the current one
const SWITCH_CONFIDENCE: f64 = 0.5;

/// The same intent is refreshed only when confidence moves by more than this
const REFRESH_DELTA: f64 = 0.2;

/// Aggregate view over recent detections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSummary {
    pub current: Intent,
    pub detections: usize,
    pub distribution: BTreeMap<IntentType, usize>,
    pub average_confidence: f64,
}

/// Classifies the recent event window into an [`Intent`]
pub struct IntentDetector {
    patterns: Vec<PatternDefinition>,
    events: VecDeque<Event>,
    history_size: usize,
    time_window: chrono::Duration,
    current: Intent,
    detections: VecDeque<Intent>,
    detection_history_size: usize,
}

impl IntentDetector {
    pub fn new(config: &IntentConfig) -> Self {
        Self::with_patterns(config, default_patterns())
    }

    /// Detector with custom pattern definitions
    pub fn with_patterns(config: &IntentConfig, patterns: Vec<PatternDefinition>) -> Self {
        let time_window = chrono::Duration::from_std(config.time_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        Self {
            patterns,
            events: VecDeque::with_capacity(config.history_size),
            history_size: config.history_size.max(1),
            time_window,
            current: Intent::idle(0.0, Utc::now()),
            detections: VecDeque::new(),
            detection_history_size: config.intent_history_size.max(1),
        }
    }

    /// Record an event and re-classify against the wall clock
    pub fn update(&mut self, event: &Event) -> &Intent {
        self.update_at(event, Utc::now())
    }

    /// Record an event and re-classify as of `now`
    pub fn update_at(&mut self, event: &Event, now: DateTime<Utc>) -> &Intent {
        if self.events.len() == self.history_size {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());

        let detected = self.detect_at(now);

        if self.should_replace(&detected) {
            debug!(
                "Intent changed: {} ({:.2}) -> {} ({:.2})",
                self.current.intent_type,
                self.current.confidence,
                detected.intent_type,
                detected.confidence
            );
            self.current = detected.clone();
        }

        if self.detections.len() == self.detection_history_size {
            self.detections.pop_front();
        }
        self.detections.push_back(detected);

        &self.current
    }

    /// Classify the current window without touching detector state
    pub fn detect_at(&self, now: DateTime<Utc>) -> Intent {
        let cutoff = now - self.time_window;
        let window: Vec<&Event> = self
            .events
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .collect();

        if window.is_empty() {
            return Intent::idle(0.0, now);
        }

        let mut best: Option<(IntentType, PatternScore)> = None;
        for pattern in &self.patterns {
            let score = pattern.score(&window);
            let better = match &best {
                Some((_, current)) => score.confidence() > current.confidence(),
                None => true,
            };
            if better {
                best = Some((pattern.intent, score));
            }
        }

        let Some((intent_type, score)) = best else {
            return Intent::idle(0.0, now);
        };

        let confidence = score.confidence();
        if confidence < MIN_PATTERN_CONFIDENCE {
            return Intent::idle(confidence, now);
        }

        let evidence = BTreeMap::from([
            ("tool_ratio".to_string(), score.tool_ratio),
            ("sequence".to_string(), score.sequence),
            ("edit_count".to_string(), score.edit_count),
            ("indicators".to_string(), score.indicators),
            ("time_span".to_string(), score.time_span),
            ("window_events".to_string(), window.len() as f64),
        ]);

        Intent {
            intent_type,
            confidence,
            evidence,
            detected_at: now,
        }
    }

    fn should_replace(&self, detected: &Intent) -> bool {
        if detected.intent_type != self.current.intent_type {
            detected.confidence > SWITCH_CONFIDENCE
        } else {
            (detected.confidence - self.current.confidence).abs() > REFRESH_DELTA
        }
    }

    pub fn current_intent(&self) -> &Intent {
        &self.current
    }

    /// Past detections, oldest first (including ones hysteresis ignored)
    pub fn detections(&self) -> impl Iterator<Item = &Intent> {
        self.detections.iter()
    }

    pub fn buffered_events(&self) -> usize {
        self.events.len()
    }

    pub fn intent_summary(&self) -> IntentSummary {
        let mut distribution = BTreeMap::new();
        for detection in &self.detections {
            *distribution.entry(detection.intent_type).or_insert(0) += 1;
        }

        let average_confidence = if self.detections.is_empty() {
            0.0
        } else {
            self.detections.iter().map(|d| d.confidence).sum::<f64>()
                / self.detections.len() as f64
        };

        IntentSummary {
            current: self.current.clone(),
            detections: self.detections.len(),
            distribution,
            average_confidence,
        }
    }

    /// Forget all events and detections
    pub fn reset(&mut self) {
        self.events.clear();
        self.detections.clear();
        self.current = Intent::idle(0.0, Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::patterns::Indicator;
    use serde_json::{json, Map, Value};
    use std::time::Duration;

    fn ev(event_type: &str, data: Value, at: DateTime<Utc>) -> Event {
        Event::claude(event_type, data.as_object().cloned().unwrap_or_else(Map::new))
            .with_timestamp(at)
    }

    fn tool(name: &str, at: DateTime<Utc>) -> Event {
        ev("pre_tool_use", json!({"tool": name}), at)
    }

    fn detector() -> IntentDetector {
        IntentDetector::new(&IntentConfig::default())
    }

    #[test]
    fn test_starts_idle() {
        let detector = detector();
        assert_eq!(detector.current_intent().intent_type, IntentType::Idle);
        assert_eq!(detector.current_intent().confidence, 0.0);
    }

    #[test]
    fn test_read_only_activity_is_exploring() {
        let mut detector = detector();
        let now = Utc::now();
        for name in ["Read", "Grep", "Glob", "LS", "Read"] {
            detector.update_at(&tool(name, now), now);
        }

        let intent = detector.current_intent();
        assert_eq!(intent.intent_type, IntentType::Exploring);
        assert!(intent.confidence >= 0.6);
    }

    #[test]
    fn test_read_then_edit_is_implementing() {
        let mut detector = detector();
        let now = Utc::now();
        detector.update_at(&ev("pre_tool_use", json!({"tool": "Read", "file_path": "a.py"}), now), now);
        detector.update_at(&ev("post_tool_use", json!({"tool": "Edit", "file_path": "a.py"}), now), now);
        let intent = detector.update_at(&ev("file_edit", json!({"file_path": "a.py"}), now), now);

        assert_eq!(intent.intent_type, IntentType::Implementing);
        assert!(intent.confidence > 0.5);
        assert_eq!(intent.evidence["sequence"], 0.3);
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let now = Utc::now();
        let stale = ev(
            "post_tool_use",
            json!({"tool": "Bash", "command": "pytest", "output": "Traceback: error"}),
            now - chrono::Duration::hours(1),
        );

        let mut baseline = detector();
        let mut polluted = detector();
        polluted.update_at(&stale, now);

        for name in ["Read", "Grep", "Glob", "LS", "Read"] {
            baseline.update_at(&tool(name, now), now);
            polluted.update_at(&tool(name, now), now);
        }

        assert_eq!(polluted.current_intent().intent_type, IntentType::Exploring);
        assert_eq!(
            polluted.detect_at(now).confidence,
            baseline.detect_at(now).confidence
        );
    }

    #[test]
    fn test_only_stale_events_yield_idle() {
        let mut detector = detector();
        let now = Utc::now();
        let intent = detector.update_at(&tool("Read", now - chrono::Duration::minutes(10)), now);
        assert_eq!(intent.intent_type, IntentType::Idle);
        assert_eq!(detector.detect_at(now).confidence, 0.0);
    }

    #[test]
    fn test_low_confidence_reports_idle() {
        let mut detector = detector();
        let now = Utc::now();
        // No tool, no edits: nothing scores
        detector.update_at(&ev("notification", json!({"message": "hi"}), now), now);
        let detected = detector.detect_at(now);
        assert_eq!(detected.intent_type, IntentType::Idle);
        assert!(detected.confidence < 0.3);
    }

    fn pattern(intent: IntentType, tools: &[&str], sequence: Option<&[&str]>) -> PatternDefinition {
        PatternDefinition {
            intent,
            tools: tools.iter().map(|t| t.to_string()).collect(),
            min_tool_ratio: Some(0.5),
            max_tool_ratio: None,
            sequence: sequence.map(|seq| seq.iter().map(|t| t.to_string()).collect()),
            min_edits: None,
            max_edits: None,
            indicators: Vec::new(),
            time_span: None,
        }
    }

    /// Exploring scores 0.7 on Read, Read; debugging scores 0.4 on a Bash
    /// majority, or 0.7 with three Bash calls in a row when `strong_debugging`
    fn read_then_bash(strong_debugging: bool) -> IntentDetector {
        let debugging_sequence: Option<&[&str]> = if strong_debugging {
            Some(&["Bash", "Bash", "Bash"][..])
        } else {
            None
        };
        let mut detector = IntentDetector::with_patterns(
            &IntentConfig::default(),
            vec![
                pattern(IntentType::Exploring, &["Read"], Some(&["Read", "Read"][..])),
                pattern(IntentType::Debugging, &["Bash"], debugging_sequence),
            ],
        );

        let now = Utc::now();
        for name in ["Read", "Read"] {
            detector.update_at(&tool(name, now), now);
        }
        assert_eq!(detector.current_intent().intent_type, IntentType::Exploring);
        assert!((detector.current_intent().confidence - 0.7).abs() < 1e-9);

        for _ in 0..3 {
            detector.update_at(&tool("Bash", now), now);
        }
        detector
    }

    #[test]
    fn test_hysteresis_keeps_current_on_weak_switch() {
        let detector = read_then_bash(false);

        let detected = detector.detections().last().unwrap();
        assert_eq!(detected.intent_type, IntentType::Debugging);
        assert!((detected.confidence - 0.4).abs() < 1e-9);

        assert_eq!(detector.current_intent().intent_type, IntentType::Exploring);
        assert!((detector.current_intent().confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_confident_switch_replaces_current() {
        let detector = read_then_bash(true);

        let current = detector.current_intent();
        assert_eq!(current.intent_type, IntentType::Debugging);
        assert!((current.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_same_type_large_change_is_refreshed() {
        let mut exploring = pattern(IntentType::Exploring, &["Read"], Some(&["Read", "Read"][..]));
        exploring.indicators = vec![Indicator::MultipleReads];
        let mut detector = IntentDetector::with_patterns(&IntentConfig::default(), vec![exploring]);

        let now = Utc::now();
        detector.update_at(&tool("Read", now), now);
        detector.update_at(&tool("Read", now), now);
        assert!((detector.current_intent().confidence - 0.7).abs() < 1e-9);

        // The third read satisfies multiple_reads: +0.3, above the refresh delta
        detector.update_at(&tool("Read", now), now);
        assert_eq!(detector.current_intent().intent_type, IntentType::Exploring);
        assert!((detector.current_intent().confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_same_type_small_change_is_not_refreshed() {
        let mut detector = detector();
        let now = Utc::now();
        detector.update_at(&tool("Read", now), now);
        let first = detector.current_intent().confidence;

        // Grep adds search_activity (+0.15): below the refresh delta
        detector.update_at(&tool("Grep", now), now);
        assert_eq!(detector.current_intent().confidence, first);
        assert!(detector.detections().last().unwrap().confidence > first);
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let config = IntentConfig {
            history_size: 3,
            time_window: Duration::from_secs(300),
            intent_history_size: 2,
        };
        let mut detector = IntentDetector::new(&config);
        let now = Utc::now();
        for _ in 0..10 {
            detector.update_at(&tool("Read", now), now);
        }
        assert_eq!(detector.buffered_events(), 3);
        assert_eq!(detector.detections().count(), 2);
    }

    #[test]
    fn test_summary_distribution() {
        let mut detector = detector();
        let now = Utc::now();
        for name in ["Read", "Grep", "Glob"] {
            detector.update_at(&tool(name, now), now);
        }

        let summary = detector.intent_summary();
        assert_eq!(summary.detections, 3);
        assert_eq!(summary.distribution[&IntentType::Exploring], 3);
        assert!(summary.average_confidence > 0.5);

        detector.reset();
        assert_eq!(detector.intent_summary().detections, 0);
        assert_eq!(detector.current_intent().intent_type, IntentType::Idle);
    }
}
