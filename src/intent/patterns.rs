//! Behavioral pattern definitions and named indicators
//!
//! Sub-score weights (total capped at 1.0):
//! - tool usage ratio within bounds: 0.4
//! - contiguous tool sequence present: 0.3
//! - edit count within bounds: 0.2
//! - indicators: 0.3 × fraction matched
//! - time span within bounds: 0.1

use super::IntentType;
use crate::events::Event;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;

const TOOL_RATIO_WEIGHT: f64 = 0.4;
const SEQUENCE_WEIGHT: f64 = 0.3;
const EDIT_COUNT_WEIGHT: f64 = 0.2;
const INDICATOR_WEIGHT: f64 = 0.3;
const TIME_SPAN_WEIGHT: f64 = 0.1;

/// Tools that only read the workspace
const READ_TOOLS: &[&str] = &["Read", "Grep", "Glob", "LS", "NotebookRead"];

static ERROR_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(error|exception|traceback|panic(ked)?|failed|failure|segfault)\b")
        .expect("static regex")
});

static TEST_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(pytest|jest|vitest|mocha|rspec|cargo test|go test|npm (run )?test|yarn test|unittest|tox)\b")
        .expect("static regex")
});

/// Named boolean predicate over the event window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indicator {
    /// At least 3 read-type tool events
    MultipleReads,
    /// Any payload mentions an error/exception token
    ErrorMentions,
    /// Edits touch at least 3 distinct files
    MultipleFilesEdited,
    /// At least one edit
    FileModifications,
    /// A test runner was invoked or a test run was reported
    TestRuns,
    /// Edits touch documentation files
    MarkdownFiles,
    /// Grep/Glob searches
    SearchActivity,
    /// The same shell command ran more than once
    RepeatedCommands,
}

impl Indicator {
    pub fn name(&self) -> &'static str {
        match self {
            Indicator::MultipleReads => "multiple_reads",
            Indicator::ErrorMentions => "error_mentions",
            Indicator::MultipleFilesEdited => "multiple_files_edited",
            Indicator::FileModifications => "file_modifications",
            Indicator::TestRuns => "test_runs",
            Indicator::MarkdownFiles => "markdown_files",
            Indicator::SearchActivity => "search_activity",
            Indicator::RepeatedCommands => "repeated_commands",
        }
    }

    pub fn evaluate(&self, events: &[&Event]) -> bool {
        match self {
            Indicator::MultipleReads => {
                events
                    .iter()
                    .filter(|e| e.tool_name().is_some_and(|t| READ_TOOLS.contains(&t)))
                    .count()
                    >= 3
            }
            Indicator::ErrorMentions => events
                .iter()
                .any(|e| ERROR_TOKENS.is_match(&e.text_content())),
            Indicator::MultipleFilesEdited => edited_files(events).len() >= 3,
            Indicator::FileModifications => events.iter().any(|e| e.is_edit()),
            Indicator::TestRuns => events.iter().any(|e| {
                e.event_type == "test_run"
                    || e.command()
                        .is_some_and(|cmd| TEST_COMMAND.is_match(&cmd.to_lowercase()))
            }),
            Indicator::MarkdownFiles => edited_files(events).iter().any(|path| is_doc_file(path)),
            Indicator::SearchActivity => events
                .iter()
                .any(|e| matches!(e.tool_name(), Some("Grep") | Some("Glob"))),
            Indicator::RepeatedCommands => {
                let mut seen = HashSet::new();
                events
                    .iter()
                    .filter_map(|e| e.command())
                    .any(|cmd| !seen.insert(cmd.trim()))
            }
        }
    }
}

fn edited_files<'a>(events: &[&'a Event]) -> HashSet<&'a str> {
    events
        .iter()
        .copied()
        .filter(|e| e.is_edit())
        .filter_map(|e| e.file_path())
        .collect()
}

fn is_doc_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.ends_with(".md")
        || lower.ends_with(".rst")
        || lower.ends_with(".adoc")
        || lower.contains("/docs/")
        || lower.starts_with("docs/")
        || lower.ends_with("readme")
}

/// Allowed span between the oldest and newest event in the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeSpan {
    pub min: Option<Duration>,
    pub max: Option<Duration>,
}

/// Behavioral signature of one intent
#[derive(Debug, Clone)]
pub struct PatternDefinition {
    pub intent: IntentType,
    pub tools: Vec<String>,
    pub min_tool_ratio: Option<f64>,
    pub max_tool_ratio: Option<f64>,
    pub sequence: Option<Vec<String>>,
    pub min_edits: Option<usize>,
    pub max_edits: Option<usize>,
    pub indicators: Vec<Indicator>,
    pub time_span: Option<TimeSpan>,
}

/// Per-component contributions for one pattern
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PatternScore {
    pub tool_ratio: f64,
    pub sequence: f64,
    pub edit_count: f64,
    pub indicators: f64,
    pub time_span: f64,
}

impl PatternScore {
    pub fn confidence(&self) -> f64 {
        (self.tool_ratio + self.sequence + self.edit_count + self.indicators + self.time_span)
            .min(1.0)
    }
}

impl PatternDefinition {
    fn new(intent: IntentType, tools: &[&str]) -> Self {
        Self {
            intent,
            tools: tools.iter().map(|t| t.to_string()).collect(),
            min_tool_ratio: None,
            max_tool_ratio: None,
            sequence: None,
            min_edits: None,
            max_edits: None,
            indicators: Vec::new(),
            time_span: None,
        }
    }

    /// Score this pattern against an already time-filtered window
    pub fn score(&self, events: &[&Event]) -> PatternScore {
        let tools: Vec<&str> = events.iter().filter_map(|e| e.tool_name()).collect();

        PatternScore {
            tool_ratio: self.tool_ratio_score(&tools),
            sequence: self.sequence_score(&tools),
            edit_count: self.edit_count_score(events),
            indicators: self.indicator_score(events),
            time_span: self.time_span_score(events),
        }
    }

    fn tool_ratio_score(&self, tools: &[&str]) -> f64 {
        if tools.is_empty() || self.tools.is_empty() {
            return 0.0;
        }

        let matching = tools
            .iter()
            .filter(|t| self.tools.iter().any(|candidate| candidate == *t))
            .count();
        let ratio = matching as f64 / tools.len() as f64;

        let above_min = match self.min_tool_ratio {
            Some(min) => ratio >= min,
            None => ratio > 0.0,
        };
        let below_max = self.max_tool_ratio.map_or(true, |max| ratio <= max);

        if above_min && below_max {
            TOOL_RATIO_WEIGHT
        } else {
            0.0
        }
    }

    fn sequence_score(&self, tools: &[&str]) -> f64 {
        let Some(sequence) = &self.sequence else {
            return 0.0;
        };
        if sequence.is_empty() || sequence.len() > tools.len() {
            return 0.0;
        }

        let found = tools.windows(sequence.len()).any(|window| {
            window
                .iter()
                .zip(sequence.iter())
                .all(|(tool, expected)| *tool == expected)
        });

        if found {
            SEQUENCE_WEIGHT
        } else {
            0.0
        }
    }

    fn edit_count_score(&self, events: &[&Event]) -> f64 {
        if self.min_edits.is_none() && self.max_edits.is_none() {
            return 0.0;
        }

        let edits = events.iter().filter(|e| e.is_edit()).count();
        let within = self.min_edits.map_or(true, |min| edits >= min)
            && self.max_edits.map_or(true, |max| edits <= max);

        if within {
            EDIT_COUNT_WEIGHT
        } else {
            0.0
        }
    }

    fn indicator_score(&self, events: &[&Event]) -> f64 {
        if self.indicators.is_empty() {
            return 0.0;
        }

        let matched = self
            .indicators
            .iter()
            .filter(|indicator| indicator.evaluate(events))
            .count();

        INDICATOR_WEIGHT * matched as f64 / self.indicators.len() as f64
    }

    fn time_span_score(&self, events: &[&Event]) -> f64 {
        let Some(constraint) = self.time_span else {
            return 0.0;
        };
        let (Some(first), Some(last)) = (
            events.iter().map(|e| e.timestamp).min(),
            events.iter().map(|e| e.timestamp).max(),
        ) else {
            return 0.0;
        };

        let span = (last - first).to_std().unwrap_or_default();
        let within = constraint.min.map_or(true, |min| span >= min)
            && constraint.max.map_or(true, |max| span <= max);

        if within {
            TIME_SPAN_WEIGHT
        } else {
            0.0
        }
    }
}

/// The six built-in activity patterns
pub fn default_patterns() -> Vec<PatternDefinition> {
    vec![
        PatternDefinition {
            min_tool_ratio: Some(0.7),
            max_edits: Some(0),
            indicators: vec![Indicator::MultipleReads, Indicator::SearchActivity],
            ..PatternDefinition::new(
                IntentType::Exploring,
                &["Read", "Grep", "Glob", "LS", "WebFetch", "WebSearch"],
            )
        },
        PatternDefinition {
            min_tool_ratio: Some(0.3),
            sequence: Some(vec!["Read".to_string(), "Edit".to_string()]),
            min_edits: Some(1),
            indicators: vec![Indicator::FileModifications],
            ..PatternDefinition::new(IntentType::Implementing, &["Edit", "Write", "MultiEdit"])
        },
        PatternDefinition {
            min_tool_ratio: Some(0.4),
            sequence: Some(vec!["Bash".to_string(), "Read".to_string()]),
            indicators: vec![Indicator::ErrorMentions, Indicator::RepeatedCommands],
            time_span: Some(TimeSpan {
                min: Some(Duration::from_secs(30)),
                max: None,
            }),
            ..PatternDefinition::new(IntentType::Debugging, &["Bash", "Read", "Grep"])
        },
        PatternDefinition {
            min_tool_ratio: Some(0.5),
            min_edits: Some(3),
            indicators: vec![Indicator::MultipleFilesEdited],
            ..PatternDefinition::new(IntentType::Refactoring, &["Edit", "MultiEdit", "Read"])
        },
        PatternDefinition {
            min_tool_ratio: Some(0.3),
            sequence: Some(vec!["Edit".to_string(), "Bash".to_string()]),
            indicators: vec![Indicator::TestRuns],
            ..PatternDefinition::new(IntentType::Testing, &["Bash"])
        },
        PatternDefinition {
            min_tool_ratio: Some(0.3),
            min_edits: Some(1),
            indicators: vec![Indicator::MarkdownFiles],
            ..PatternDefinition::new(IntentType::Documenting, &["Write", "Edit"])
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn ev(event_type: &str, data: Value) -> Event {
        Event::claude(event_type, data.as_object().cloned().unwrap_or_else(Map::new))
    }

    fn tool(name: &str) -> Event {
        ev("pre_tool_use", json!({"tool": name}))
    }

    fn pattern(intent: IntentType) -> PatternDefinition {
        default_patterns()
            .into_iter()
            .find(|p| p.intent == intent)
            .unwrap()
    }

    #[test]
    fn test_all_six_intents_defined() {
        let intents: HashSet<IntentType> = default_patterns().iter().map(|p| p.intent).collect();
        assert_eq!(intents.len(), 6);
        assert!(!intents.contains(&IntentType::Idle));
    }

    #[test]
    fn test_sequence_requires_contiguous_match() {
        let implementing = pattern(IntentType::Implementing);

        let contiguous = [tool("Read"), tool("Edit")];
        let refs: Vec<&Event> = contiguous.iter().collect();
        assert_eq!(implementing.score(&refs).sequence, SEQUENCE_WEIGHT);

        let interrupted = [tool("Read"), tool("Grep"), tool("Edit")];
        let refs: Vec<&Event> = interrupted.iter().collect();
        assert_eq!(implementing.score(&refs).sequence, 0.0);
    }

    #[test]
    fn test_confidence_is_capped() {
        let implementing = pattern(IntentType::Implementing);
        let events = [
            tool("Read"),
            ev("post_tool_use", json!({"tool": "Edit", "file_path": "a.py"})),
        ];
        let refs: Vec<&Event> = events.iter().collect();
        let score = implementing.score(&refs);
        assert!(score.tool_ratio + score.sequence + score.edit_count + score.indicators > 1.0);
        assert_eq!(score.confidence(), 1.0);
    }

    #[test]
    fn test_max_edits_zero_excludes_editing_windows() {
        let exploring = pattern(IntentType::Exploring);
        let events = [tool("Read"), ev("file_edit", json!({"file_path": "a.py"}))];
        let refs: Vec<&Event> = events.iter().collect();
        assert_eq!(exploring.score(&refs).edit_count, 0.0);
    }

    #[test]
    fn test_error_mentions_indicator() {
        let events = [ev(
            "post_tool_use",
            json!({"tool": "Bash", "output": "Traceback (most recent call last)"}),
        )];
        let refs: Vec<&Event> = events.iter().collect();
        assert!(Indicator::ErrorMentions.evaluate(&refs));

        let calm = [ev("post_tool_use", json!({"tool": "Bash", "output": "ok"}))];
        let refs: Vec<&Event> = calm.iter().collect();
        assert!(!Indicator::ErrorMentions.evaluate(&refs));
    }

    #[test]
    fn test_multiple_files_edited_counts_distinct_paths() {
        let events = [
            ev("file_edit", json!({"file_path": "a.rs"})),
            ev("file_edit", json!({"file_path": "a.rs"})),
            ev("file_edit", json!({"file_path": "b.rs"})),
        ];
        let refs: Vec<&Event> = events.iter().collect();
        assert!(!Indicator::MultipleFilesEdited.evaluate(&refs));

        let mut more = events.to_vec();
        more.push(ev("file_edit", json!({"file_path": "c.rs"})));
        let refs: Vec<&Event> = more.iter().collect();
        assert!(Indicator::MultipleFilesEdited.evaluate(&refs));
    }

    #[test]
    fn test_test_runs_indicator() {
        let events = [ev(
            "pre_tool_use",
            json!({"tool_name": "Bash", "tool_input": {"command": "cargo test --lib"}}),
        )];
        let refs: Vec<&Event> = events.iter().collect();
        assert!(Indicator::TestRuns.evaluate(&refs));

        let reported = [ev("test_run", json!({"passed": 3}))];
        let refs: Vec<&Event> = reported.iter().collect();
        assert!(Indicator::TestRuns.evaluate(&refs));
    }

    #[test]
    fn test_repeated_commands_indicator() {
        let events = [
            ev("pre_tool_use", json!({"tool": "Bash", "command": "make"})),
            ev("pre_tool_use", json!({"tool": "Bash", "command": "make "})),
        ];
        let refs: Vec<&Event> = events.iter().collect();
        assert!(Indicator::RepeatedCommands.evaluate(&refs));
    }

    #[test]
    fn test_markdown_indicator() {
        let events = [ev("file_edit", json!({"file_path": "docs/guide.md"}))];
        let refs: Vec<&Event> = events.iter().collect();
        assert!(Indicator::MarkdownFiles.evaluate(&refs));
    }

    #[test]
    fn test_time_span_constraint() {
        let debugging = pattern(IntentType::Debugging);
        let now = chrono::Utc::now();
        let events = [
            tool("Bash").with_timestamp(now - chrono::Duration::seconds(60)),
            tool("Read").with_timestamp(now),
        ];
        let refs: Vec<&Event> = events.iter().collect();
        assert_eq!(debugging.score(&refs).time_span, TIME_SPAN_WEIGHT);

        let quick = [tool("Bash").with_timestamp(now), tool("Read").with_timestamp(now)];
        let refs: Vec<&Event> = quick.iter().collect();
        assert_eq!(debugging.score(&refs).time_span, 0.0);
    }
}
