//! Activity events emitted by the coding assistant's hooks
//!
//! Every event carries a timestamp, an optional producer identity, an event
//! type string (usually the hook name) and an insertion-ordered JSON payload.
//! The variant set is closed: new producers extend [`EventKind`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tools that change file contents
pub const EDIT_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit"];

/// Event types that report a completed file edit without naming a tool
pub const EDIT_EVENT_TYPES: &[&str] = &["file_edit", "file_modified", "file_created"];

/// Severity carried by [`EventKind::System`] events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    /// Lenient parse used at the wire boundary; unknown values map to `Info`
    pub fn parse_lenient(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Severity::Debug,
            "warn" | "warning" => Severity::Warning,
            "error" => Severity::Error,
            "critical" | "fatal" => Severity::Critical,
            _ => Severity::Info,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event variant, selected on the wire by the `__type__` discriminator
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Base event (`Event`); also the fallback for unknown discriminators
    Generic,
    /// Hook event raised by the assistant (`ClaudeEvent`)
    Claude,
    /// Internal event with a fixed component and severity (`SystemEvent`)
    System { component: String, severity: Severity },
}

impl EventKind {
    pub fn discriminator(&self) -> &'static str {
        match self {
            EventKind::Generic => "Event",
            EventKind::Claude => "ClaudeEvent",
            EventKind::System { .. } => "SystemEvent",
        }
    }
}

/// An immutable activity event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub event_type: String,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind,
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
            source: None,
        }
    }

    /// Hook event from the assistant
    pub fn claude(event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self::new(EventKind::Claude, event_type, data)
    }

    pub fn system(
        component: impl Into<String>,
        severity: Severity,
        event_type: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self::new(
            EventKind::System {
                component: component.into(),
                severity,
            },
            event_type,
            data,
        )
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Tool name from `tool`, `tool_name` or the nested hook payload
    pub fn tool_name(&self) -> Option<&str> {
        self.data
            .get("tool")
            .or_else(|| self.data.get("tool_name"))
            .and_then(Value::as_str)
    }

    /// File touched by this event, if any
    pub fn file_path(&self) -> Option<&str> {
        self.data
            .get("file_path")
            .and_then(Value::as_str)
            .or_else(|| {
                self.data
                    .get("tool_input")
                    .and_then(|input| input.get("file_path"))
                    .and_then(Value::as_str)
            })
    }

    /// Command line for shell tool invocations
    pub fn command(&self) -> Option<&str> {
        self.data
            .get("command")
            .and_then(Value::as_str)
            .or_else(|| {
                self.data
                    .get("tool_input")
                    .and_then(|input| input.get("command"))
                    .and_then(Value::as_str)
            })
    }

    /// True for edit tool invocations and file-edit completion events
    pub fn is_edit(&self) -> bool {
        self.tool_name().is_some_and(|tool| EDIT_TOOLS.contains(&tool))
            || EDIT_EVENT_TYPES.contains(&self.event_type.as_str())
    }

    /// Lowercased concatenation of every string in the payload
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for value in self.data.values() {
            collect_strings(value, &mut out);
        }
        out.to_lowercase()
    }

    /// Queue lane for this event: critical and error system events jump ahead
    pub fn priority_hint(&self) -> Option<u8> {
        match &self.kind {
            EventKind::System {
                severity: Severity::Critical,
                ..
            } => Some(0),
            EventKind::System {
                severity: Severity::Error,
                ..
            } => Some(1),
            _ => None,
        }
    }
}

fn collect_strings(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push(' ');
        }
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}
