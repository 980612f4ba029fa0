//! Hook receiver: the boundary between editor hooks and the daemon
//!
//! A hook invocation passes one JSON object on stdin. It is forwarded as a
//! `ClaudeEvent` named after the hook, and the hook always gets a JSON
//! status back so a missing daemon never breaks the editor session.

use crate::error::{Result, VigilError};
use crate::events::Event;
use crate::ipc::IpcClient;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Build the event for one hook invocation
///
/// Empty input is an empty payload. Anything other than a JSON object is
/// rejected.
pub fn hook_event(hook_name: &str, input: &str) -> Result<Event> {
    let data = if input.trim().is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(input)? {
            Value::Object(map) => map,
            other => {
                return Err(VigilError::Protocol(format!(
                    "hook input must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        }
    };

    Ok(Event::claude(hook_name, data).with_source("hook"))
}

/// Forward one hook invocation; never fails
///
/// Returns `{"status": "received"}` when the daemon acknowledged the event,
/// otherwise `{"status": "error", "error": ...}`.
pub async fn handle_hook_input(hook_name: &str, input: &str, client: &IpcClient) -> Value {
    let event = match hook_event(hook_name, input) {
        Ok(event) => event,
        Err(e) => {
            debug!("Rejected input for hook {}: {}", hook_name, e);
            return json!({"status": "error", "error": e.to_string()});
        }
    };

    match client.send_detailed(&event).await {
        Ok(()) => json!({"status": "received"}),
        Err(e) => {
            debug!("Hook {} could not reach daemon: {}", hook_name, e);
            json!({"status": "error", "error": e.to_string()})
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn test_hook_event_uses_hook_name() {
        let event = hook_event("post_tool_use", r#"{"tool": "Edit", "file_path": "a.py"}"#).unwrap();
        assert_eq!(event.event_type, "post_tool_use");
        assert_eq!(event.kind, EventKind::Claude);
        assert_eq!(event.tool_name(), Some("Edit"));
        assert_eq!(event.source.as_deref(), Some("hook"));
    }

    #[test]
    fn test_empty_input_is_empty_payload() {
        let event = hook_event("stop", "  \n").unwrap();
        assert!(event.data.is_empty());
    }

    #[test]
    fn test_non_object_input_rejected() {
        assert!(hook_event("stop", "[1, 2]").is_err());
        assert!(hook_event("stop", "{not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_daemon_reports_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let client = IpcClient::new(dir.path().join("vigil.sock"));

        let reply = handle_hook_input("stop", "{}", &client).await;
        assert_eq!(reply["status"], "error");
        assert!(reply["error"].as_str().is_some_and(|m| m.contains("vigil.sock")));
        assert!(reply.get("message").is_none());

        let reply = handle_hook_input("stop", "42", &client).await;
        assert_eq!(reply["status"], "error");
        assert!(reply["error"].as_str().is_some_and(|m| m.contains("JSON object")));
    }
}
