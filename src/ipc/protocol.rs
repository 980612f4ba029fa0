//! Event Protocol - JSON body and length-prefix framing
//!
//! Body fields:
//! - `__type__`: variant discriminator (`Event`, `ClaudeEvent`, `SystemEvent`)
//! - `type`: event type string
//! - `data`: JSON object payload
//! - `timestamp`: ISO-8601 (naive timestamps are read as UTC)
//! - `source`: optional producer identity
//! - `component` / `severity`: only for `SystemEvent`

use crate::error::{Result, VigilError};
use crate::events::{Event, EventKind, Severity};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::codec::LengthDelimitedCodec;

/// Acknowledgement byte for an accepted frame
pub const ACK: u8 = 0x00;

/// Reply byte for a frame that could not be decoded
pub const NACK: u8 = 0x01;

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_BYTES: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct WireEvent {
    #[serde(rename = "__type__", default)]
    discriminator: Option<String>,

    #[serde(rename = "type")]
    event_type: String,

    #[serde(default)]
    data: Map<String, Value>,

    #[serde(default)]
    timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    component: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    severity: Option<String>,
}

/// Serialize an event to its JSON body
pub fn encode_event(event: &Event) -> Result<Vec<u8>> {
    let (component, severity) = match &event.kind {
        EventKind::System {
            component,
            severity,
        } => (Some(component.clone()), Some(severity.as_str().to_string())),
        EventKind::Generic | EventKind::Claude => (None, None),
    };

    let wire = WireEvent {
        discriminator: Some(event.kind.discriminator().to_string()),
        event_type: event.event_type.clone(),
        data: event.data.clone(),
        timestamp: Some(event.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        source: event.source.clone(),
        component,
        severity,
    };

    Ok(serde_json::to_vec(&wire)?)
}

/// Deserialize a JSON body; unknown discriminators become [`EventKind::Generic`]
pub fn decode_event(body: &[u8]) -> Result<Event> {
    let wire: WireEvent = serde_json::from_slice(body)?;

    let kind = match wire.discriminator.as_deref() {
        Some("ClaudeEvent") => EventKind::Claude,
        Some("SystemEvent") => EventKind::System {
            component: wire.component.unwrap_or_else(|| "unknown".to_string()),
            severity: wire
                .severity
                .as_deref()
                .map(Severity::parse_lenient)
                .unwrap_or(Severity::Info),
        },
        _ => EventKind::Generic,
    };

    let timestamp = match wire.timestamp.as_deref() {
        Some(raw) => parse_timestamp(raw)?,
        None => Utc::now(),
    };

    Ok(Event {
        kind,
        event_type: wire.event_type,
        data: wire.data,
        timestamp,
        source: wire.source,
    })
}

/// Encode a complete frame: length prefix followed by the JSON body
pub fn encode_frame(event: &Event) -> Result<Vec<u8>> {
    let body = encode_event(event)?;
    let len = u32::try_from(body.len())
        .map_err(|_| VigilError::Protocol(format!("Message too large: {} bytes", body.len())))?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Codec used by the server to split the byte stream into frame bodies
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(LENGTH_PREFIX_BYTES)
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| VigilError::Protocol(format!("Invalid timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_round_trip_every_variant() {
        let data = payload(json!({"tool": "Edit", "file_path": "a.py", "nested": {"k": [1, 2]}}));
        let events = vec![
            Event::new(EventKind::Generic, "custom", data.clone()),
            Event::claude("post_tool_use", data.clone()).with_source("hook"),
            Event::system("queue", Severity::Warning, "overflow", data).with_source("daemon"),
        ];

        for event in events {
            let decoded = decode_event(&encode_event(&event).unwrap()).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn test_decode_reference_message() {
        let body = br#"{"__type__":"ClaudeEvent","type":"post_tool_use","data":{"tool":"Edit","file_path":"a.py"},"timestamp":"2024-01-01T00:00:00","source":"x"}"#;
        let event = decode_event(body).unwrap();

        assert_eq!(event.kind, EventKind::Claude);
        assert_eq!(event.event_type, "post_tool_use");
        assert_eq!(event.tool_name(), Some("Edit"));
        assert_eq!(event.source.as_deref(), Some("x"));
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_unknown_discriminator_falls_back_to_generic() {
        let body = br#"{"__type__":"FancyNewEvent","type":"x","data":{},"timestamp":"2024-01-01T00:00:00Z"}"#;
        let event = decode_event(body).unwrap();
        assert_eq!(event.kind, EventKind::Generic);

        let body = br#"{"type":"x"}"#;
        let event = decode_event(body).unwrap();
        assert_eq!(event.kind, EventKind::Generic);
        assert!(event.data.is_empty());
    }

    #[test]
    fn test_payload_key_order_preserved() {
        let body = br#"{"__type__":"Event","type":"x","data":{"zeta":1,"alpha":2,"mid":3},"timestamp":"2024-01-01T00:00:00Z"}"#;
        let event = decode_event(body).unwrap();
        let keys: Vec<&str> = event.data.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_invalid_timestamp_is_protocol_error() {
        let body = br#"{"__type__":"Event","type":"x","data":{},"timestamp":"yesterday"}"#;
        assert!(matches!(decode_event(body), Err(VigilError::Protocol(_))));
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let body = br#"{"__type__":"Event","data":{}}"#;
        assert!(matches!(decode_event(body), Err(VigilError::Serialization(_))));
    }

    #[test]
    fn test_frame_has_big_endian_length_prefix() {
        let event = Event::claude("stop", Map::new());
        let frame = encode_frame(&event).unwrap();
        let body = encode_event(&event).unwrap();

        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, body.len());
        assert_eq!(&frame[4..], body.as_slice());
    }

    #[test]
    fn test_system_event_wire_fields() {
        let event = Event::system("store", Severity::Critical, "persist_failed", Map::new());
        let value: Value = serde_json::from_slice(&encode_event(&event).unwrap()).unwrap();
        assert_eq!(value["__type__"], "SystemEvent");
        assert_eq!(value["component"], "store");
        assert_eq!(value["severity"], "critical");
        assert!(value.get("source").is_none());
    }
}
