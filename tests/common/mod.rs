//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use vigil_core::{Event, EventHandler};

/// Handler that records every event it receives
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
    arrived: Notify,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until at least `count` events arrived, or give up after `timeout`
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Event> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let events = self.events();
            if events.len() >= count {
                return events;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.events();
            }
        }
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: Event) {
        self.events.lock().unwrap().push(event);
        self.arrived.notify_waiters();
    }
}

/// Socket path inside a fresh temporary directory
pub fn temp_socket() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("vigil.sock");
    (dir, path)
}

pub fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Claude hook event with the given JSON payload
pub fn claude_event(event_type: &str, data: Value) -> Event {
    Event::claude(event_type, payload(data))
}
