//! Socket transport end-to-end tests
//!
//! A real `IpcServer` on a temporary Unix socket, driven by `IpcClient` and
//! by raw streams where the test needs to control the bytes on the wire.

mod common;

use common::{claude_event, temp_socket, RecordingHandler};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use vigil_core::events::Severity;
use vigil_core::ipc::{encode_frame, ACK};
use vigil_core::{Event, EventKind, EventQueue, IpcClient, IpcServer, OverflowPolicy};

const MAX_FRAME: usize = 10 * 1024 * 1024;

#[tokio::test]
async fn test_client_event_reaches_handler() {
    let (_dir, path) = temp_socket();
    let handler = RecordingHandler::new();
    let server = IpcServer::bind(&path, MAX_FRAME, handler.clone()).await.unwrap();

    let client = IpcClient::new(&path);
    let sent = client
        .send(&claude_event(
            "post_tool_use",
            json!({"tool": "Edit", "file_path": "src/lib.rs"}),
        ))
        .await;
    assert!(sent);

    let events = handler.wait_for(1, Duration::from_secs(2)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "post_tool_use");
    assert_eq!(events[0].kind, EventKind::Claude);
    assert_eq!(events[0].data["tool"], "Edit");

    server.stop().await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_send_without_server_fails_softly() {
    let (_dir, path) = temp_socket();
    let client = IpcClient::new(&path);
    assert!(!client.send(&claude_event("stop", json!({}))).await);
}

#[tokio::test]
async fn test_send_after_stop_fails_softly() {
    let (_dir, path) = temp_socket();
    let server = IpcServer::bind(&path, MAX_FRAME, RecordingHandler::new()).await.unwrap();
    server.stop().await.unwrap();

    let client = IpcClient::new(&path);
    assert!(!client.send(&claude_event("stop", json!({}))).await);
}

#[tokio::test]
async fn test_concurrent_clients() {
    let (_dir, path) = temp_socket();
    let handler = RecordingHandler::new();
    let server = IpcServer::bind(&path, MAX_FRAME, handler.clone()).await.unwrap();

    let mut sends = Vec::new();
    for i in 0..20 {
        let client = IpcClient::new(&path);
        sends.push(tokio::spawn(async move {
            client
                .send(&claude_event("pre_tool_use", json!({"tool": "Read", "n": i})))
                .await
        }));
    }
    for send in sends {
        assert!(send.await.unwrap());
    }

    let events = handler.wait_for(20, Duration::from_secs(2)).await;
    assert_eq!(events.len(), 20);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_each_frame_acknowledged_in_order() {
    let (_dir, path) = temp_socket();
    let handler = RecordingHandler::new();
    let server = IpcServer::bind(&path, MAX_FRAME, handler.clone()).await.unwrap();

    let mut stream = UnixStream::connect(&path).await.unwrap();
    for n in 0..3 {
        let frame = encode_frame(&claude_event("pre_tool_use", json!({"n": n}))).unwrap();
        stream.write_all(&frame).await.unwrap();

        let mut reply = [0xFFu8; 1];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], ACK);
    }
    drop(stream);

    let events = handler.wait_for(3, Duration::from_secs(2)).await;
    let order: Vec<i64> = events.iter().map(|e| e.data["n"].as_i64().unwrap()).collect();
    assert_eq!(order, vec![0, 1, 2]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_system_events_take_priority_lane() {
    let (_dir, path) = temp_socket();
    let queue = Arc::new(EventQueue::new(10, OverflowPolicy::DropOldest));
    let server = IpcServer::bind(&path, MAX_FRAME, queue.clone()).await.unwrap();

    let client = IpcClient::new(&path);
    assert!(client.send(&claude_event("pre_tool_use", json!({"tool": "Read"}))).await);
    let alarm = Event::system("store", Severity::Critical, "persistence_failed", Default::default());
    assert!(client.send(&alarm).await);

    let first = queue.get(Duration::from_secs(1)).await.unwrap();
    assert_eq!(first.event_type, "persistence_failed");
    let second = queue.get(Duration::from_secs(1)).await.unwrap();
    assert_eq!(second.event_type, "pre_tool_use");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_block_policy_applies_backpressure() {
    let (_dir, path) = temp_socket();
    let queue = Arc::new(EventQueue::new(1, OverflowPolicy::Block));
    let server = IpcServer::bind(&path, MAX_FRAME, queue.clone()).await.unwrap();

    let client = IpcClient::new(&path).with_timeout(Duration::from_millis(300));
    assert!(client.send(&claude_event("first", json!({}))).await);

    // The handler suspends on the full queue, so no ack arrives in time
    let blocked = IpcClient::new(&path).with_timeout(Duration::from_secs(3));
    let pending = tokio::spawn(async move { blocked.send(&claude_event("second", json!({}))).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished());

    assert_eq!(queue.get(Duration::from_secs(1)).await.unwrap().event_type, "first");
    assert!(pending.await.unwrap());
    assert_eq!(queue.get(Duration::from_secs(1)).await.unwrap().event_type, "second");

    server.stop().await.unwrap();
}
