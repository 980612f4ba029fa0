//! Unix socket server feeding decoded events to a handler
//!
//! One task per connection. Stopping the server lets every connection
//! finish the frame it is currently reading, bounded by a drain timeout,
//! then closes the listener and removes the socket path.

use super::protocol::{decode_event, frame_codec, ACK, NACK};
use crate::error::{Result, VigilError};
use crate::events::Event;
use crate::queue::EventQueue;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Default bound on finishing a partial frame once stop is requested
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives every decoded event; may be invoked from many connections at once
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event);
}

/// The daemon's handler: enqueue, routing severe system events to the priority lane
#[async_trait]
impl EventHandler for EventQueue {
    async fn handle(&self, event: Event) {
        let priority = event.priority_hint();
        let event_type = event.event_type.clone();
        if !self.put(event, priority).await {
            warn!("Event queue rejected '{}' event", event_type);
        }
    }
}

/// Running IPC server
pub struct IpcServer {
    socket_path: PathBuf,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl IpcServer {
    /// Bind `socket_path` and start accepting connections
    ///
    /// A stale socket file left by a previous run is removed first.
    pub async fn bind(
        socket_path: impl Into<PathBuf>,
        max_frame_bytes: usize,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        Self::bind_with_drain_timeout(socket_path, max_frame_bytes, handler, DEFAULT_DRAIN_TIMEOUT)
            .await
    }

    /// [`bind`](Self::bind) with an explicit bound on finishing partial
    /// frames during [`stop`](Self::stop)
    pub async fn bind_with_drain_timeout(
        socket_path: impl Into<PathBuf>,
        max_frame_bytes: usize,
        handler: Arc<dyn EventHandler>,
        drain_timeout: Duration,
    ) -> Result<Self> {
        let socket_path = socket_path.into();

        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Remove existing socket if present
        if socket_path.exists() {
            tokio::fs::remove_file(&socket_path).await.map_err(|e| {
                VigilError::Transport(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        info!("Starting IPC server on {}", socket_path.display());
        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| VigilError::Transport(format!("Failed to bind IPC socket: {}", e)))?;

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            handler,
            max_frame_bytes,
            drain_timeout,
            cancel.clone(),
        ));

        Ok(Self {
            socket_path,
            cancel,
            accept_task,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting, drain in-flight frames, close the listener, remove the socket file
    pub async fn stop(self) -> Result<()> {
        info!("Stopping IPC server on {}", self.socket_path.display());
        self.cancel.cancel();

        if let Err(e) = self.accept_task.await {
            error!("IPC accept task ended abnormally: {}", e);
        }

        match tokio::fs::remove_file(&self.socket_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VigilError::Io(e)),
        }
    }
}

async fn accept_loop(
    listener: UnixListener,
    handler: Arc<dyn EventHandler>,
    max_frame_bytes: usize,
    drain_timeout: Duration,
    cancel: CancellationToken,
) {
    let connections = TaskTracker::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    connections.spawn(serve_connection(
                        stream,
                        handler.clone(),
                        max_frame_bytes,
                        drain_timeout,
                        cancel.clone(),
                    ));
                }
                Err(e) => {
                    error!("Failed to accept IPC connection: {}", e);
                }
            }
        }
    }

    connections.close();
    connections.wait().await;
    debug!("All IPC connections finished, closing listener");
    drop(listener);
}

async fn serve_connection(
    stream: UnixStream,
    handler: Arc<dyn EventHandler>,
    max_frame_bytes: usize,
    drain_timeout: Duration,
    cancel: CancellationToken,
) {
    let (reader, mut writer) = stream.into_split();
    let mut frames = FramedRead::new(reader, frame_codec(max_frame_bytes));

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if frames.read_buffer().is_empty() {
                    break;
                }
                // A frame is partially read: finish it before leaving
                match tokio::time::timeout(drain_timeout, frames.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("Abandoning IPC connection stalled mid-frame during shutdown");
                        break;
                    }
                }
            }
            next = frames.next() => next,
        };

        let body = match next {
            None => break, // connection closed
            Some(Ok(body)) => body,
            Some(Err(e)) => {
                warn!("Dropping IPC connection after framing error: {}", e);
                break;
            }
        };

        let reply = match decode_event(&body) {
            Ok(event) => {
                debug!("Received '{}' event over IPC", event.event_type);
                handler.handle(event).await;
                ACK
            }
            Err(e) => {
                warn!("Invalid IPC frame received: {}", e);
                NACK
            }
        };

        if let Err(e) = writer.write_all(&[reply]).await {
            error!("Failed to write IPC acknowledgement: {}", e);
            break;
        }
    }
}
