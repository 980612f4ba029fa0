//! Hook-side client: one connection, one frame, one acknowledgement byte

use super::protocol::{encode_frame, ACK};
use crate::events::Event;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

/// Why a single delivery attempt failed
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket not found: {0}")]
    SocketMissing(PathBuf),

    #[error("Failed to connect to IPC socket: {0}")]
    Connect(std::io::Error),

    #[error("IPC I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to encode event: {0}")]
    Encode(String),

    #[error("Server rejected frame (reply byte {0:#04x})")]
    Rejected(u8),
}

/// Client for the daemon's event socket
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(2),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Deliver one event; `true` iff the server acknowledged with `0x00`
    ///
    /// Never returns an error: failures are logged and reported as `false`.
    /// Retrying is up to the caller.
    pub async fn send(&self, event: &Event) -> bool {
        match self.send_detailed(event).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Event delivery failed: {}", e);
                false
            }
        }
    }

    /// Deliver one event, reporting the failure reason
    pub async fn send_detailed(&self, event: &Event) -> Result<(), TransportError> {
        if !self.socket_path.exists() {
            return Err(TransportError::SocketMissing(self.socket_path.clone()));
        }

        let frame = encode_frame(event).map_err(|e| TransportError::Encode(e.to_string()))?;

        let mut stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(TransportError::Connect)?;

        let exchange = async {
            stream.write_all(&frame).await?;
            stream.flush().await?;

            let mut reply = [0u8; 1];
            stream.read_exact(&mut reply).await?;
            Ok::<u8, std::io::Error>(reply[0])
        };

        let reply = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;

        if reply == ACK {
            Ok(())
        } else {
            Err(TransportError::Rejected(reply))
        }
    }
}
