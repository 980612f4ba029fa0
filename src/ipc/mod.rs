//! Local IPC transport between hook processes and the Vigil daemon
//!
//! Wire format per message:
//!
//! ```text
//! [4-byte big-endian length][UTF-8 JSON body]
//! ```
//!
//! The server answers every frame with exactly one byte (`0x00` = accepted)
//! before reading the next frame on the same connection. The client opens
//! one connection per send and makes exactly one attempt.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{IpcClient, TransportError};
pub use protocol::{decode_event, encode_event, encode_frame, ACK, NACK};
pub use server::{EventHandler, IpcServer};
