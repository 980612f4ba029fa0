//! Vigil - Intent Detection and Override Learning Core
//!
//! Observes a coding assistant's activity through editor hooks, infers what
//! the developer is doing, and learns when rule overrides are legitimate:
//! - Bounded two-lane event queue with overflow policies
//! - Length-prefixed JSON transport over a Unix socket
//! - Sliding-window intent classification with hysteresis
//! - Learned override patterns with reinforcement, decay and clustering
//!
//! # Architecture
//!
//! ```text
//! hook process --IpcClient--> IpcServer --EventHandler--> EventQueue
//!                                                            |
//!                                          service::run (single consumer)
//!                                           |-- IntentDetector
//!                                           |-- LearnedPatternStore
//!                                           |-- ExceptionClusterer
//!                                           `-- AdaptationEngine
//! ```
//!
//! # Example
//!
//! ```ignore
//! use vigil_core::{EventQueue, IpcServer, OverflowPolicy, VigilConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> vigil_core::Result<()> {
//!     let config = VigilConfig::load(None)?;
//!     let queue = Arc::new(EventQueue::new(config.queue.capacity, config.queue.overflow_policy));
//!     let server = IpcServer::bind(
//!         &config.transport.socket_path,
//!         config.transport.max_frame_bytes,
//!         queue.clone(),
//!     )
//!     .await?;
//!
//!     // ... consume with vigil_core::service::run
//!     server.stop().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod intent;
pub mod ipc;
pub mod learning;
pub mod queue;
pub mod service;

// Re-export commonly used types
pub use config::VigilConfig;
pub use error::{Result, VigilError};
pub use events::{Event, EventKind, Severity};
pub use intent::{Intent, IntentDetector, IntentType};
pub use ipc::{EventHandler, IpcClient, IpcServer};
pub use learning::{
    AdaptationDecision, AdaptationEngine, ConfidenceFactors, ConfidenceScorer, EnforcementLevel,
    ExceptionCluster, ExceptionClusterer, LearnedPattern, LearnedPatternStore,
};
pub use queue::{EventQueue, OverflowPolicy, QueueMetrics};
pub use service::EventPipeline;
