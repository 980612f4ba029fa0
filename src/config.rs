//! Configuration for the Vigil daemon and hook client
//!
//! Values are layered from (lowest to highest precedence):
//! 1. Built-in defaults
//! 2. Optional TOML file (`--config`)
//! 3. Environment variables, e.g. `VIGIL__QUEUE__CAPACITY=500`

use crate::error::{Result, VigilError};
use crate::queue::OverflowPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level configuration, created once in `main` and passed down
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub queue: QueueConfig,
    pub transport: TransportConfig,
    pub intent: IntentConfig,
    pub learning: LearningConfig,
    pub clustering: ClusteringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of buffered events across both lanes
    pub capacity: usize,

    /// What to do when the queue is full
    pub overflow_policy: OverflowPolicy,

    /// How long the consumer waits on an empty queue before doing housekeeping
    #[serde(with = "serde_duration")]
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            overflow_policy: OverflowPolicy::DropOldest,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Filesystem path of the Unix socket
    pub socket_path: PathBuf,

    /// Frames larger than this close the connection
    pub max_frame_bytes: usize,

    /// Per-operation timeout used by the hook client
    #[serde(with = "serde_duration")]
    pub client_timeout: Duration,

    /// On stop, how long a connection may take to finish a partial frame
    #[serde(with = "serde_duration")]
    pub drain_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let runtime_dir = dirs::runtime_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            socket_path: runtime_dir.join("vigil").join("vigil.sock"),
            max_frame_bytes: 10 * 1024 * 1024, // 10MB
            client_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    /// Number of recent events kept for classification
    pub history_size: usize,

    /// Only events this recent participate in scoring
    #[serde(with = "serde_duration")]
    pub time_window: Duration,

    /// Number of past detections kept
    pub intent_history_size: usize,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            history_size: 50,
            time_window: Duration::from_secs(300),
            intent_history_size: 100,
        }
    }
}

/// Weights for multi-factor pattern scoring (must sum to 1.0)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightsConfig {
    pub frequency: f64,
    pub recency: f64,
    pub consistency: f64,
    pub context_match: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            frequency: 0.3,
            recency: 0.2,
            consistency: 0.3,
            context_match: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Directory holding `patterns.json` and `adaptations.json`
    pub data_dir: PathBuf,

    /// Confidence assigned to a freshly created pattern
    pub initial_confidence: f64,

    /// Patterns below this are evicted on load and never persisted
    pub min_confidence: f64,

    /// Per-rule cap; lowest (confidence, frequency) evicted first
    pub max_patterns_per_rule: usize,

    /// Days of inactivity before decay starts
    pub decay_grace_days: f64,

    /// Exponential decay rate per inactive day past the grace period
    pub decay_rate_per_day: f64,

    /// Minimum pattern score before an adaptation is proposed
    pub adaptation_threshold: f64,

    /// How often the consumer flushes learned state to disk
    #[serde(with = "serde_duration")]
    pub persist_interval: Duration,

    pub weights: WeightsConfig,
}

impl Default for LearningConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vigil");

        Self {
            data_dir,
            initial_confidence: 0.6,
            min_confidence: 0.1,
            max_patterns_per_rule: 50,
            decay_grace_days: 7.0,
            decay_rate_per_day: 0.05,
            adaptation_threshold: 0.6,
            persist_interval: Duration::from_secs(30),
            weights: WeightsConfig::default(),
        }
    }
}

impl LearningConfig {
    pub fn patterns_path(&self) -> PathBuf {
        self.data_dir.join("patterns.json")
    }

    pub fn adaptations_path(&self) -> PathBuf {
        self.data_dir.join("adaptations.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub min_cluster_size: usize,

    /// Similarity needed to join a seed during batch clustering
    pub similarity_threshold: f64,

    /// Similarity needed to join an existing cluster incrementally
    pub assignment_threshold: f64,

    /// Re-cluster once this many records have been parked since the last pass
    pub recluster_batch: usize,

    /// Parked pool bound; the oldest record is dropped beyond it
    pub max_pending: usize,

    /// Parked records older than this are discarded at the next pass
    pub pending_max_age_days: i64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            similarity_threshold: 0.7,
            assignment_threshold: 0.6,
            recluster_batch: 10,
            max_pending: 500,
            pending_max_age_days: 30,
        }
    }
}

impl VigilConfig {
    /// Load configuration from an optional file plus `VIGIL__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("VIGIL")
                .separator("__")
                .try_parsing(true),
        );

        let config: VigilConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: VigilConfig = toml::from_str(toml_str)
            .map_err(|e| VigilError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            return Err(VigilError::InvalidConfig(
                "queue.capacity must be greater than 0".to_string(),
            ));
        }

        if self.transport.max_frame_bytes == 0 {
            return Err(VigilError::InvalidConfig(
                "transport.max_frame_bytes must be greater than 0".to_string(),
            ));
        }

        if self.intent.history_size == 0 || self.intent.intent_history_size == 0 {
            return Err(VigilError::InvalidConfig(
                "intent history sizes must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("learning.initial_confidence", self.learning.initial_confidence),
            ("learning.min_confidence", self.learning.min_confidence),
            ("learning.adaptation_threshold", self.learning.adaptation_threshold),
            ("clustering.similarity_threshold", self.clustering.similarity_threshold),
            ("clustering.assignment_threshold", self.clustering.assignment_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(VigilError::InvalidConfig(format!(
                    "{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }

        if self.learning.min_confidence >= self.learning.initial_confidence {
            return Err(VigilError::InvalidConfig(
                "learning.min_confidence must be below learning.initial_confidence".to_string(),
            ));
        }

        if self.learning.max_patterns_per_rule == 0 {
            return Err(VigilError::InvalidConfig(
                "learning.max_patterns_per_rule must be greater than 0".to_string(),
            ));
        }

        if self.clustering.min_cluster_size < 2 {
            return Err(VigilError::InvalidConfig(
                "clustering.min_cluster_size must be at least 2".to_string(),
            ));
        }

        if self.clustering.max_pending < self.clustering.min_cluster_size {
            return Err(VigilError::InvalidConfig(
                "clustering.max_pending must be at least clustering.min_cluster_size".to_string(),
            ));
        }

        Ok(())
    }
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
