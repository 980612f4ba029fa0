//! Error types for the Vigil learning core
//!
//! This module provides crate-wide error handling using thiserror for
//! structured error definitions and anyhow for error propagation at the
//! binary edge.

use thiserror::Error;

/// Main error type for Vigil operations
#[derive(Error, Debug)]
pub enum VigilError {
    /// Confidence factor weights do not sum to 1.0
    #[error("Invalid confidence weights: {0}")]
    InvalidWeights(String),

    /// Malformed pattern criteria (bad operator, bad regex, ...)
    #[error("Invalid pattern criteria: {0}")]
    InvalidCriteria(String),

    /// Pattern not found
    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    /// Wire protocol violation (oversized frame, missing fields, ...)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Socket level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration value rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Regex compilation error
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;

/// Convert anyhow::Error to VigilError, keeping the context chain
impl From<anyhow::Error> for VigilError {
    fn from(err: anyhow::Error) -> Self {
        VigilError::Other(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VigilError::PatternNotFound("pat-1".to_string());
        assert_eq!(err.to_string(), "Pattern not found: pat-1");
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json");
        assert!(json_err.is_err());

        let vigil_err: VigilError = json_err.unwrap_err().into();
        assert!(matches!(vigil_err, VigilError::Serialization(_)));
    }

    #[test]
    fn test_anyhow_bridge() {
        let err: VigilError = anyhow::anyhow!("boom").into();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_anyhow_context_chain_preserved() {
        use anyhow::Context;

        let io: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "socket gone"));
        let err: VigilError = io.context("failed to listen").unwrap_err().into();

        assert!(matches!(err, VigilError::Other(_)));
        assert_eq!(err.to_string(), "failed to listen: socket gone");
    }
}
