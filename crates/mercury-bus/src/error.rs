//! Error types for mercury-bus.

use thiserror::Error;

/// Bus error types.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Invalid topic pattern: {0}")]
    InvalidPattern(String),

    #[error("External broker required but disconnected")]
    Disconnected,

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for bus operations.
pub type BusResult<T> = std::result::Result<T, BusError>;
