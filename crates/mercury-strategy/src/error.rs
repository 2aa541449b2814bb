//! Error types for mercury-strategy.

use thiserror::Error;

/// Strategy error types.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Strategy already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Bus error: {0}")]
    Bus(#[from] mercury_bus::BusError),
}

/// Result type alias for strategy operations.
pub type StrategyResult<T> = std::result::Result<T, StrategyError>;
