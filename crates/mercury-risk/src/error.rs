//! Error types for mercury-risk.

use thiserror::Error;

/// Risk error types.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Bus error: {0}")]
    Bus(#[from] mercury_bus::BusError),
}

/// Result type alias for risk operations.
pub type RiskResult<T> = std::result::Result<T, RiskError>;
