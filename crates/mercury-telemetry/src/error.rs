//! Error types for mercury-telemetry.

use thiserror::Error;

/// Telemetry error types.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Logging init error: {0}")]
    LoggingInit(String),

    #[error("Metrics encoding error: {0}")]
    Encoding(#[from] prometheus::Error),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Bus error: {0}")]
    Bus(#[from] mercury_bus::BusError),
}

/// Result type alias for telemetry operations.
pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;
