//! Error types for mercury-settlement.

use thiserror::Error;

/// Settlement error types.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Claim failed: {0}")]
    Claim(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(#[from] mercury_store::StoreError),

    #[error("Bus error: {0}")]
    Bus(#[from] mercury_bus::BusError),
}

/// Result type alias for settlement operations.
pub type SettlementResult<T> = std::result::Result<T, SettlementError>;
