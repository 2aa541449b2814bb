//! Error types for mercury-executor.

use thiserror::Error;

/// Executor error types.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("No order book for market {0}")]
    NoOrderBook(String),

    #[error("Malformed approval payload: {0}")]
    BadApproval(String),

    #[error("Store error: {0}")]
    Store(#[from] mercury_store::StoreError),

    #[error("Bus error: {0}")]
    Bus(#[from] mercury_bus::BusError),
}

/// Result type alias for executor operations.
pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;
