//! Error types for mercury-feed.

use thiserror::Error;

/// Feed error types.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Market data service is not running")]
    NotRunning,

    #[error("Unknown token: {0}")]
    UnknownToken(String),

    #[error("Frame decode error: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Ws(#[from] mercury_ws::WsError),

    #[error("Bus error: {0}")]
    Bus(#[from] mercury_bus::BusError),

    #[error("Book error: {0}")]
    Book(#[from] mercury_book::BookError),
}

/// Result type alias for feed operations.
pub type FeedResult<T> = std::result::Result<T, FeedError>;
