//! Error types for mercury-book.

use thiserror::Error;

/// Book error types.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("Invalid price {price}: must be within [0, 1]")]
    InvalidPrice { price: String },

    #[error("Insufficient liquidity: {available} of {requested} shares available")]
    InsufficientLiquidity {
        requested: String,
        available: String,
    },
}

/// Result type alias for book operations.
pub type BookResult<T> = std::result::Result<T, BookError>;
