//! Error types for mercury-ws.

use thiserror::Error;

/// WebSocket error types.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed by server: code={code} reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Heartbeat timeout: {missed_pongs} missed pongs")]
    HeartbeatTimeout { missed_pongs: u32 },

    #[error("No message received for {silent_for_seconds}s")]
    StaleConnection { silent_for_seconds: i64 },

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for WebSocket operations.
pub type WsResult<T> = std::result::Result<T, WsError>;
