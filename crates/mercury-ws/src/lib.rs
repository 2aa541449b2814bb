//! WebSocket client for the market-data transport.
//!
//! Owns the single long-lived socket: automatic reconnection with
//! exponential backoff, heartbeat monitoring (PING/PONG with a
//! missed-pong counter), and a per-token subscription registry that is
//! replayed after every reconnect.

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod subscription;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, WsHandle};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatMonitor;
pub use subscription::{SubscriptionManager, SubscriptionState};
