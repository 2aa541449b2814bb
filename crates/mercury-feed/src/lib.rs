//! Market-data service.
//!
//! Consumes raw frames from the WebSocket transport, maintains the
//! per-market order books, publishes `market.orderbook.<market_id>`
//! snapshots after every mutation, and raises `market.stale` /
//! `market.fresh` alerts from the staleness monitor.

pub mod error;
pub mod frame;
pub mod service;

pub use error::{FeedError, FeedResult};
pub use frame::{decode_frames, BookFrame, BookSide};
pub use service::{MarketDataService, MarketDataServiceConfig};
