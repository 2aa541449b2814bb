//! Core domain types for the mercury binary-market arbitrage system.
//!
//! This crate provides the fundamental types used throughout the system:
//! - `Price`, `Size`: precision-safe numeric types for probability prices
//!   (0.0000-1.0000) and share quantities
//! - `ConditionId`, `TokenId`, `Outcome`: binary-market identifiers
//! - `TradingSignal`: immutable strategy output
//! - `Order`, `Fill`, `DualLegOrderResult`: execution types
//! - `Position`: a held YES/NO pair awaiting resolution
//! - Typed event payloads published on the event bus

pub mod decimal;
pub mod error;
pub mod events;
pub mod market;
pub mod order;
pub mod position;
pub mod signal;

pub use decimal::{round_usd, Price, Size};
pub use error::{CoreError, Result};
pub use market::{ConditionId, Market, MarketResolution, Outcome, TokenId};
pub use order::{
    DualLegOrderResult, ExecutionStatus, Fill, Order, OrderSide, OrderStatus, TimeInForce,
};
pub use position::{Position, PositionStatus};
pub use signal::{SignalPriority, SignalType, TradingSignal};

pub use events::{
    topics, BusEvent, FreshAlertEvent, OrderBookSnapshotEvent, SettlementClaimedEvent,
    SettlementFailedEvent, SettlementQueuedEvent, StaleAlertEvent, TradeEvent,
};
