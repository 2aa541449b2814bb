//! Typed event payloads published on the event bus.
//!
//! Event channel naming convention:
//! - `market.orderbook.<market_id>` - order book snapshots
//! - `market.trade.<market_id>` - trade prints
//! - `market.stale.<market_id>` / `market.fresh.<market_id>` - staleness
//! - `signal.<strategy_name>` - strategy signals
//! - `risk.approved.<signal_id>` / `risk.rejected.<signal_id>`
//! - `order.filled`, `position.opened`, `execution.failed`
//! - `settlement.queued` / `settlement.claimed` / `settlement.failed` /
//!   `settlement.alert`
//! - `system.strategy.enable` / `system.strategy.disable`,
//!   `strategy.state_changed`
//!
//! Payloads are canonical JSON maps with primitive values only; every
//! money field is serialized as a fixed-point string so subscribers never
//! see binary floating point.

use crate::{ConditionId, Outcome, Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic builders, kept in one place so publishers and subscribers can
/// never drift apart on spelling.
pub mod topics {
    use crate::ConditionId;

    pub const ORDER_FILLED: &str = "order.filled";
    pub const POSITION_OPENED: &str = "position.opened";
    pub const EXECUTION_FAILED: &str = "execution.failed";
    pub const EXECUTION_SKIPPED: &str = "execution.skipped";
    pub const EXECUTION_PARTIAL: &str = "execution.partial_fill";
    pub const SETTLEMENT_QUEUED: &str = "settlement.queued";
    pub const SETTLEMENT_CLAIMED: &str = "settlement.claimed";
    pub const SETTLEMENT_FAILED: &str = "settlement.failed";
    pub const SETTLEMENT_ALERT: &str = "settlement.alert";
    pub const STRATEGY_ENABLE: &str = "system.strategy.enable";
    pub const STRATEGY_DISABLE: &str = "system.strategy.disable";
    pub const STRATEGY_STATE_CHANGED: &str = "strategy.state_changed";

    pub fn market_orderbook(market_id: &ConditionId) -> String {
        format!("market.orderbook.{market_id}")
    }

    pub fn market_trade(market_id: &ConditionId) -> String {
        format!("market.trade.{market_id}")
    }

    pub fn market_stale(market_id: &ConditionId) -> String {
        format!("market.stale.{market_id}")
    }

    pub fn market_fresh(market_id: &ConditionId) -> String {
        format!("market.fresh.{market_id}")
    }

    pub fn signal(strategy_name: &str) -> String {
        format!("signal.{strategy_name}")
    }

    pub fn risk_approved(signal_id: &str) -> String {
        format!("risk.approved.{signal_id}")
    }

    pub fn risk_rejected(signal_id: &str) -> String {
        format!("risk.rejected.{signal_id}")
    }
}

/// Anything that can be published on the bus.
pub trait BusEvent: Serialize {
    fn topic(&self) -> String;

    /// Canonical JSON payload.
    fn payload(&self) -> Value {
        serde_json::to_value(self).expect("event payloads are plain data")
    }
}

/// Order book snapshot, published after every book mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshotEvent {
    pub market_id: ConditionId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub yes_best_bid: Option<Price>,
    #[serde(default)]
    pub yes_best_ask: Option<Price>,
    #[serde(default)]
    pub no_best_bid: Option<Price>,
    #[serde(default)]
    pub no_best_ask: Option<Price>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub combined_ask: Option<Decimal>,
    /// (1 - combined_ask) * 100, present only when both asks exist.
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub arbitrage_spread_cents: Option<Decimal>,
    #[serde(default)]
    pub yes_bid_size: Option<Size>,
    #[serde(default)]
    pub yes_ask_size: Option<Size>,
    #[serde(default)]
    pub no_bid_size: Option<Size>,
    #[serde(default)]
    pub no_ask_size: Option<Size>,
    pub sequence: u64,
}

impl OrderBookSnapshotEvent {
    pub fn has_arbitrage(&self) -> bool {
        self.arbitrage_spread_cents
            .map(|s| s > Decimal::ZERO)
            .unwrap_or(false)
    }
}

impl BusEvent for OrderBookSnapshotEvent {
    fn topic(&self) -> String {
        topics::market_orderbook(&self.market_id)
    }
}

/// A trade print from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub market_id: ConditionId,
    pub token_id: String,
    pub price: Price,
    pub size: Size,
    pub side: String,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent for TradeEvent {
    fn topic(&self) -> String {
        topics::market_trade(&self.market_id)
    }
}

/// Market data went quiet past the staleness threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleAlertEvent {
    pub market_id: ConditionId,
    pub last_update_at: DateTime<Utc>,
    pub stale_for_seconds: i64,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent for StaleAlertEvent {
    fn topic(&self) -> String {
        topics::market_stale(&self.market_id)
    }
}

/// A previously stale market received data again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshAlertEvent {
    pub market_id: ConditionId,
    pub stale_for_seconds: i64,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent for FreshAlertEvent {
    fn topic(&self) -> String {
        topics::market_fresh(&self.market_id)
    }
}

/// A position entered the settlement queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementQueuedEvent {
    pub position_id: String,
    pub market_id: ConditionId,
    pub condition_id: ConditionId,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent for SettlementQueuedEvent {
    fn topic(&self) -> String {
        topics::SETTLEMENT_QUEUED.to_string()
    }
}

/// A position was claimed and its P&L realized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementClaimedEvent {
    pub position_id: String,
    pub market_id: ConditionId,
    pub condition_id: ConditionId,
    pub resolution: Outcome,
    #[serde(with = "rust_decimal::serde::str")]
    pub proceeds: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub profit: Decimal,
    /// Side(s) the position held; "YES", "NO" or "BOTH".
    pub side: String,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub gas_used: Option<u64>,
    pub dry_run: bool,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent for SettlementClaimedEvent {
    fn topic(&self) -> String {
        topics::SETTLEMENT_CLAIMED.to_string()
    }
}

/// A claim attempt failed; `is_permanent` means the entry was abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementFailedEvent {
    pub position_id: String,
    pub condition_id: ConditionId,
    pub attempts: u32,
    pub error: String,
    pub is_permanent: bool,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent for SettlementFailedEvent {
    fn topic(&self) -> String {
        topics::SETTLEMENT_FAILED.to_string()
    }
}
