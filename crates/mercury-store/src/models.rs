//! Row types for the state store.

use chrono::{DateTime, NaiveDate, Utc};
use mercury_core::{ConditionId, ExecutionStatus, Position, Size, TokenId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dual-leg trade as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub market_id: ConditionId,
    pub strategy: String,
    pub side: String,
    pub yes_token_id: TokenId,
    pub no_token_id: TokenId,
    pub yes_size: Size,
    pub no_size: Size,
    #[serde(with = "rust_decimal::serde::str")]
    pub yes_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub no_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_cost: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub guaranteed_pnl: Decimal,
    pub status: String,
    pub execution_status: ExecutionStatus,
    pub pre_fill_yes_depth: Size,
    pub pre_fill_no_depth: Size,
    pub dry_run: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Settlement-queue entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SettlementStatus {
    Pending,
    Claimed,
    Abandoned,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Claimed => "CLAIMED",
            Self::Abandoned => "ABANDONED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SettlementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CLAIMED" => Ok(Self::Claimed),
            "ABANDONED" => Ok(Self::Abandoned),
            other => Err(format!("unknown settlement status: {other}")),
        }
    }
}

/// A settlement-queue entry joined with its position, ready to claim.
#[derive(Debug, Clone)]
pub struct ClaimableEntry {
    pub queue_id: i64,
    pub condition_id: ConditionId,
    pub attempts: u32,
    pub position: Position,
}

/// Ledger entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PnlType {
    Resolution,
    Settlement,
    Rebalance,
    HistoricalImport,
}

impl fmt::Display for PnlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Resolution => "resolution",
            Self::Settlement => "settlement",
            Self::Rebalance => "rebalance",
            Self::HistoricalImport => "historical_import",
        };
        write!(f, "{s}")
    }
}

/// One row of the append-only realized-P&L ledger.
/// `(trade_id, pnl_type)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealizedPnlEntry {
    pub trade_id: String,
    pub trade_date: NaiveDate,
    #[serde(with = "rust_decimal::serde::str")]
    pub pnl_amount: Decimal,
    pub pnl_type: PnlType,
    pub notes: Option<String>,
}

/// Per-day aggregates, upserted as events land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_trades: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_volume: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub realized_pnl: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub unrealized_pnl: Decimal,
    pub positions_opened: u32,
    pub positions_closed: u32,
}

impl DailyStats {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total_trades: 0,
            total_volume: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            positions_opened: 0,
            positions_closed: 0,
        }
    }
}

/// The persisted circuit-breaker singleton; survives restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerRow {
    pub date: NaiveDate,
    #[serde(with = "rust_decimal::serde::str")]
    pub realized_pnl: Decimal,
    pub circuit_breaker_hit: bool,
    pub hit_at: Option<DateTime<Utc>>,
    pub hit_reason: Option<String>,
    pub total_trades_today: u32,
    pub updated_at: DateTime<Utc>,
}
