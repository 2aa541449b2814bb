//! Positions: held YES/NO share pairs awaiting market resolution.

use crate::{ConditionId, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Position lifecycle.
///
/// OPEN -> CLAIMED (settlement succeeded) is the happy path. Once a
/// position is CLAIMED or SETTLED it is immutable. ABANDONED marks
/// positions whose claim failed permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Claimed,
    Settled,
    Abandoned,
}

impl PositionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Claimed => "CLAIMED",
            Self::Settled => "SETTLED",
            Self::Abandoned => "ABANDONED",
        };
        write!(f, "{s}")
    }
}

/// A held position in one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub market_id: ConditionId,
    pub trade_id: String,
    pub yes_shares: Size,
    pub no_shares: Size,
    /// Total USD paid to open.
    #[serde(with = "rust_decimal::serde::str")]
    pub cost_basis: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settlement_proceeds: Option<Decimal>,
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
}

impl Position {
    pub fn open(
        market_id: ConditionId,
        trade_id: impl Into<String>,
        yes_shares: Size,
        no_shares: Size,
        cost_basis: Decimal,
    ) -> Self {
        Self {
            position_id: Uuid::new_v4().to_string(),
            market_id,
            trade_id: trade_id.into(),
            yes_shares,
            no_shares,
            cost_basis,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            settlement_proceeds: None,
            realized_pnl: None,
        }
    }

    /// min(yes, no) / max(yes, no); zero for a one-sided hold.
    pub fn hedge_ratio(&self) -> Decimal {
        let max = self.yes_shares.max(self.no_shares);
        if max.is_zero() {
            return Decimal::ZERO;
        }
        self.yes_shares.min(self.no_shares).inner() / max.inner()
    }

    pub fn is_hedged(&self) -> bool {
        self.yes_shares.is_positive() && self.no_shares.is_positive()
    }

    /// Transition to CLAIMED, fixing proceeds and realized P&L.
    ///
    /// Callers must not touch a terminal position; the settlement manager
    /// checks status before claiming.
    pub fn mark_claimed(&mut self, proceeds: Decimal, now: DateTime<Utc>) {
        debug_assert!(proceeds >= Decimal::ZERO);
        self.status = PositionStatus::Claimed;
        self.closed_at = Some(now);
        self.settlement_proceeds = Some(proceeds);
        self.realized_pnl = Some(proceeds - self.cost_basis);
    }

    pub fn mark_abandoned(&mut self, now: DateTime<Utc>) {
        self.status = PositionStatus::Abandoned;
        self.closed_at = Some(now);
    }
}
