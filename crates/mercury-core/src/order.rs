//! Order and fill types for dual-leg execution.

use crate::{ConditionId, Outcome, Price, Size, TokenId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Time-in-force. Dual-leg arbitrage always uses FOK so a leg either
/// fills completely and immediately or rejects without resting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    #[default]
    Fok,
    Ioc,
    Gtc,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fok => write!(f, "FOK"),
            Self::Ioc => write!(f, "IOC"),
            Self::Gtc => write!(f, "GTC"),
        }
    }
}

/// Transport-reported order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Resting on the book (only possible for non-FOK orders).
    Live,
    /// Fully matched by the matching engine.
    Matched,
    /// Matched and settled.
    Filled,
    Cancelled,
    Expired,
    Rejected,
    Failed,
}

impl OrderStatus {
    /// A leg counts as filled when the matching engine matched it.
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched | Self::Filled)
    }

    /// Terminal non-fill outcomes. `Live` is neither matched nor a
    /// rejection; a live counterpart leg gets cancelled, never sold.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired | Self::Rejected | Self::Failed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Live => "LIVE",
            Self::Matched => "MATCHED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
            Self::Rejected => "REJECTED",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

/// Classification of a dual-leg execution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    FullFill,
    PartialFill,
    NoFill,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FullFill => "full_fill",
            Self::PartialFill => "partial_fill",
            Self::NoFill => "no_fill",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_fill" => Ok(Self::FullFill),
            "partial_fill" => Ok(Self::PartialFill),
            "no_fill" => Ok(Self::NoFill),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One leg as reported by the trading transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub token_id: TokenId,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub requested_price: Price,
    pub requested_size: Size,
    pub filled_size: Size,
    /// Total USD paid (or received) for the filled portion.
    #[serde(with = "rust_decimal::serde::str")]
    pub filled_cost: Decimal,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn fill_ratio(&self) -> Decimal {
        if self.requested_size.is_zero() {
            return Decimal::ZERO;
        }
        self.filled_size.inner() / self.requested_size.inner()
    }

    /// Volume-weighted fill price, if anything filled.
    pub fn average_fill_price(&self) -> Option<Price> {
        if self.filled_size.is_zero() {
            return None;
        }
        Some(Price::new(self.filled_cost / self.filled_size.inner()))
    }

    pub fn latency_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|t| (t - self.submitted_at).num_milliseconds())
    }
}

/// A recorded fill, the unit the risk manager and store account in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub market_id: ConditionId,
    pub token_id: TokenId,
    pub outcome: Outcome,
    pub side: OrderSide,
    pub requested_size: Size,
    pub filled_size: Size,
    pub requested_price: Price,
    pub filled_price: Price,
    /// USD cost of this fill.
    #[serde(with = "rust_decimal::serde::str")]
    pub cost: Decimal,
    /// filled_price - requested_price, in cents. Positive means we paid up.
    #[serde(with = "rust_decimal::serde::str")]
    pub slippage_cents: Decimal,
    #[serde(default)]
    pub latency_ms: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    pub fn from_order(order: &Order, market_id: ConditionId, outcome: Outcome) -> Self {
        let filled_price = order
            .average_fill_price()
            .unwrap_or(order.requested_price);
        let slippage_cents =
            (filled_price.inner() - order.requested_price.inner()) * Decimal::from(100);
        Self {
            order_id: order.order_id.clone(),
            market_id,
            token_id: order.token_id.clone(),
            outcome,
            side: order.side,
            requested_size: order.requested_size,
            filled_size: order.filled_size,
            requested_price: order.requested_price,
            filled_price,
            cost: order.filled_cost,
            slippage_cents,
            latency_ms: order.latency_ms(),
            timestamp: order.completed_at.unwrap_or(order.submitted_at),
        }
    }
}

/// Result of an atomic dual-leg placement (YES + NO).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualLegOrderResult {
    pub market_id: ConditionId,
    pub yes_order: Order,
    pub no_order: Order,
    /// Top-of-book depth observed immediately before placement, kept for
    /// telemetry even when the precheck aborts the trade.
    pub pre_fill_yes_depth: Size,
    pub pre_fill_no_depth: Size,
}

impl DualLegOrderResult {
    pub fn both_filled(&self) -> bool {
        self.yes_order.status.is_matched() && self.no_order.status.is_matched()
    }

    pub fn has_partial_fill(&self) -> bool {
        self.yes_order.status.is_matched() != self.no_order.status.is_matched()
    }

    pub fn no_fill(&self) -> bool {
        !self.yes_order.status.is_matched() && !self.no_order.status.is_matched()
    }

    pub fn total_cost(&self) -> Decimal {
        let mut cost = Decimal::ZERO;
        if self.yes_order.status.is_matched() {
            cost += self.yes_order.filled_cost;
        }
        if self.no_order.status.is_matched() {
            cost += self.no_order.filled_cost;
        }
        cost
    }

    pub fn yes_filled(&self) -> Size {
        if self.yes_order.status.is_matched() {
            self.yes_order.filled_size
        } else {
            Size::ZERO
        }
    }

    pub fn no_filled(&self) -> Size {
        if self.no_order.status.is_matched() {
            self.no_order.filled_size
        } else {
            Size::ZERO
        }
    }

    /// Hedged share pairs pay $1 each at resolution regardless of outcome,
    /// so the hedged payout minus total cost is locked in at fill time.
    pub fn guaranteed_pnl(&self) -> Decimal {
        self.yes_filled().min(self.no_filled()).inner() - self.total_cost()
    }

    /// Shares on the larger side with no opposing hedge.
    pub fn unhedged_shares(&self) -> Size {
        let yes = self.yes_filled();
        let no = self.no_filled();
        yes.max(no) - yes.min(no)
    }

    /// min(yes, no) / max(yes, no); 1 = perfectly hedged, 0 = naked.
    pub fn hedge_ratio(&self) -> Decimal {
        let yes = self.yes_filled();
        let no = self.no_filled();
        let max = yes.max(no);
        if max.is_zero() {
            return Decimal::ZERO;
        }
        yes.min(no).inner() / max.inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(status: OrderStatus, filled: Decimal, cost: Decimal) -> Order {
        Order {
            order_id: "ord-1".into(),
            token_id: TokenId::from("tok"),
            side: OrderSide::Buy,
            status,
            requested_price: Price::new(dec!(0.48)),
            requested_size: Size::new(dec!(10)),
            filled_size: Size::new(filled),
            filled_cost: cost,
            submitted_at: Utc::now(),
            completed_at: None,
        }
    }

    fn dual(yes: Order, no: Order) -> DualLegOrderResult {
        DualLegOrderResult {
            market_id: ConditionId::from("0xcond"),
            yes_order: yes,
            no_order: no,
            pre_fill_yes_depth: Size::new(dec!(100)),
            pre_fill_no_depth: Size::new(dec!(100)),
        }
    }

    #[test]
    fn test_full_fill_guaranteed_pnl() {
        let r = dual(
            order(OrderStatus::Matched, dec!(10), dec!(4.80)),
            order(OrderStatus::Matched, dec!(10), dec!(5.00)),
        );
        assert!(r.both_filled());
        assert!(!r.has_partial_fill());
        // 10 pairs pay $10; cost $9.80.
        assert_eq!(r.guaranteed_pnl(), dec!(0.20));
        assert_eq!(r.hedge_ratio(), dec!(1));
    }

    #[test]
    fn test_partial_fill_detection() {
        let r = dual(
            order(OrderStatus::Matched, dec!(10), dec!(4.80)),
            order(OrderStatus::Rejected, dec!(0), dec!(0)),
        );
        assert!(!r.both_filled());
        assert!(r.has_partial_fill());
        assert_eq!(r.unhedged_shares(), Size::new(dec!(10)));
        assert_eq!(r.hedge_ratio(), dec!(0));
        // No hedged pairs, so the "guarantee" is just the sunk cost.
        assert_eq!(r.guaranteed_pnl(), dec!(-4.80));
    }

    #[test]
    fn test_no_fill() {
        let r = dual(
            order(OrderStatus::Rejected, dec!(0), dec!(0)),
            order(OrderStatus::Failed, dec!(0), dec!(0)),
        );
        assert!(r.no_fill());
        assert_eq!(r.total_cost(), dec!(0));
    }

    #[test]
    fn test_average_fill_price() {
        let o = order(OrderStatus::Matched, dec!(10), dec!(4.85));
        assert_eq!(o.average_fill_price().unwrap().inner(), dec!(0.485));
        assert_eq!(o.fill_ratio(), dec!(1));

        let empty = order(OrderStatus::Rejected, dec!(0), dec!(0));
        assert!(empty.average_fill_price().is_none());
    }

    #[test]
    fn test_status_classification() {
        assert!(OrderStatus::Matched.is_matched());
        assert!(OrderStatus::Filled.is_matched());
        assert!(!OrderStatus::Live.is_matched());
        assert!(!OrderStatus::Live.is_rejection());
        assert!(OrderStatus::Rejected.is_rejection());
        assert!(OrderStatus::Expired.is_rejection());
    }
}
