//! Per-market YES/NO order book pair and read-only snapshots.

use crate::book::InMemoryOrderBook;
use crate::levels::PriceLevel;
use chrono::{DateTime, Utc};
use mercury_core::events::OrderBookSnapshotEvent;
use mercury_core::{ConditionId, Price, Size, TokenId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default snapshot depth per side.
pub const DEFAULT_SNAPSHOT_DEPTH: usize = 10;

/// The YES and NO books of one binary market.
#[derive(Debug, Clone)]
pub struct MarketOrderBook {
    market_id: ConditionId,
    yes_book: InMemoryOrderBook,
    no_book: InMemoryOrderBook,
}

impl MarketOrderBook {
    pub fn create(market_id: ConditionId, yes_token_id: TokenId, no_token_id: TokenId) -> Self {
        Self {
            market_id,
            yes_book: InMemoryOrderBook::new(yes_token_id),
            no_book: InMemoryOrderBook::new(no_token_id),
        }
    }

    pub fn market_id(&self) -> &ConditionId {
        &self.market_id
    }

    pub fn yes_book(&self) -> &InMemoryOrderBook {
        &self.yes_book
    }

    pub fn no_book(&self) -> &InMemoryOrderBook {
        &self.no_book
    }

    pub fn yes_book_mut(&mut self) -> &mut InMemoryOrderBook {
        &mut self.yes_book
    }

    pub fn no_book_mut(&mut self) -> &mut InMemoryOrderBook {
        &mut self.no_book
    }

    /// The book holding the given token, if it belongs to this market.
    pub fn book_for_token_mut(&mut self, token_id: &TokenId) -> Option<&mut InMemoryOrderBook> {
        if self.yes_book.token_id() == token_id {
            Some(&mut self.yes_book)
        } else if self.no_book.token_id() == token_id {
            Some(&mut self.no_book)
        } else {
            None
        }
    }

    /// yes_ask + no_ask, present only when both asks exist.
    pub fn combined_ask(&self) -> Option<Decimal> {
        Some(self.yes_book.best_ask()?.inner() + self.no_book.best_ask()?.inner())
    }

    /// 1 - combined_ask; positive means free money.
    pub fn arbitrage_spread(&self) -> Option<Decimal> {
        self.combined_ask().map(|c| Decimal::ONE - c)
    }

    pub fn has_arbitrage(&self) -> bool {
        self.arbitrage_spread()
            .map(|s| s > Decimal::ZERO)
            .unwrap_or(false)
    }

    /// Newest of the two books' update times.
    pub fn last_update(&self) -> DateTime<Utc> {
        self.yes_book.last_update().max(self.no_book.last_update())
    }

    /// Sum of the two per-token sequences; strictly increases with every
    /// mutation on either side.
    pub fn sequence(&self) -> u64 {
        self.yes_book.sequence() + self.no_book.sequence()
    }

    /// Self-contained snapshot with both sides at the given depth.
    pub fn snapshot(&self, depth: usize) -> MarketBookSnapshot {
        MarketBookSnapshot {
            market_id: self.market_id.clone(),
            yes: TokenBookSnapshot::of(&self.yes_book, depth),
            no: TokenBookSnapshot::of(&self.no_book, depth),
            combined_ask: self.combined_ask(),
            arbitrage_spread: self.arbitrage_spread(),
            sequence: self.sequence(),
            timestamp: Utc::now(),
        }
    }

    /// Canonical bus event for `market.orderbook.<market_id>`.
    pub fn snapshot_event(&self) -> OrderBookSnapshotEvent {
        OrderBookSnapshotEvent {
            market_id: self.market_id.clone(),
            timestamp: Utc::now(),
            yes_best_bid: self.yes_book.best_bid(),
            yes_best_ask: self.yes_book.best_ask(),
            no_best_bid: self.no_book.best_bid(),
            no_best_ask: self.no_book.best_ask(),
            combined_ask: self.combined_ask(),
            arbitrage_spread_cents: self.arbitrage_spread().map(|s| s * Decimal::from(100)),
            yes_bid_size: self.yes_book.best_bid_size(),
            yes_ask_size: self.yes_book.best_ask_size(),
            no_bid_size: self.no_book.best_bid_size(),
            no_ask_size: self.no_book.best_ask_size(),
            sequence: self.sequence(),
        }
    }
}

/// One level of a snapshot ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub price: Price,
    pub size: Size,
    pub order_count: u32,
}

impl From<PriceLevel> for LevelSnapshot {
    fn from(level: PriceLevel) -> Self {
        Self {
            price: level.price,
            size: level.size,
            order_count: level.order_count,
        }
    }
}

/// Read-only view of one token's book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBookSnapshot {
    pub token_id: TokenId,
    /// Best-first.
    pub bids: Vec<LevelSnapshot>,
    /// Best-first.
    pub asks: Vec<LevelSnapshot>,
    pub sequence: u64,
    pub last_update: DateTime<Utc>,
}

impl TokenBookSnapshot {
    fn of(book: &InMemoryOrderBook, depth: usize) -> Self {
        Self {
            token_id: book.token_id().clone(),
            bids: book.bid_depth(depth).into_iter().map(Into::into).collect(),
            asks: book.ask_depth(depth).into_iter().map(Into::into).collect(),
            sequence: book.sequence(),
            last_update: book.last_update(),
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|l| l.price)
    }

    /// Cumulative size of the top `n` ask levels.
    pub fn top_ask_size(&self, n: usize) -> Size {
        self.asks
            .iter()
            .take(n)
            .fold(Size::ZERO, |acc, l| acc + l.size)
    }

    /// Rebuild an in-memory book from this snapshot. Best-bid, best-ask
    /// and top-N depth are preserved for every N within the snapshot
    /// depth.
    pub fn restore(&self) -> InMemoryOrderBook {
        let mut book = InMemoryOrderBook::new(self.token_id.clone());
        book.apply_snapshot(
            self.bids.iter().map(|l| (l.price, l.size)).collect(),
            self.asks.iter().map(|l| (l.price, l.size)).collect(),
        )
        .expect("snapshot levels were validated on entry");
        book
    }
}

/// Read-only view of a whole market book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBookSnapshot {
    pub market_id: ConditionId,
    pub yes: TokenBookSnapshot,
    pub no: TokenBookSnapshot,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub combined_ask: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub arbitrage_spread: Option<Decimal>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl MarketBookSnapshot {
    pub fn has_arbitrage(&self) -> bool {
        self.arbitrage_spread
            .map(|s| s > Decimal::ZERO)
            .unwrap_or(false)
    }
}

/// Read-only access to current market snapshots. Implemented by the
/// market-data service; consumed by components that need a synchronous
/// view (liquidity prechecks) without importing the service itself.
pub trait SnapshotSource: Send + Sync {
    fn market_snapshot(&self, market_id: &ConditionId) -> Option<MarketBookSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> MarketOrderBook {
        MarketOrderBook::create(
            ConditionId::from("0xcond"),
            TokenId::from("tok-yes"),
            TokenId::from("tok-no"),
        )
    }

    #[test]
    fn test_combined_ask_requires_both_sides() {
        let mut m = market();
        assert_eq!(m.combined_ask(), None);

        m.yes_book_mut()
            .update_ask(Price::new(dec!(0.48)), Size::new(dec!(100)))
            .unwrap();
        assert_eq!(m.combined_ask(), None);

        m.no_book_mut()
            .update_ask(Price::new(dec!(0.50)), Size::new(dec!(100)))
            .unwrap();
        assert_eq!(m.combined_ask(), Some(dec!(0.98)));
        assert_eq!(m.arbitrage_spread(), Some(dec!(0.02)));
        assert!(m.has_arbitrage());
    }

    #[test]
    fn test_no_arbitrage_when_crossed_over_one() {
        let mut m = market();
        m.yes_book_mut()
            .update_ask(Price::new(dec!(0.52)), Size::new(dec!(100)))
            .unwrap();
        m.no_book_mut()
            .update_ask(Price::new(dec!(0.52)), Size::new(dec!(100)))
            .unwrap();
        assert_eq!(m.arbitrage_spread(), Some(dec!(-0.04)));
        assert!(!m.has_arbitrage());
    }

    #[test]
    fn test_snapshot_event_fields() {
        let mut m = market();
        m.yes_book_mut()
            .update_ask(Price::new(dec!(0.48)), Size::new(dec!(100)))
            .unwrap();
        m.no_book_mut()
            .update_ask(Price::new(dec!(0.50)), Size::new(dec!(200)))
            .unwrap();

        let event = m.snapshot_event();
        assert_eq!(event.yes_best_ask, Some(Price::new(dec!(0.48))));
        assert_eq!(event.no_ask_size, Some(Size::new(dec!(200))));
        assert_eq!(event.arbitrage_spread_cents, Some(dec!(2.00)));
        assert_eq!(event.sequence, 2);
    }

    #[test]
    fn test_snapshot_round_trip_preserves_depth() {
        let mut m = market();
        m.yes_book_mut()
            .apply_snapshot(
                vec![
                    (Price::new(dec!(0.45)), Size::new(dec!(10))),
                    (Price::new(dec!(0.44)), Size::new(dec!(20))),
                ],
                vec![
                    (Price::new(dec!(0.48)), Size::new(dec!(30))),
                    (Price::new(dec!(0.49)), Size::new(dec!(40))),
                    (Price::new(dec!(0.50)), Size::new(dec!(50))),
                ],
            )
            .unwrap();

        let snap = m.snapshot(DEFAULT_SNAPSHOT_DEPTH);
        let restored = snap.yes.restore();

        assert_eq!(restored.best_bid(), m.yes_book().best_bid());
        assert_eq!(restored.best_ask(), m.yes_book().best_ask());
        for n in 1..=3 {
            assert_eq!(restored.ask_depth(n), m.yes_book().ask_depth(n));
            assert_eq!(restored.bid_depth(n), m.yes_book().bid_depth(n));
        }
    }

    #[test]
    fn test_top_ask_size() {
        let mut m = market();
        m.yes_book_mut()
            .apply_snapshot(
                vec![],
                vec![
                    (Price::new(dec!(0.48)), Size::new(dec!(30))),
                    (Price::new(dec!(0.49)), Size::new(dec!(40))),
                    (Price::new(dec!(0.50)), Size::new(dec!(50))),
                    (Price::new(dec!(0.51)), Size::new(dec!(60))),
                ],
            )
            .unwrap();
        let snap = m.snapshot(DEFAULT_SNAPSHOT_DEPTH);
        assert_eq!(snap.yes.top_ask_size(3), Size::new(dec!(120)));
    }
}
