//! Sorted price-level ladders.

use mercury_core::{Price, Size};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One price level of a ladder.
///
/// A level with zero size is never stored; `SortedPriceLevels::update`
/// removes it instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub size: Size,
    pub order_count: u32,
}

impl PriceLevel {
    pub fn new(price: Price, size: Size) -> Self {
        Self {
            price,
            size,
            order_count: 1,
        }
    }
}

/// A sorted collection of price levels for one side of a book.
///
/// Backed by a `BTreeMap` keyed by price: O(log n) insert/update/delete,
/// O(1) best. `ascending = true` for asks (best = lowest), false for bids
/// (best = highest).
#[derive(Debug, Clone, Default)]
pub struct SortedPriceLevels {
    ascending: bool,
    levels: BTreeMap<Price, PriceLevel>,
}

impl SortedPriceLevels {
    pub fn new(ascending: bool) -> Self {
        Self {
            ascending,
            levels: BTreeMap::new(),
        }
    }

    pub fn bids() -> Self {
        Self::new(false)
    }

    pub fn asks() -> Self {
        Self::new(true)
    }

    /// Insert or replace the level at `price`. A non-positive size
    /// removes the level. Returns true if the ladder changed.
    pub fn update(&mut self, price: Price, size: Size) -> bool {
        if size.is_positive() {
            self.levels.insert(price, PriceLevel::new(price, size));
            true
        } else {
            self.levels.remove(&price).is_some()
        }
    }

    /// Replace the level keeping an explicit order count.
    pub fn update_with_count(&mut self, price: Price, size: Size, order_count: u32) -> bool {
        if size.is_positive() {
            self.levels.insert(
                price,
                PriceLevel {
                    price,
                    size,
                    order_count: order_count.max(1),
                },
            );
            true
        } else {
            self.levels.remove(&price).is_some()
        }
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Best level: lowest price for asks, highest for bids.
    pub fn best(&self) -> Option<&PriceLevel> {
        if self.ascending {
            self.levels.values().next()
        } else {
            self.levels.values().next_back()
        }
    }

    pub fn best_price(&self) -> Option<Price> {
        self.best().map(|l| l.price)
    }

    pub fn best_size(&self) -> Option<Size> {
        self.best().map(|l| l.size)
    }

    /// Iterate levels best-first.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &PriceLevel> + '_> {
        if self.ascending {
            Box::new(self.levels.values())
        } else {
            Box::new(self.levels.values().rev())
        }
    }

    /// Top `n` levels, best-first.
    pub fn depth(&self, n: usize) -> Vec<PriceLevel> {
        self.iter().take(n).copied().collect()
    }

    /// Cumulative size over the top `n` levels.
    pub fn total_size(&self, n: usize) -> Size {
        self.iter()
            .take(n)
            .fold(Size::ZERO, |acc, level| acc + level.size)
    }

    /// Cumulative size available at or better than `limit`: levels with
    /// price >= limit for bids, price <= limit for asks.
    pub fn volume_at_price(&self, limit: Price) -> Size {
        self.iter()
            .take_while(|level| {
                if self.ascending {
                    level.price <= limit
                } else {
                    level.price >= limit
                }
            })
            .fold(Size::ZERO, |acc, level| acc + level.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn p(v: rust_decimal::Decimal) -> Price {
        Price::new(v)
    }

    fn s(v: rust_decimal::Decimal) -> Size {
        Size::new(v)
    }

    #[test]
    fn test_ask_ordering_best_is_lowest() {
        let mut asks = SortedPriceLevels::asks();
        asks.update(p(dec!(0.50)), s(dec!(100)));
        asks.update(p(dec!(0.48)), s(dec!(50)));
        asks.update(p(dec!(0.52)), s(dec!(200)));

        assert_eq!(asks.best_price(), Some(p(dec!(0.48))));
        let depth: Vec<_> = asks.depth(3).iter().map(|l| l.price).collect();
        assert_eq!(depth, vec![p(dec!(0.48)), p(dec!(0.50)), p(dec!(0.52))]);
    }

    #[test]
    fn test_bid_ordering_best_is_highest() {
        let mut bids = SortedPriceLevels::bids();
        bids.update(p(dec!(0.45)), s(dec!(100)));
        bids.update(p(dec!(0.47)), s(dec!(50)));

        assert_eq!(bids.best_price(), Some(p(dec!(0.47))));
        let depth: Vec<_> = bids.depth(2).iter().map(|l| l.price).collect();
        assert_eq!(depth, vec![p(dec!(0.47)), p(dec!(0.45))]);
    }

    #[test]
    fn test_zero_size_removes_level() {
        let mut asks = SortedPriceLevels::asks();
        asks.update(p(dec!(0.48)), s(dec!(50)));
        assert_eq!(asks.len(), 1);

        assert!(asks.update(p(dec!(0.48)), Size::ZERO));
        assert!(asks.is_empty());
        // Removing again reports no change.
        assert!(!asks.update(p(dec!(0.48)), Size::ZERO));
    }

    #[test]
    fn test_update_replaces_in_place() {
        let mut asks = SortedPriceLevels::asks();
        asks.update(p(dec!(0.48)), s(dec!(50)));
        asks.update(p(dec!(0.48)), s(dec!(75)));
        assert_eq!(asks.len(), 1);
        assert_eq!(asks.best_size(), Some(s(dec!(75))));
    }

    #[test]
    fn test_total_size_top_n() {
        let mut asks = SortedPriceLevels::asks();
        asks.update(p(dec!(0.48)), s(dec!(50)));
        asks.update(p(dec!(0.49)), s(dec!(100)));
        asks.update(p(dec!(0.50)), s(dec!(200)));

        assert_eq!(asks.total_size(2), s(dec!(150)));
        assert_eq!(asks.total_size(10), s(dec!(350)));
    }

    #[test]
    fn test_volume_at_price() {
        let mut asks = SortedPriceLevels::asks();
        asks.update(p(dec!(0.48)), s(dec!(50)));
        asks.update(p(dec!(0.49)), s(dec!(100)));
        asks.update(p(dec!(0.55)), s(dec!(500)));
        // Asks at or below the limit.
        assert_eq!(asks.volume_at_price(p(dec!(0.50))), s(dec!(150)));

        let mut bids = SortedPriceLevels::bids();
        bids.update(p(dec!(0.47)), s(dec!(10)));
        bids.update(p(dec!(0.45)), s(dec!(20)));
        bids.update(p(dec!(0.40)), s(dec!(30)));
        // Bids at or above the limit.
        assert_eq!(bids.volume_at_price(p(dec!(0.45))), s(dec!(30)));
    }
}
