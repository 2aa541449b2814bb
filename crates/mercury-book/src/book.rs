//! Per-token in-memory order book.

use crate::error::{BookError, BookResult};
use crate::levels::{PriceLevel, SortedPriceLevels};
use chrono::{DateTime, Utc};
use mercury_core::{Price, Size, TokenId};
use rust_decimal::Decimal;
use tracing::warn;

/// Order book for a single outcome token.
///
/// Bids descend, asks ascend, and every mutation bumps `sequence` and
/// refreshes `last_update`. A crossed book (best_bid >= best_ask) is a
/// reportable anomaly, never a crash: it is logged and the data kept so
/// downstream consumers can decide for themselves.
#[derive(Debug, Clone)]
pub struct InMemoryOrderBook {
    token_id: TokenId,
    bids: SortedPriceLevels,
    asks: SortedPriceLevels,
    last_update: DateTime<Utc>,
    sequence: u64,
}

impl InMemoryOrderBook {
    pub fn new(token_id: TokenId) -> Self {
        Self {
            token_id,
            bids: SortedPriceLevels::bids(),
            asks: SortedPriceLevels::asks(),
            last_update: Utc::now(),
            sequence: 0,
        }
    }

    pub fn token_id(&self) -> &TokenId {
        &self.token_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn bids(&self) -> &SortedPriceLevels {
        &self.bids
    }

    pub fn asks(&self) -> &SortedPriceLevels {
        &self.asks
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.best_price()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.best_price()
    }

    pub fn best_bid_size(&self) -> Option<Size> {
        self.bids.best_size()
    }

    pub fn best_ask_size(&self) -> Option<Size> {
        self.asks.best_size()
    }

    fn validate_price(&self, price: Price) -> BookResult<()> {
        if !price.is_valid_probability() {
            return Err(BookError::InvalidPrice {
                price: price.to_string(),
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.sequence += 1;
        self.last_update = Utc::now();
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid >= ask {
                warn!(
                    token_id = %self.token_id,
                    best_bid = %bid,
                    best_ask = %ask,
                    "crossed book"
                );
            }
        }
    }

    /// Update one bid level. Zero size removes it.
    pub fn update_bid(&mut self, price: Price, size: Size) -> BookResult<()> {
        self.validate_price(price)?;
        self.bids.update(price, size);
        self.touch();
        Ok(())
    }

    /// Update one ask level. Zero size removes it.
    pub fn update_ask(&mut self, price: Price, size: Size) -> BookResult<()> {
        self.validate_price(price)?;
        self.asks.update(price, size);
        self.touch();
        Ok(())
    }

    /// Clear both ladders and replace with the given levels.
    pub fn apply_snapshot(
        &mut self,
        bids: Vec<(Price, Size)>,
        asks: Vec<(Price, Size)>,
    ) -> BookResult<()> {
        for (price, _) in bids.iter().chain(asks.iter()) {
            self.validate_price(*price)?;
        }
        self.bids.clear();
        self.asks.clear();
        for (price, size) in bids {
            self.bids.update(price, size);
        }
        for (price, size) in asks {
            self.asks.update(price, size);
        }
        self.touch();
        Ok(())
    }

    /// Apply incremental level updates to both sides as one mutation.
    pub fn apply_delta(
        &mut self,
        bid_updates: Vec<(Price, Size)>,
        ask_updates: Vec<(Price, Size)>,
    ) -> BookResult<()> {
        for (price, _) in bid_updates.iter().chain(ask_updates.iter()) {
            self.validate_price(*price)?;
        }
        for (price, size) in bid_updates {
            self.bids.update(price, size);
        }
        for (price, size) in ask_updates {
            self.asks.update(price, size);
        }
        self.touch();
        Ok(())
    }

    /// Volume-weighted average price to buy `size` shares by walking the
    /// ask ladder. Fails when the ladder is exhausted first.
    pub fn vwap_to_buy(&self, size: Size) -> BookResult<Price> {
        Self::walk(&self.asks, size)
    }

    /// Volume-weighted average price to sell `size` shares by walking the
    /// bid ladder.
    pub fn vwap_to_sell(&self, size: Size) -> BookResult<Price> {
        Self::walk(&self.bids, size)
    }

    fn walk(side: &SortedPriceLevels, size: Size) -> BookResult<Price> {
        if !size.is_positive() {
            return Err(BookError::InsufficientLiquidity {
                requested: size.to_string(),
                available: "0".to_string(),
            });
        }

        let mut remaining = size.inner();
        let mut cost = Decimal::ZERO;
        for level in side.iter() {
            let take = remaining.min(level.size.inner());
            cost += take * level.price.inner();
            remaining -= take;
            if remaining.is_zero() {
                return Ok(Price::new(cost / size.inner()));
            }
        }

        Err(BookError::InsufficientLiquidity {
            requested: size.to_string(),
            available: (size.inner() - remaining).to_string(),
        })
    }

    pub fn bid_depth(&self, n: usize) -> Vec<PriceLevel> {
        self.bids.depth(n)
    }

    pub fn ask_depth(&self, n: usize) -> Vec<PriceLevel> {
        self.asks.depth(n)
    }
}
