//! Order-book store.
//!
//! One `InMemoryOrderBook` per outcome token, two sorted ladders per book,
//! and a `MarketOrderBook` pairing the YES and NO books of a binary
//! market with derived arbitrage metrics. Books are owned and mutated
//! only by the market-data service; everything else consumes read-only
//! snapshots.

pub mod book;
pub mod error;
pub mod levels;
pub mod market;

pub use book::InMemoryOrderBook;
pub use error::{BookError, BookResult};
pub use levels::{PriceLevel, SortedPriceLevels};
pub use market::{
    LevelSnapshot, MarketBookSnapshot, MarketOrderBook, SnapshotSource, TokenBookSnapshot,
};
