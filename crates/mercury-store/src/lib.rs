//! Durable state store.
//!
//! A single-writer SQLite database holding trades, positions, the
//! settlement queue, fills, daily aggregates, the realized-P&L ledger and
//! the persisted circuit-breaker row. All money columns are stored as
//! fixed-point strings; nothing round-trips through binary floating
//! point. Writers route every business event through one transaction.

pub mod error;
pub mod migrations;
pub mod models;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use models::{
    CircuitBreakerRow, ClaimableEntry, DailyStats, PnlType, RealizedPnlEntry, SettlementStatus,
    Trade,
};
pub use store::StateStore;
