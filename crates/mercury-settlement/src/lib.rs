//! Settlement manager.
//!
//! Polls the metadata oracle for market resolution, claims resolved
//! positions through the abstract claim backend with exponential-backoff
//! retries, and credits the realized-P&L ledger exactly once per
//! position.

pub mod backoff;
pub mod claim;
pub mod error;
pub mod manager;
pub mod oracle;

pub use backoff::BackoffPolicy;
pub use claim::{ClaimBackend, DryRunClaimer, TxReceipt};
pub use error::{SettlementError, SettlementResult};
pub use manager::{SettlementConfig, SettlementManager};
pub use oracle::{GammaClient, MarketInfo, MarketInfoSource};
