//! Execution engine.
//!
//! Consumes `risk.approved.*` events and turns them into atomic dual-leg
//! FOK purchases: liquidity precheck against top-of-book depth,
//! arbitrage validity re-check, share rounding to clean cent amounts,
//! parallel or sequential placement, and the hold policy: a MATCHED leg
//! is never cancelled and never sold back.

pub mod clob;
pub mod engine;
pub mod error;

pub use clob::{
    ClobClient, ClobError, ClobResult, DualLegRequest, LegScript, MockClobClient, OrderRequest,
    PlacementMode, SimulatedClob,
};
pub use engine::{round_shares_to_clean, ExecutionConfig, ExecutionEngine, ExecutionOutcome};
pub use error::{ExecutorError, ExecutorResult};
