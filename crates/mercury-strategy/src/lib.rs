//! Strategy engine.
//!
//! Routes `market.orderbook.<market_id>` events to registered strategies
//! and publishes every produced signal to `signal.<strategy_name>`.
//! Strategies are plain state machines behind the [`Strategy`] trait;
//! the engine owns scheduling, enable/disable control and config-reload
//! synchronization.

pub mod engine;
pub mod error;
pub mod gabagool;
pub mod strategy;

pub use engine::StrategyEngine;
pub use error::{StrategyError, StrategyResult};
pub use gabagool::{GabagoolConfig, GabagoolStrategy};
pub use strategy::Strategy;
