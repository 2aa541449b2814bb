//! The strategy contract.

use mercury_core::events::OrderBookSnapshotEvent;
use mercury_core::{ConditionId, TradingSignal};
use std::collections::HashSet;

/// A trading strategy.
///
/// Instances are driven cooperatively and single-threaded: the engine
/// serializes all calls into one instance, so implementations keep plain
/// mutable state (cooldowns, counters) without locking.
///
/// `on_market_data` returns the full batch of signals produced for one
/// book snapshot; the engine drains it and publishes each signal to
/// `signal.<name>`.
pub trait Strategy: Send {
    /// Unique registry key.
    fn name(&self) -> &str;

    fn enabled(&self) -> bool;

    /// Enable signal generation. Idempotent.
    fn enable(&mut self);

    /// Disable signal generation. Idempotent.
    fn disable(&mut self);

    /// Called once when the engine starts.
    fn start(&mut self);

    /// Called once when the engine stops.
    fn stop(&mut self);

    /// Markets this strategy wants data for. An empty set means every
    /// market.
    fn subscribed_markets(&self) -> HashSet<ConditionId>;

    /// Process one book snapshot, producing zero or more signals.
    fn on_market_data(&mut self, book: &OrderBookSnapshotEvent) -> Vec<TradingSignal>;

    /// Whether the engine should route this market's data here.
    fn wants_market(&self, market_id: &ConditionId) -> bool {
        let subscribed = self.subscribed_markets();
        subscribed.is_empty() || subscribed.contains(market_id)
    }
}
