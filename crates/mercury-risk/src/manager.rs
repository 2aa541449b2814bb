//! Risk manager implementation.

use crate::breaker::{compute_state, CircuitBreakerState, CircuitBreakerThresholds};
use crate::error::RiskResult;
use chrono::{DateTime, Duration, Utc};
use mercury_bus::{EventBus, SubscriptionId};
use mercury_core::events::topics;
use mercury_core::{SignalType, TradingSignal};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hard limits enforced by the pre-trade gate.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RiskLimits {
    #[serde(default = "default_max_daily_loss_usd")]
    pub max_daily_loss_usd: Decimal,
    #[serde(default = "default_max_position_size_usd")]
    pub max_position_size_usd: Decimal,
    #[serde(default = "default_max_unhedged_exposure_usd")]
    pub max_unhedged_exposure_usd: Decimal,
}

fn default_max_daily_loss_usd() -> Decimal {
    Decimal::from(500)
}

fn default_max_position_size_usd() -> Decimal {
    Decimal::from(100)
}

fn default_max_unhedged_exposure_usd() -> Decimal {
    Decimal::from(50)
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss_usd: default_max_daily_loss_usd(),
            max_position_size_usd: default_max_position_size_usd(),
            max_unhedged_exposure_usd: default_max_unhedged_exposure_usd(),
        }
    }
}

/// Risk manager configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RiskManagerConfig {
    #[serde(default)]
    pub limits: RiskLimits,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerThresholds,
}

/// Point-in-time view of the risk state, for health and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSnapshot {
    pub daily_pnl: Decimal,
    pub daily_trades: u32,
    pub daily_volume: Decimal,
    pub current_exposure: Decimal,
    pub unhedged_exposure: Decimal,
    pub consecutive_failures: u32,
    pub circuit_breaker_state: CircuitBreakerState,
    pub circuit_breaker_triggered_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct RiskState {
    daily_pnl: Decimal,
    daily_trades: u32,
    daily_volume: Decimal,
    current_exposure: Decimal,
    unhedged_exposure: Decimal,
    consecutive_failures: u32,
    breaker: CircuitBreakerState,
    triggered_at: Option<DateTime<Utc>>,
    /// Idempotency keys for accounting hooks.
    seen_fills: HashSet<String>,
    seen_pnl: HashSet<String>,
}

impl RiskState {
    fn new() -> Self {
        Self {
            daily_pnl: Decimal::ZERO,
            daily_trades: 0,
            daily_volume: Decimal::ZERO,
            current_exposure: Decimal::ZERO,
            unhedged_exposure: Decimal::ZERO,
            consecutive_failures: 0,
            breaker: CircuitBreakerState::Normal,
            triggered_at: None,
            seen_fills: HashSet::new(),
            seen_pnl: HashSet::new(),
        }
    }
}

/// Synchronous pre-trade gate and trading-state accountant.
///
/// All state mutation happens inside the bus handlers (each serialized),
/// so a plain mutex around one state struct is enough.
pub struct RiskManager {
    config: RiskManagerConfig,
    bus: Arc<EventBus>,
    state: Mutex<RiskState>,
    subscription_ids: Mutex<Vec<SubscriptionId>>,
    running: AtomicBool,
}

impl RiskManager {
    pub fn new(config: RiskManagerConfig, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            bus,
            state: Mutex::new(RiskState::new()),
            subscription_ids: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Validate a signal against all risk limits, in gate order.
    pub fn check_pre_trade(&self, signal: &TradingSignal) -> (bool, Option<String>) {
        let state = self.state.lock();

        if state.breaker == CircuitBreakerState::Halt
            && !self.cooldown_expired(state.triggered_at, Utc::now())
        {
            return (false, Some("Circuit breaker triggered".to_string()));
        }

        if state.daily_pnl <= -self.config.limits.max_daily_loss_usd {
            return (
                false,
                Some(format!("Daily loss limit reached: ${:.2}", -state.daily_pnl)),
            );
        }

        if signal.target_size_usd > self.config.limits.max_position_size_usd {
            return (
                false,
                Some(format!(
                    "Position size ${:.2} exceeds limit ${:.2}",
                    signal.target_size_usd, self.config.limits.max_position_size_usd
                )),
            );
        }

        if signal.signal_type != SignalType::Arbitrage {
            let new_exposure = state.unhedged_exposure + signal.target_size_usd;
            if new_exposure > self.config.limits.max_unhedged_exposure_usd {
                return (
                    false,
                    Some("Unhedged exposure would exceed limit".to_string()),
                );
            }
        }

        (true, None)
    }

    /// Run the gate and publish `risk.approved.<id>` or
    /// `risk.rejected.<id>`.
    pub async fn validate_signal(&self, signal: &TradingSignal) -> RiskResult<bool> {
        if signal.is_expired(Utc::now()) {
            let payload = json!({
                "signal_id": signal.signal_id,
                "reason": "Signal expired",
                "timestamp": Utc::now().to_rfc3339(),
            });
            self.bus
                .publish(&topics::risk_rejected(&signal.signal_id), payload)
                .await?;
            return Ok(false);
        }

        let (allowed, reason) = self.check_pre_trade(signal);

        if !allowed {
            let reason = reason.unwrap_or_else(|| "Unknown reason".to_string());
            info!(signal_id = %signal.signal_id, %reason, "signal rejected");
            let payload = json!({
                "signal_id": signal.signal_id,
                "reason": reason,
                "timestamp": Utc::now().to_rfc3339(),
            });
            self.bus
                .publish(&topics::risk_rejected(&signal.signal_id), payload)
                .await?;
            return Ok(false);
        }

        info!(
            signal_id = %signal.signal_id,
            approved_size = %signal.target_size_usd,
            "signal approved"
        );
        let payload = json!({
            "signal_id": signal.signal_id,
            "market_id": signal.market_id.as_str(),
            "strategy_name": signal.strategy_name,
            "signal_type": signal.signal_type.to_string(),
            "approved_size_usd": signal.target_size_usd.to_string(),
            "yes_price": signal.yes_price.to_string(),
            "no_price": signal.no_price.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.bus
            .publish(&topics::risk_approved(&signal.signal_id), payload)
            .await?;
        Ok(true)
    }

    /// Record a fill's cost toward exposure. Idempotent per order id.
    pub fn record_fill(&self, order_id: &str, cost: Decimal) {
        let mut state = self.state.lock();
        if !state.seen_fills.insert(order_id.to_string()) {
            return;
        }
        state.daily_trades += 1;
        state.daily_volume += cost;
        state.current_exposure += cost;
        debug!(
            order_id,
            cost = %cost,
            current_exposure = %state.current_exposure,
            "fill recorded"
        );
    }

    /// Record realized P&L and recompute the breaker. Idempotent per key
    /// (the settlement ledger key is the natural choice).
    pub fn record_pnl_keyed(&self, key: &str, pnl: Decimal) {
        let mut state = self.state.lock();
        if !state.seen_pnl.insert(key.to_string()) {
            return;
        }
        state.daily_pnl += pnl;
        info!(pnl = %pnl, daily_pnl = %state.daily_pnl, "pnl recorded");
        self.recompute_breaker(&mut state);
    }

    /// Record realized P&L without an idempotency key.
    pub fn record_pnl(&self, pnl: Decimal) {
        let mut state = self.state.lock();
        state.daily_pnl += pnl;
        self.recompute_breaker(&mut state);
    }

    /// A trading failure; consecutive failures escalate the breaker.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        self.recompute_breaker(&mut state);
    }

    /// A successful trade resets the consecutive-failure counter.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        self.recompute_breaker(&mut state);
    }

    fn recompute_breaker(&self, state: &mut RiskState) {
        let new_state = compute_state(
            state.consecutive_failures,
            -state.daily_pnl,
            &self.config.circuit_breaker,
        );
        if new_state != state.breaker {
            warn!(
                old_state = %state.breaker,
                new_state = %new_state,
                consecutive_failures = state.consecutive_failures,
                daily_pnl = %state.daily_pnl,
                "circuit breaker changed"
            );
            if new_state == CircuitBreakerState::Halt {
                state.triggered_at = Some(Utc::now());
            }
            state.breaker = new_state;
        }
    }

    fn cooldown_expired(&self, triggered_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match triggered_at {
            None => true,
            Some(at) => {
                now >= at + Duration::minutes(self.config.circuit_breaker.cooldown_minutes as i64)
            }
        }
    }

    /// Zero all daily counters and return to NORMAL.
    pub fn reset_daily(&self) {
        let mut state = self.state.lock();
        info!(
            final_pnl = %state.daily_pnl,
            final_trades = state.daily_trades,
            "daily limits reset"
        );
        *state = RiskState::new();
    }

    pub fn circuit_breaker_state(&self) -> CircuitBreakerState {
        self.state.lock().breaker
    }

    /// Size multiplier for the current breaker state.
    pub fn size_multiplier(&self) -> Decimal {
        self.state.lock().breaker.size_multiplier()
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        let state = self.state.lock();
        RiskSnapshot {
            daily_pnl: state.daily_pnl,
            daily_trades: state.daily_trades,
            daily_volume: state.daily_volume,
            current_exposure: state.current_exposure,
            unhedged_exposure: state.unhedged_exposure,
            consecutive_failures: state.consecutive_failures,
            circuit_breaker_state: state.breaker,
            circuit_breaker_triggered_at: state.triggered_at,
        }
    }

    /// Restore persisted daily state after a restart.
    pub fn restore(&self, daily_pnl: Decimal, daily_trades: u32, triggered_at: Option<DateTime<Utc>>) {
        let mut state = self.state.lock();
        state.daily_pnl = daily_pnl;
        state.daily_trades = daily_trades;
        state.triggered_at = triggered_at;
        self.recompute_breaker(&mut state);
    }

    /// Wire the bus subscriptions: signals in, accounting events in.
    pub fn start(self: &Arc<Self>) -> RiskResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut ids = self.subscription_ids.lock();

        let manager = Arc::clone(self);
        ids.push(self.bus.subscribe(
            "signal.*",
            Arc::new(move |_topic, payload| {
                let manager = Arc::clone(&manager);
                Box::pin(async move {
                    match serde_json::from_value::<TradingSignal>(payload) {
                        Ok(signal) => {
                            manager.validate_signal(&signal).await?;
                        }
                        Err(e) => warn!(error = %e, "undecodable signal payload"),
                    }
                    Ok(())
                })
            }),
        )?);

        let manager = Arc::clone(self);
        ids.push(self.bus.subscribe(
            topics::ORDER_FILLED,
            Arc::new(move |_topic, payload| {
                let manager = Arc::clone(&manager);
                Box::pin(async move {
                    let order_id = payload.get("order_id").and_then(Value::as_str);
                    let cost = payload
                        .get("cost")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<Decimal>().ok());
                    if let (Some(order_id), Some(cost)) = (order_id, cost) {
                        manager.record_fill(order_id, cost);
                    }
                    Ok(())
                })
            }),
        )?);

        let manager = Arc::clone(self);
        ids.push(self.bus.subscribe(
            topics::EXECUTION_FAILED,
            Arc::new(move |_topic, _payload| {
                let manager = Arc::clone(&manager);
                Box::pin(async move {
                    manager.record_failure();
                    Ok(())
                })
            }),
        )?);

        let manager = Arc::clone(self);
        ids.push(self.bus.subscribe(
            topics::POSITION_OPENED,
            Arc::new(move |_topic, _payload| {
                let manager = Arc::clone(&manager);
                Box::pin(async move {
                    manager.record_success();
                    Ok(())
                })
            }),
        )?);

        let manager = Arc::clone(self);
        ids.push(self.bus.subscribe(
            topics::SETTLEMENT_CLAIMED,
            Arc::new(move |_topic, payload| {
                let manager = Arc::clone(&manager);
                Box::pin(async move {
                    let position_id = payload.get("position_id").and_then(Value::as_str);
                    let profit = payload
                        .get("profit")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<Decimal>().ok());
                    if let (Some(position_id), Some(profit)) = (position_id, profit) {
                        manager.record_pnl_keyed(position_id, profit);
                    }
                    Ok(())
                })
            }),
        )?);

        info!("risk manager started");
        Ok(())
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for id in self.subscription_ids.lock().drain(..) {
            self.bus.unsubscribe(id);
        }
        info!("risk manager stopped");
    }
}
