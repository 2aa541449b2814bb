//! Strategy engine: registry, routing, runtime control.

use crate::error::{StrategyError, StrategyResult};
use crate::strategy::Strategy;
use mercury_bus::{EventBus, SubscriptionId};
use mercury_core::events::{topics, OrderBookSnapshotEvent};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type StrategySlot = Arc<Mutex<Box<dyn Strategy>>>;

struct EngineShared {
    bus: Arc<EventBus>,
    strategies: RwLock<HashMap<String, StrategySlot>>,
}

impl EngineShared {
    /// Route one book snapshot to every enabled, subscribed strategy and
    /// publish the produced signals.
    async fn dispatch(&self, payload: Value) {
        let event: OrderBookSnapshotEvent = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "undecodable orderbook event");
                return;
            }
        };

        // Collect signals under each strategy's lock, publish after.
        let slots: Vec<(String, StrategySlot)> = {
            let strategies = self.strategies.read();
            strategies
                .iter()
                .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut outgoing = Vec::new();
        for (name, slot) in slots {
            let signals = {
                let mut strategy = slot.lock();
                if !strategy.enabled() || !strategy.wants_market(&event.market_id) {
                    continue;
                }
                strategy.on_market_data(&event)
            };
            for signal in signals {
                outgoing.push((name.clone(), signal));
            }
        }

        for (name, signal) in outgoing {
            debug!(strategy = %name, signal_id = %signal.signal_id, "publishing signal");
            if let Err(e) = self
                .bus
                .publish(&topics::signal(&name), signal.to_payload())
                .await
            {
                warn!(strategy = %name, error = %e, "signal publish failed");
            }
        }
    }

    /// Flip a strategy's enabled state. Returns false for unknown names.
    async fn set_enabled(&self, name: &str, enabled: bool, publish_event: bool) -> bool {
        let slot = {
            let strategies = self.strategies.read();
            strategies.get(name).cloned()
        };
        let Some(slot) = slot else {
            warn!(strategy = name, "enable/disable for unknown strategy");
            return false;
        };

        let changed = {
            let mut strategy = slot.lock();
            let was = strategy.enabled();
            if enabled {
                strategy.enable();
            } else {
                strategy.disable();
            }
            was != enabled
        };

        if changed && publish_event {
            let payload = json!({ "strategy": name, "enabled": enabled });
            if let Err(e) = self.bus.publish(topics::STRATEGY_STATE_CHANGED, payload).await {
                warn!(error = %e, "state change publish failed");
            }
        }
        true
    }
}

/// Strategy engine.
pub struct StrategyEngine {
    shared: Arc<EngineShared>,
    subscription_ids: Mutex<Vec<SubscriptionId>>,
    running: AtomicBool,
}

impl StrategyEngine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                bus,
                strategies: RwLock::new(HashMap::new()),
            }),
            subscription_ids: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Register a strategy under its own name. Registration is explicit;
    /// there is no discovery.
    pub fn register_strategy(&self, strategy: Box<dyn Strategy>) -> StrategyResult<()> {
        let name = strategy.name().to_string();
        let mut strategies = self.shared.strategies.write();
        if strategies.contains_key(&name) {
            return Err(StrategyError::AlreadyRegistered(name));
        }
        info!(strategy = %name, "strategy registered");
        strategies.insert(name, Arc::new(Mutex::new(strategy)));
        Ok(())
    }

    pub fn unregister_strategy(&self, name: &str) -> StrategyResult<()> {
        let removed = self.shared.strategies.write().remove(name);
        match removed {
            Some(slot) => {
                slot.lock().stop();
                info!(strategy = name, "strategy unregistered");
                Ok(())
            }
            None => Err(StrategyError::UnknownStrategy(name.to_string())),
        }
    }

    pub fn strategy_count(&self) -> usize {
        self.shared.strategies.read().len()
    }

    pub fn enabled_strategies(&self) -> Vec<String> {
        self.shared
            .strategies
            .read()
            .iter()
            .filter(|(_, slot)| slot.lock().enabled())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_strategy_enabled(&self, name: &str) -> bool {
        self.shared
            .strategies
            .read()
            .get(name)
            .map(|slot| slot.lock().enabled())
            .unwrap_or(false)
    }

    pub async fn enable_strategy(&self, name: &str) -> bool {
        self.shared.set_enabled(name, true, true).await
    }

    pub async fn disable_strategy(&self, name: &str) -> bool {
        self.shared.set_enabled(name, false, true).await
    }

    /// Start every registered strategy and wire the bus subscriptions.
    pub fn start(&self) -> StrategyResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let strategies = self.shared.strategies.read();
            for slot in strategies.values() {
                slot.lock().start();
            }
        }

        let mut ids = self.subscription_ids.lock();

        // Bounded queue: under a snapshot burst the oldest book view is
        // the right one to drop.
        let shared = Arc::clone(&self.shared);
        ids.push(self.shared.bus.subscribe_bounded(
            "market.orderbook.*",
            256,
            Arc::new(move |_topic, payload| {
                let shared = Arc::clone(&shared);
                Box::pin(async move {
                    shared.dispatch(payload).await;
                    Ok(())
                })
            }),
        )?);

        let shared = Arc::clone(&self.shared);
        ids.push(self.shared.bus.subscribe(
            topics::STRATEGY_ENABLE,
            Arc::new(move |_topic, payload| {
                let shared = Arc::clone(&shared);
                Box::pin(async move {
                    if let Some(name) = payload.get("strategy").and_then(Value::as_str) {
                        shared.set_enabled(name, true, true).await;
                    }
                    Ok(())
                })
            }),
        )?);

        let shared = Arc::clone(&self.shared);
        ids.push(self.shared.bus.subscribe(
            topics::STRATEGY_DISABLE,
            Arc::new(move |_topic, payload| {
                let shared = Arc::clone(&shared);
                Box::pin(async move {
                    if let Some(name) = payload.get("strategy").and_then(Value::as_str) {
                        shared.set_enabled(name, false, true).await;
                    }
                    Ok(())
                })
            }),
        )?);

        info!(strategies = self.strategy_count(), "strategy engine started");
        Ok(())
    }

    /// Stop all strategies and drop the bus subscriptions.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for id in self.subscription_ids.lock().drain(..) {
            self.shared.bus.unsubscribe(id);
        }
        let strategies = self.shared.strategies.read();
        for slot in strategies.values() {
            slot.lock().stop();
        }
        info!("strategy engine stopped");
    }

    /// Config-reload hook: synchronize each strategy's enabled flag with
    /// `strategies.<name>.enabled`. Names missing from the map keep their
    /// current state.
    pub async fn sync_from_config(&self, enabled_by_name: &HashMap<String, bool>) {
        let names: Vec<String> = {
            let strategies = self.shared.strategies.read();
            strategies.keys().cloned().collect()
        };
        for name in names {
            if let Some(&enabled) = enabled_by_name.get(&name) {
                if self.is_strategy_enabled(&name) != enabled {
                    info!(strategy = %name, enabled, "config reload state sync");
                    self.shared.set_enabled(&name, enabled, true).await;
                }
            }
        }
    }
}
