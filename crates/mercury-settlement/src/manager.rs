//! Settlement manager implementation.
//!
//! One poll loop. Per tick: read the due PENDING queue entries, consult
//! the oracle, compute winner-pays-one-dollar proceeds, claim, credit
//! the ledger once, publish the outcome. Failures back off exponentially
//! and abandon at the attempt cap.

use crate::backoff::BackoffPolicy;
use crate::claim::ClaimBackend;
use crate::error::SettlementResult;
use crate::oracle::MarketInfoSource;
use chrono::Utc;
use mercury_bus::{EventBus, SubscriptionId};
use mercury_core::events::{
    topics, SettlementClaimedEvent, SettlementFailedEvent, SettlementQueuedEvent,
};
use mercury_core::{ConditionId, Outcome, Position, PositionStatus};
use mercury_store::{ClaimableEntry, PnlType, RealizedPnlEntry, SettlementStatus, StateStore};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outbound claim calls are bounded; a hung chain RPC must not stall the
/// whole poll loop.
const CLAIM_TIMEOUT: Duration = Duration::from_secs(120);

/// Settlement configuration.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Seconds between poll ticks.
    pub check_interval_seconds: u64,
    /// Claim attempts before an entry is abandoned.
    pub max_claim_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 60,
            max_claim_attempts: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// The settlement manager.
pub struct SettlementManager {
    config: SettlementConfig,
    bus: Arc<EventBus>,
    store: Arc<StateStore>,
    oracle: Arc<dyn MarketInfoSource>,
    claimer: Arc<dyn ClaimBackend>,
    subscription_ids: Mutex<Vec<SubscriptionId>>,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl SettlementManager {
    pub fn new(
        config: SettlementConfig,
        bus: Arc<EventBus>,
        store: Arc<StateStore>,
        oracle: Arc<dyn MarketInfoSource>,
        claimer: Arc<dyn ClaimBackend>,
    ) -> Self {
        Self {
            config,
            bus,
            store,
            oracle,
            claimer,
            subscription_ids: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Wire the `position.opened` enqueue hook and spawn the poll loop.
    pub fn start(self: &Arc<Self>) -> SettlementResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let manager = Arc::clone(self);
        let id = self.bus.subscribe(
            topics::POSITION_OPENED,
            Arc::new(move |_topic, payload| {
                let manager = Arc::clone(&manager);
                Box::pin(async move {
                    manager.enqueue_from_event(payload).await;
                    Ok(())
                })
            }),
        )?;
        self.subscription_ids.lock().push(id);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(
                manager.config.check_interval_seconds.max(1),
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.run_settlement_cycle().await {
                            warn!(error = %e, "settlement cycle failed");
                        }
                    }
                }
            }
            debug!("settlement poll loop exited");
        });

        info!(
            interval_secs = self.config.check_interval_seconds,
            max_attempts = self.config.max_claim_attempts,
            "settlement manager started"
        );
        Ok(())
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        for id in self.subscription_ids.lock().drain(..) {
            self.bus.unsubscribe(id);
        }
        info!("settlement manager stopped");
    }

    async fn enqueue_from_event(&self, payload: Value) {
        let Some(position_id) = payload.get("position_id").and_then(Value::as_str) else {
            warn!("position.opened without position_id");
            return;
        };
        let Some(market_id) = payload.get("market_id").and_then(Value::as_str) else {
            warn!("position.opened without market_id");
            return;
        };
        let market_id = ConditionId::from(market_id);

        if let Err(e) = self
            .store
            .queue_for_settlement(position_id, &market_id, &market_id)
        {
            warn!(position_id, error = %e, "settlement enqueue failed");
            return;
        }

        let event = SettlementQueuedEvent {
            position_id: position_id.to_string(),
            market_id: market_id.clone(),
            condition_id: market_id,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.bus.publish_event(&event).await {
            warn!(error = %e, "settlement.queued publish failed");
        }
    }

    /// One poll tick over all due entries.
    pub async fn run_settlement_cycle(&self) -> SettlementResult<()> {
        let due = self
            .store
            .get_claimable_positions(self.config.max_claim_attempts, Utc::now())?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(count = due.len(), "settlement entries due");

        for entry in due {
            if let Err(e) = self.process_entry(&entry).await {
                warn!(
                    position_id = %entry.position.position_id,
                    error = %e,
                    "settlement entry processing failed"
                );
            }
        }
        Ok(())
    }

    async fn process_entry(&self, entry: &ClaimableEntry) -> SettlementResult<()> {
        if entry.position.status != PositionStatus::Open {
            // Queue row out of sync with the position; close it out.
            self.store.mark_settlement_attempt(
                entry.queue_id,
                SettlementStatus::Claimed,
                None,
                None,
            )?;
            return Ok(());
        }

        let info = match self
            .oracle
            .get_market_info(&entry.condition_id, true)
            .await
        {
            Ok(Some(info)) => info,
            Ok(None) => {
                return self
                    .handle_claim_failure(entry, "market not found in oracle")
                    .await;
            }
            Err(e) => {
                return self.handle_claim_failure(entry, &e.to_string()).await;
            }
        };

        // Unresolved markets are skipped without consuming an attempt.
        let Some(resolution) = info.resolution.filter(|_| info.resolved) else {
            debug!(condition_id = %entry.condition_id, "not yet resolved");
            return Ok(());
        };

        // A held side pays $1 per share iff it matches the resolution.
        let winning_shares = match resolution {
            Outcome::Yes => entry.position.yes_shares,
            Outcome::No => entry.position.no_shares,
        };
        let proceeds = winning_shares.inner() * dec!(1.00);
        let profit = proceeds - entry.position.cost_basis;

        let redeem = tokio::time::timeout(
            CLAIM_TIMEOUT,
            self.claimer.redeem(&entry.condition_id, resolution),
        )
        .await
        .unwrap_or_else(|_| {
            Err(crate::error::SettlementError::Claim(format!(
                "claim timed out after {}s",
                CLAIM_TIMEOUT.as_secs()
            )))
        });

        match redeem {
            Ok(receipt) => {
                let now = Utc::now();
                let credited = self.store.insert_realized_pnl(&RealizedPnlEntry {
                    trade_id: entry.position.position_id.clone(),
                    trade_date: now.date_naive(),
                    pnl_amount: profit,
                    pnl_type: PnlType::Settlement,
                    notes: Some(format!(
                        "market {} resolved {resolution}",
                        entry.condition_id
                    )),
                })?;
                if !credited {
                    debug!(
                        position_id = %entry.position.position_id,
                        "ledger row already present, not double-crediting"
                    );
                }

                self.store.mark_position_claimed(
                    &entry.position.position_id,
                    proceeds,
                    profit,
                    now,
                )?;
                self.store.mark_settlement_attempt(
                    entry.queue_id,
                    SettlementStatus::Claimed,
                    None,
                    None,
                )?;

                info!(
                    position_id = %entry.position.position_id,
                    %resolution,
                    proceeds = %proceeds,
                    profit = %profit,
                    "position claimed"
                );
                let event = SettlementClaimedEvent {
                    position_id: entry.position.position_id.clone(),
                    market_id: entry.position.market_id.clone(),
                    condition_id: entry.condition_id.clone(),
                    resolution,
                    proceeds,
                    profit,
                    side: position_side(&entry.position),
                    tx_hash: receipt.tx_hash,
                    gas_used: receipt.gas_used,
                    dry_run: receipt.dry_run,
                    attempts: entry.attempts + 1,
                    timestamp: now,
                };
                self.bus.publish_event(&event).await?;
                Ok(())
            }
            Err(e) => self.handle_claim_failure(entry, &e.to_string()).await,
        }
    }

    async fn handle_claim_failure(
        &self,
        entry: &ClaimableEntry,
        error: &str,
    ) -> SettlementResult<()> {
        let attempts = entry.attempts + 1;
        let is_permanent = attempts >= self.config.max_claim_attempts;
        let now = Utc::now();
        let mut next_retry_at = None;

        if is_permanent {
            warn!(
                position_id = %entry.position.position_id,
                attempts,
                error,
                "claim permanently failed, abandoning"
            );
            self.store.mark_settlement_attempt(
                entry.queue_id,
                SettlementStatus::Abandoned,
                Some(error),
                None,
            )?;
            self.store
                .mark_position_abandoned(&entry.position.position_id, now)?;
        } else {
            let delay = self.config.backoff.delay(attempts);
            let retry_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
            warn!(
                position_id = %entry.position.position_id,
                attempts,
                retry_in_secs = delay.as_secs(),
                error,
                "claim failed, will retry"
            );
            self.store.mark_settlement_attempt(
                entry.queue_id,
                SettlementStatus::Pending,
                Some(error),
                Some(retry_at),
            )?;
            next_retry_at = Some(retry_at);
        }

        let event = SettlementFailedEvent {
            position_id: entry.position.position_id.clone(),
            condition_id: entry.condition_id.clone(),
            attempts,
            error: error.to_string(),
            is_permanent,
            next_retry_at,
            timestamp: now,
        };
        self.bus.publish_event(&event).await?;

        if is_permanent {
            self.bus
                .publish(
                    topics::SETTLEMENT_ALERT,
                    json!({
                        "position_id": entry.position.position_id,
                        "condition_id": entry.condition_id.as_str(),
                        "attempts": attempts,
                        "error": error,
                    }),
                )
                .await?;
        }
        Ok(())
    }
}

fn position_side(position: &Position) -> String {
    match (
        position.yes_shares.is_positive(),
        position.no_shares.is_positive(),
    ) {
        (true, true) => "BOTH".to_string(),
        (true, false) => "YES".to_string(),
        (false, true) => "NO".to_string(),
        (false, false) => "NONE".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::TxReceipt;
    use crate::oracle::{BoxFuture, MarketInfo};
    use mercury_core::{ExecutionStatus, Size, TokenId};
    use mercury_store::Trade;
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct ScriptedOracle {
        markets: Mutex<HashMap<ConditionId, MarketInfo>>,
    }

    impl ScriptedOracle {
        fn new() -> Self {
            Self {
                markets: Mutex::new(HashMap::new()),
            }
        }

        fn set(&self, info: MarketInfo) {
            self.markets.lock().insert(info.condition_id.clone(), info);
        }
    }

    impl MarketInfoSource for ScriptedOracle {
        fn get_market_info(
            &self,
            condition_id: &ConditionId,
            _use_cache: bool,
        ) -> BoxFuture<'_, SettlementResult<Option<MarketInfo>>> {
            let info = self.markets.lock().get(condition_id).cloned();
            Box::pin(async move { Ok(info) })
        }
    }

    struct ScriptedClaimer {
        fail_times: AtomicU32,
        calls: AtomicU32,
    }

    impl ScriptedClaimer {
        fn new(fail_times: u32) -> Self {
            Self {
                fail_times: AtomicU32::new(fail_times),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ClaimBackend for ScriptedClaimer {
        fn redeem(
            &self,
            _condition_id: &ConditionId,
            _side: Outcome,
        ) -> BoxFuture<'_, SettlementResult<TxReceipt>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let remaining = self.fail_times.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.fail_times.store(remaining - 1, Ordering::SeqCst);
                    return Err(crate::error::SettlementError::Claim(
                        "rpc unavailable".into(),
                    ));
                }
                Ok(TxReceipt::synthetic())
            })
        }
    }

    struct Harness {
        manager: Arc<SettlementManager>,
        store: Arc<StateStore>,
        oracle: Arc<ScriptedOracle>,
        claimer: Arc<ScriptedClaimer>,
        bus: Arc<EventBus>,
    }

    fn harness(max_attempts: u32, claim_failures: u32) -> Harness {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let oracle = Arc::new(ScriptedOracle::new());
        let claimer = Arc::new(ScriptedClaimer::new(claim_failures));
        let manager = Arc::new(SettlementManager::new(
            SettlementConfig {
                check_interval_seconds: 3600,
                max_claim_attempts: max_attempts,
                backoff: BackoffPolicy {
                    base_secs: 60,
                    cap_secs: 3600,
                    jitter_pct: 0,
                },
            },
            Arc::clone(&bus),
            Arc::clone(&store),
            Arc::clone(&oracle) as Arc<dyn MarketInfoSource>,
            Arc::clone(&claimer) as Arc<dyn ClaimBackend>,
        ));
        Harness {
            manager,
            store,
            oracle,
            claimer,
            bus,
        }
    }

    fn seed_position(store: &StateStore, yes: Decimal, no: Decimal, cost: Decimal) -> Position {
        let now = Utc::now();
        let trade = Trade {
            trade_id: "trade-1".into(),
            market_id: ConditionId::from("0xcond"),
            strategy: "gabagool".into(),
            side: "ARBITRAGE".into(),
            yes_token_id: TokenId::from("tok-yes"),
            no_token_id: TokenId::from("tok-no"),
            yes_size: Size::new(yes),
            no_size: Size::new(no),
            yes_price: dec!(0.45),
            no_price: dec!(0.50),
            total_cost: cost,
            guaranteed_pnl: dec!(0),
            status: "FILLED".into(),
            execution_status: ExecutionStatus::FullFill,
            pre_fill_yes_depth: Size::new(dec!(100)),
            pre_fill_no_depth: Size::new(dec!(100)),
            dry_run: true,
            created_at: now,
            updated_at: now,
        };
        let position = Position::open(
            ConditionId::from("0xcond"),
            "trade-1",
            Size::new(yes),
            Size::new(no),
            cost,
        );
        store.record_execution(&trade, Some(&position), &[]).unwrap();
        position
    }

    fn collect(bus: &EventBus, pattern: &str) -> mpsc::UnboundedReceiver<(String, Value)> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(
            pattern,
            Arc::new(move |topic, payload| {
                let tx = tx.clone();
                Box::pin(async move {
                    tx.send((topic, payload)).ok();
                    Ok(())
                })
            }),
        )
        .unwrap();
        rx
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<(String, Value)>) -> (String, Value) {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("closed")
    }

    #[tokio::test]
    async fn test_winner_claim_first_try() {
        let h = harness(5, 0);
        let position = seed_position(&h.store, dec!(10), dec!(0), dec!(4.50));
        h.oracle.set(MarketInfo::resolved(
            ConditionId::from("0xcond"),
            Outcome::Yes,
        ));
        let mut claimed_rx = collect(&h.bus, "settlement.claimed");

        h.manager.run_settlement_cycle().await.unwrap();

        let loaded = h.store.get_position(&position.position_id).unwrap().unwrap();
        assert_eq!(loaded.status, PositionStatus::Claimed);
        assert_eq!(loaded.settlement_proceeds, Some(dec!(10)));
        assert_eq!(loaded.realized_pnl, Some(dec!(5.50)));

        // Ledger written exactly once.
        assert_eq!(
            h.store
                .realized_pnl_for(&position.position_id, PnlType::Settlement)
                .unwrap(),
            Some(dec!(5.50))
        );

        let (_, payload) = recv(&mut claimed_rx).await;
        assert_eq!(payload["proceeds"], "10.00");
        assert_eq!(payload["profit"], "5.50");
        assert_eq!(payload["resolution"], "YES");
        assert_eq!(payload["side"], "YES");
        assert_eq!(payload["attempts"], 1);
        assert_eq!(payload["dry_run"], true);
        assert_eq!(h.claimer.calls(), 1);

        // A second cycle has nothing left to do.
        h.manager.run_settlement_cycle().await.unwrap();
        assert_eq!(h.claimer.calls(), 1);
    }

    #[tokio::test]
    async fn test_losing_side_pays_zero() {
        let h = harness(5, 0);
        let position = seed_position(&h.store, dec!(0), dec!(10), dec!(4.80));
        h.oracle.set(MarketInfo::resolved(
            ConditionId::from("0xcond"),
            Outcome::Yes,
        ));

        h.manager.run_settlement_cycle().await.unwrap();

        let loaded = h.store.get_position(&position.position_id).unwrap().unwrap();
        assert_eq!(loaded.settlement_proceeds, Some(dec!(0)));
        assert_eq!(loaded.realized_pnl, Some(dec!(-4.80)));
    }

    #[tokio::test]
    async fn test_unresolved_market_skipped_without_attempt() {
        let h = harness(5, 0);
        seed_position(&h.store, dec!(10), dec!(10), dec!(9.80));
        h.oracle
            .set(MarketInfo::unresolved(ConditionId::from("0xcond")));

        h.manager.run_settlement_cycle().await.unwrap();
        assert_eq!(h.claimer.calls(), 0);

        // Entry still claimable with zero attempts consumed.
        let due = h.store.get_claimable_positions(5, Utc::now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_claim_failure_schedules_retry() {
        let h = harness(5, 1);
        seed_position(&h.store, dec!(10), dec!(10), dec!(9.80));
        h.oracle.set(MarketInfo::resolved(
            ConditionId::from("0xcond"),
            Outcome::No,
        ));
        let mut failed_rx = collect(&h.bus, "settlement.failed");

        h.manager.run_settlement_cycle().await.unwrap();
        assert_eq!(h.claimer.calls(), 1);

        let (_, payload) = recv(&mut failed_rx).await;
        assert_eq!(payload["is_permanent"], false);
        assert_eq!(payload["attempts"], 1);

        // Not due again until the backoff elapses.
        h.manager.run_settlement_cycle().await.unwrap();
        assert_eq!(h.claimer.calls(), 1);

        // After the retry window the claim succeeds.
        let later = Utc::now() + chrono::Duration::seconds(61);
        let due = h.store.get_claimable_positions(5, later).unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_abandons() {
        let h = harness(1, 5);
        let position = seed_position(&h.store, dec!(10), dec!(10), dec!(9.80));
        h.oracle.set(MarketInfo::resolved(
            ConditionId::from("0xcond"),
            Outcome::Yes,
        ));
        let mut failed_rx = collect(&h.bus, "settlement.failed");
        let mut alert_rx = collect(&h.bus, "settlement.alert");

        h.manager.run_settlement_cycle().await.unwrap();

        let (_, payload) = recv(&mut failed_rx).await;
        assert_eq!(payload["is_permanent"], true);
        recv(&mut alert_rx).await;

        let loaded = h.store.get_position(&position.position_id).unwrap().unwrap();
        assert_eq!(loaded.status, PositionStatus::Abandoned);

        // Abandoned entries never come due again.
        h.manager.run_settlement_cycle().await.unwrap();
        assert_eq!(h.claimer.calls(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_from_position_opened_event() {
        let h = harness(5, 0);
        // Position persisted outside record_execution to exercise the
        // event-driven enqueue path.
        let position = Position::open(
            ConditionId::from("0xother"),
            "trade-9",
            Size::new(dec!(5)),
            Size::new(dec!(5)),
            dec!(4.90),
        );
        h.store.save_position(&position).unwrap();
        h.manager.start().unwrap();
        let mut queued_rx = collect(&h.bus, "settlement.queued");

        h.bus
            .publish(
                topics::POSITION_OPENED,
                json!({
                    "position_id": position.position_id,
                    "market_id": "0xother",
                }),
            )
            .await
            .unwrap();

        let (_, payload) = recv(&mut queued_rx).await;
        assert_eq!(payload["condition_id"], "0xother");

        let due = h.store.get_claimable_positions(5, Utc::now()).unwrap();
        assert_eq!(due.len(), 1);
        h.manager.stop();
    }
}
