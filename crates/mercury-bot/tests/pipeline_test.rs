//! End-to-end pipeline tests over the event bus.
//!
//! Wires real components (feed, strategy engine, risk, executor,
//! settlement, store) with a mock transport and oracle, then drives the
//! whole flow from a raw market-data frame to a claimed position.

use mercury_bus::EventBus;
use mercury_core::{ConditionId, Outcome, PositionStatus, TokenId};
use mercury_executor::{ClobClient, ExecutionConfig, ExecutionEngine, LegScript, MockClobClient};
use mercury_feed::{MarketDataService, MarketDataServiceConfig};
use mercury_risk::{RiskManager, RiskManagerConfig};
use mercury_settlement::{
    BackoffPolicy, ClaimBackend, DryRunClaimer, MarketInfo, MarketInfoSource, SettlementConfig,
    SettlementManager, SettlementResult,
};
use mercury_store::{PnlType, StateStore};
use mercury_strategy::{GabagoolConfig, GabagoolStrategy, StrategyEngine};
use mercury_ws::ConnectionConfig;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

struct ScriptedOracle {
    markets: Mutex<HashMap<ConditionId, MarketInfo>>,
}

impl ScriptedOracle {
    fn new() -> Self {
        Self {
            markets: Mutex::new(HashMap::new()),
        }
    }

    fn resolve(&self, condition_id: &str, outcome: Outcome) {
        let id = ConditionId::from(condition_id);
        self.markets
            .lock()
            .insert(id.clone(), MarketInfo::resolved(id, outcome));
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

struct Pipeline {
    bus: Arc<EventBus>,
    store: Arc<StateStore>,
    feed: Arc<MarketDataService>,
    clob: Arc<MockClobClient>,
    oracle: Arc<ScriptedOracle>,
    settlement: Arc<SettlementManager>,
    risk: Arc<RiskManager>,
}

async fn pipeline() -> Pipeline {
    let bus = Arc::new(EventBus::new());
    let store = Arc::new(StateStore::open_in_memory().unwrap());

    let feed = Arc::new(MarketDataService::new(
        MarketDataServiceConfig {
            connection: ConnectionConfig {
                // Unroutable on purpose: frames are injected directly.
                url: "ws://127.0.0.1:1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        },
        Arc::clone(&bus),
    ));

    let engine = Arc::new(StrategyEngine::new(Arc::clone(&bus)));
    engine
        .register_strategy(Box::new(
            GabagoolStrategy::new(GabagoolConfig {
                max_trade_size_usd: dec!(10),
                markets: vec![ConditionId::from("0xcond")],
                ..Default::default()
            })
            .unwrap(),
        ))
        .unwrap();

    let risk = Arc::new(RiskManager::new(
        RiskManagerConfig::default(),
        Arc::clone(&bus),
    ));

    let clob = Arc::new(MockClobClient::new());
    let executor = Arc::new(ExecutionEngine::new(
        ExecutionConfig {
            dry_run: true,
            ..Default::default()
        },
        Arc::clone(&bus),
        Arc::clone(&clob) as Arc<dyn ClobClient>,
        Arc::clone(&feed) as Arc<dyn mercury_book::SnapshotSource>,
        Arc::clone(&store),
    ));

    let oracle = Arc::new(ScriptedOracle::new());
    let settlement = Arc::new(SettlementManager::new(
        SettlementConfig {
            check_interval_seconds: 3600,
            max_claim_attempts: 5,
            backoff: BackoffPolicy::default(),
        },
        Arc::clone(&bus),
        Arc::clone(&store),
        Arc::clone(&oracle) as Arc<dyn MarketInfoSource>,
        Arc::new(DryRunClaimer) as Arc<dyn ClaimBackend>,
    ));

    risk.start().unwrap();
    executor.start().unwrap();
    settlement.start().unwrap();
    engine.start().unwrap();
    feed.start();
    feed.subscribe_market(
        ConditionId::from("0xcond"),
        TokenId::from("tok-yes"),
        TokenId::from("tok-no"),
    )
    .await
    .unwrap();

    Pipeline {
        bus,
        store,
        feed,
        clob,
        oracle,
        settlement,
        risk,
    }
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
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

/// Feed both sides so the second snapshot carries the full spread.
async fn inject_arbitrage_books(feed: &MarketDataService) {
    feed.process_text(
        r#"{"asset_id": "tok-yes", "bids": [], "asks": [{"price": "0.48", "size": "100"}]}"#,
    )
    .await;
    feed.process_text(
        r#"{"asset_id": "tok-no", "bids": [], "asks": [{"price": "0.50", "size": "100"}]}"#,
    )
    .await;
}

#[tokio::test]
async fn test_frame_to_claimed_position() {
    let p = pipeline().await;
    let mut signal_rx = collect(&p.bus, "signal.*");
    let mut approved_rx = collect(&p.bus, "risk.approved.*");
    let mut opened_rx = collect(&p.bus, "position.opened");
    let mut claimed_rx = collect(&p.bus, "settlement.claimed");

    inject_arbitrage_books(&p.feed).await;

    // Strategy fires on the arbitrage spread.
    let (_, signal) = recv(&mut signal_rx).await;
    assert_eq!(signal["signal_type"], "ARBITRAGE");
    assert_eq!(signal["yes_price"], "0.48");
    assert_eq!(signal["no_price"], "0.50");

    // Risk approves it untouched.
    let (_, approval) = recv(&mut approved_rx).await;
    assert_eq!(approval["approved_size_usd"], signal["target_size_usd"]);

    // Executor fills both legs and opens a hedged position.
    let (_, opened) = recv(&mut opened_rx).await;
    assert_eq!(opened["hedge_ratio"], "1");
    let position_id = opened["position_id"].as_str().unwrap().to_string();

    // Both transport orders were FOK buys.
    let placed = p.clob.placed_orders();
    assert_eq!(placed.len(), 2);
    assert!(placed
        .iter()
        .all(|o| o.side == mercury_core::OrderSide::Buy));

    // Market resolves YES; the settlement cycle claims the position.
    p.oracle.resolve("0xcond", Outcome::Yes);
    p.settlement.run_settlement_cycle().await.unwrap();

    let (_, claimed) = recv(&mut claimed_rx).await;
    assert_eq!(claimed["position_id"], position_id.as_str());
    assert_eq!(claimed["resolution"], "YES");
    assert_eq!(claimed["dry_run"], true);
    // 10 hedged pairs pay $10 against a $9.80 cost.
    assert_eq!(claimed["proceeds"], "10.00");
    assert_eq!(claimed["profit"], "0.20");

    let position = p.store.get_position(&position_id).unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Claimed);
    assert_eq!(position.realized_pnl, Some(dec!(0.20)));

    // Ledger credited exactly once, and the risk manager saw the P&L.
    assert_eq!(
        p.store
            .realized_pnl_for(&position_id, PnlType::Settlement)
            .unwrap(),
        Some(dec!(0.20))
    );
    // Give the risk handler a beat to consume settlement.claimed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(p.risk.snapshot().daily_pnl, dec!(0.20));

    // A second cycle is a no-op: nothing left to claim.
    p.settlement.run_settlement_cycle().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(p.risk.snapshot().daily_pnl, dec!(0.20));
}

#[tokio::test]
async fn test_partial_fill_held_to_losing_resolution() {
    let p = pipeline().await;
    p.clob.script(
        TokenId::from("tok-no"),
        LegScript::Reject("FOK kill".into()),
    );
    let mut partial_rx = collect(&p.bus, "execution.partial_fill");
    let mut claimed_rx = collect(&p.bus, "settlement.claimed");

    inject_arbitrage_books(&p.feed).await;

    let (_, partial) = recv(&mut partial_rx).await;
    assert_eq!(partial["reason"], "Position held");
    assert_eq!(partial["held_side"], "YES");
    let position_id = partial["position_id"].as_str().unwrap().to_string();

    // Nothing was sold and nothing matched was cancelled.
    assert!(p
        .clob
        .placed_orders()
        .iter()
        .all(|o| o.side == mercury_core::OrderSide::Buy));
    assert!(p.clob.cancelled_orders().is_empty());

    let position = p.store.get_position(&position_id).unwrap().unwrap();
    assert!(!position.is_hedged());
    assert_eq!(position.yes_shares, mercury_core::Size::new(dec!(10)));

    // The held YES leg loses when the market resolves NO.
    p.oracle.resolve("0xcond", Outcome::No);
    p.settlement.run_settlement_cycle().await.unwrap();

    let (_, claimed) = recv(&mut claimed_rx).await;
    assert_eq!(claimed["proceeds"], "0.00");
    assert_eq!(claimed["side"], "YES");

    let position = p.store.get_position(&position_id).unwrap().unwrap();
    assert_eq!(position.status, PositionStatus::Claimed);
    // Cost of the held leg is fully written off.
    assert_eq!(position.realized_pnl, Some(dec!(-4.80)));
}

#[tokio::test]
async fn test_halted_breaker_blocks_the_pipeline() {
    let p = pipeline().await;
    let mut rejected_rx = collect(&p.bus, "risk.rejected.*");

    // Drive the breaker to HALT before any market data arrives.
    for _ in 0..5 {
        p.risk.record_failure();
    }
    assert!(p.risk.circuit_breaker_state().is_halted());

    inject_arbitrage_books(&p.feed).await;

    let (_, rejected) = recv(&mut rejected_rx).await;
    assert_eq!(rejected["reason"], "Circuit breaker triggered");

    // No orders ever reached the transport.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(p.clob.placed_orders().is_empty());
    assert_eq!(p.store.open_positions_count().unwrap(), 0);
}
