//! Execution engine implementation.
//!
//! The one non-negotiable rule lives here: a MATCHED leg is never
//! cancelled and never sold back. Selling the held leg at market locks
//! in a loss against holding to resolution, where the winning side pays
//! a dollar per share. Partial fills therefore become one-sided
//! positions that exit through the settlement path.

use crate::clob::{ClobClient, DualLegRequest, OrderRequest, PlacementMode};
use crate::error::{ExecutorError, ExecutorResult};
use chrono::Utc;
use mercury_book::SnapshotSource;
use mercury_bus::{EventBus, SubscriptionId};
use mercury_core::events::topics;
use mercury_core::{
    ConditionId, DualLegOrderResult, ExecutionStatus, Fill, Order, OrderSide, OrderStatus,
    Outcome, Position, Price, SignalType, Size, TimeInForce, TokenId,
};
use mercury_store::{StateStore, Trade};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Execution configuration.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Fraction of observed depth one order may consume. Default 0.50.
    pub max_liquidity_consumption_pct: Decimal,
    /// Parallel (preferred) vs sequential dual-leg placement.
    pub parallel: bool,
    /// Dry-run trades are stamped as such in the store.
    pub dry_run: bool,
    /// Ask levels summed for the precheck. Default 3.
    pub liquidity_depth_levels: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_liquidity_consumption_pct: dec!(0.50),
            parallel: true,
            dry_run: false,
            liquidity_depth_levels: 3,
        }
    }
}

/// A risk-approved signal, as decoded from `risk.approved.<id>`.
#[derive(Debug, Clone)]
pub struct Approval {
    pub signal_id: String,
    pub strategy_name: String,
    pub market_id: ConditionId,
    pub signal_type: SignalType,
    pub approved_size_usd: Decimal,
    pub yes_price: Price,
    pub no_price: Price,
    pub yes_token: TokenId,
    pub no_token: TokenId,
}

/// What one approval turned into.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Nothing was sent to the transport. Depth is still reported for
    /// telemetry.
    Aborted {
        reason: String,
        pre_fill_yes_depth: Size,
        pre_fill_no_depth: Size,
    },
    Completed {
        status: ExecutionStatus,
        result: DualLegOrderResult,
        trade_id: Option<String>,
        position_id: Option<String>,
        error: Option<String>,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Completed {
                status: ExecutionStatus::FullFill,
                ..
            }
        )
    }
}

/// Round a share count DOWN to the nearest value whose cost is a clean
/// cent amount on BOTH legs.
///
/// With prices on a 1/10000 grid and shares on a 1/100 grid, the cost
/// `k/100 * a/10000` lands on the cent grid exactly when `k * a` is a
/// multiple of 10^4; the valid share counts are therefore multiples of
/// `lcm` of each leg's step.
pub fn round_shares_to_clean(shares: Decimal, yes_price: Price, no_price: Price) -> Size {
    fn gcd(mut a: u64, mut b: u64) -> u64 {
        while b != 0 {
            (a, b) = (b, a % b);
        }
        a
    }

    let step = |price: Price| -> Option<u64> {
        let a = (price.inner() * dec!(10000)).to_u64()?;
        if a == 0 {
            return None;
        }
        Some(10_000 / gcd(a, 10_000))
    };

    let (Some(yes_step), Some(no_step)) = (step(yes_price), step(no_price)) else {
        return Size::ZERO;
    };
    let lcm = yes_step / gcd(yes_step, no_step) * no_step;

    let Some(hundredths) = (shares * dec!(100)).floor().to_u64() else {
        return Size::ZERO;
    };
    let clean = hundredths / lcm * lcm;
    Size::new(Decimal::from(clean) / dec!(100))
}

/// The execution engine.
pub struct ExecutionEngine {
    config: ExecutionConfig,
    bus: Arc<EventBus>,
    clob: Arc<dyn ClobClient>,
    books: Arc<dyn SnapshotSource>,
    store: Arc<StateStore>,
    subscription_ids: Mutex<Vec<SubscriptionId>>,
    in_flight: Arc<AtomicU64>,
    running: AtomicBool,
}

impl ExecutionEngine {
    pub fn new(
        config: ExecutionConfig,
        bus: Arc<EventBus>,
        clob: Arc<dyn ClobClient>,
        books: Arc<dyn SnapshotSource>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            config,
            bus,
            clob,
            books,
            store,
            subscription_ids: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicU64::new(0)),
            running: AtomicBool::new(false),
        }
    }

    /// Orders currently being placed; the shutdown drain polls this.
    pub fn in_flight_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.in_flight)
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Subscribe to approvals.
    pub fn start(self: &Arc<Self>) -> ExecutorResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let engine = Arc::clone(self);
        let id = self.bus.subscribe(
            "risk.approved.*",
            Arc::new(move |_topic, payload| {
                let engine = Arc::clone(&engine);
                Box::pin(async move {
                    engine.handle_approval(payload).await;
                    Ok(())
                })
            }),
        )?;
        self.subscription_ids.lock().push(id);
        info!("execution engine started");
        Ok(())
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for id in self.subscription_ids.lock().drain(..) {
            self.bus.unsubscribe(id);
        }
        info!("execution engine stopped");
    }

    async fn handle_approval(&self, payload: Value) {
        let approval = match self.parse_approval(&payload) {
            Ok(approval) => approval,
            Err(e) => {
                warn!(error = %e, "dropping malformed approval");
                return;
            }
        };

        if approval.signal_type != SignalType::Arbitrage {
            // Single-leg execution is not wired; the dual-leg path assumes
            // the ARBITRAGE shape.
            let _ = self
                .bus
                .publish(
                    topics::EXECUTION_SKIPPED,
                    json!({
                        "signal_id": approval.signal_id,
                        "market_id": approval.market_id.as_str(),
                        "reason": format!(
                            "Signal type {} is not executable",
                            approval.signal_type
                        ),
                    }),
                )
                .await;
            return;
        }

        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = self.execute(&approval).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = outcome {
            warn!(signal_id = %approval.signal_id, error = %e, "execution error");
        }
    }

    fn parse_approval(&self, payload: &Value) -> ExecutorResult<Approval> {
        let field = |name: &str| -> ExecutorResult<String> {
            payload
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ExecutorError::BadApproval(format!("missing {name}")))
        };
        let decimal = |name: &str| -> ExecutorResult<Decimal> {
            field(name)?
                .parse()
                .map_err(|_| ExecutorError::BadApproval(format!("bad decimal {name}")))
        };

        let market_id = ConditionId::new(field("market_id")?);
        let snapshot = self
            .books
            .market_snapshot(&market_id)
            .ok_or_else(|| ExecutorError::NoOrderBook(market_id.to_string()))?;

        Ok(Approval {
            signal_id: field("signal_id")?,
            strategy_name: field("strategy_name").unwrap_or_else(|_| "unknown".to_string()),
            market_id,
            signal_type: serde_json::from_value(
                payload
                    .get("signal_type")
                    .cloned()
                    .unwrap_or(Value::Null),
            )
            .map_err(|e| ExecutorError::BadApproval(format!("bad signal_type: {e}")))?,
            approved_size_usd: decimal("approved_size_usd")?,
            yes_price: Price::new(decimal("yes_price")?),
            no_price: Price::new(decimal("no_price")?),
            yes_token: snapshot.yes.token_id,
            no_token: snapshot.no.token_id,
        })
    }

    /// Run the full §4.F pipeline for one approved arbitrage signal.
    pub async fn execute(&self, approval: &Approval) -> ExecutorResult<ExecutionOutcome> {
        let snapshot = self
            .books
            .market_snapshot(&approval.market_id)
            .ok_or_else(|| ExecutorError::NoOrderBook(approval.market_id.to_string()))?;

        let depth_levels = self.config.liquidity_depth_levels;
        let yes_depth = snapshot.yes.top_ask_size(depth_levels);
        let no_depth = snapshot.no.top_ask_size(depth_levels);

        let pair_cost = approval.yes_price.inner() + approval.no_price.inner();
        if pair_cost <= Decimal::ZERO {
            return self
                .abort(approval, "ARBITRAGE_INVALID: degenerate prices", yes_depth, no_depth)
                .await;
        }
        let shares_needed = approval.approved_size_usd / pair_cost;

        // 1. Liquidity precheck: never consume more than the configured
        //    fraction of the observed top-of-book depth.
        let max_pct = self.config.max_liquidity_consumption_pct;
        for (label, depth) in [("YES", yes_depth), ("NO", no_depth)] {
            let allowed = depth.inner() * max_pct;
            if shares_needed > allowed {
                let consumed_pct = if depth.is_positive() {
                    shares_needed / depth.inner() * dec!(100)
                } else {
                    dec!(100)
                };
                let reason = format!(
                    "Insufficient liquidity: {label} would consume {:.1}% (max {:.1}%)",
                    consumed_pct,
                    max_pct * dec!(100),
                );
                return self.abort(approval, &reason, yes_depth, no_depth).await;
            }
        }

        // 2. Arbitrage validity re-check against the approved prices.
        if pair_cost >= Decimal::ONE {
            return self
                .abort(approval, "ARBITRAGE_INVALID", yes_depth, no_depth)
                .await;
        }

        // 3. Share rounding: costs must land on the cent grid.
        let shares = round_shares_to_clean(shares_needed, approval.yes_price, approval.no_price);
        if shares.is_zero() {
            return self
                .abort(approval, "Rounded share count is zero", yes_depth, no_depth)
                .await;
        }

        // 4. Placement, both legs FOK.
        let request = DualLegRequest {
            market_id: approval.market_id.clone(),
            yes_token: approval.yes_token.clone(),
            no_token: approval.no_token.clone(),
            yes_price: approval.yes_price,
            yes_size: shares,
            no_price: approval.no_price,
            no_size: shares,
            tif: TimeInForce::Fok,
            mode: if self.config.parallel {
                PlacementMode::Parallel
            } else {
                PlacementMode::Sequential
            },
        };
        let (yes_order, no_order) = self.place_dual_leg(&request).await;

        let result = DualLegOrderResult {
            market_id: approval.market_id.clone(),
            yes_order,
            no_order,
            pre_fill_yes_depth: yes_depth,
            pre_fill_no_depth: no_depth,
        };

        // 5-7. Classify, enforce the hold policy, persist, publish.
        self.settle_outcome(approval, result).await
    }

    async fn abort(
        &self,
        approval: &Approval,
        reason: &str,
        pre_fill_yes_depth: Size,
        pre_fill_no_depth: Size,
    ) -> ExecutorResult<ExecutionOutcome> {
        info!(signal_id = %approval.signal_id, reason, "execution aborted");
        self.bus
            .publish(
                topics::EXECUTION_SKIPPED,
                json!({
                    "signal_id": approval.signal_id,
                    "market_id": approval.market_id.as_str(),
                    "reason": reason,
                    "pre_fill_yes_depth": pre_fill_yes_depth.to_string(),
                    "pre_fill_no_depth": pre_fill_no_depth.to_string(),
                }),
            )
            .await?;
        Ok(ExecutionOutcome::Aborted {
            reason: reason.to_string(),
            pre_fill_yes_depth,
            pre_fill_no_depth,
        })
    }

    /// Submit both legs. A transport error on one leg is treated as a
    /// rejection of that leg; the other leg's outcome still stands.
    async fn place_dual_leg(&self, request: &DualLegRequest) -> (Order, Order) {
        let yes_request = OrderRequest {
            token_id: request.yes_token.clone(),
            side: OrderSide::Buy,
            size: request.yes_size,
            price: request.yes_price,
            tif: request.tif,
        };
        let no_request = OrderRequest {
            token_id: request.no_token.clone(),
            side: OrderSide::Buy,
            size: request.no_size,
            price: request.no_price,
            tif: request.tif,
        };

        match request.mode {
            PlacementMode::Parallel => {
                let (yes, no) = tokio::join!(
                    self.clob.place_order(yes_request.clone()),
                    self.clob.place_order(no_request.clone())
                );
                (
                    yes.unwrap_or_else(|e| failed_order(&yes_request, &e.to_string())),
                    no.unwrap_or_else(|e| failed_order(&no_request, &e.to_string())),
                )
            }
            PlacementMode::Sequential => {
                let yes = self
                    .clob
                    .place_order(yes_request.clone())
                    .await
                    .unwrap_or_else(|e| failed_order(&yes_request, &e.to_string()));
                let no = self
                    .clob
                    .place_order(no_request.clone())
                    .await
                    .unwrap_or_else(|e| failed_order(&no_request, &e.to_string()));
                (yes, no)
            }
        }
    }

    async fn settle_outcome(
        &self,
        approval: &Approval,
        result: DualLegOrderResult,
    ) -> ExecutorResult<ExecutionOutcome> {
        // Hold policy: cancel a LIVE (unmatched, resting) counterpart;
        // a MATCHED leg is untouchable.
        for order in [&result.yes_order, &result.no_order] {
            if order.status == OrderStatus::Live {
                if let Err(e) = self.clob.cancel_order(&order.order_id).await {
                    warn!(order_id = %order.order_id, error = %e, "live leg cancel failed");
                }
            }
        }

        if result.no_fill() {
            let reason = format!(
                "No fill: YES {} / NO {}",
                result.yes_order.status, result.no_order.status
            );
            info!(signal_id = %approval.signal_id, %reason, "no fill");
            self.bus
                .publish(
                    topics::EXECUTION_FAILED,
                    json!({
                        "signal_id": approval.signal_id,
                        "market_id": approval.market_id.as_str(),
                        "reason": reason.clone(),
                    }),
                )
                .await?;
            return Ok(ExecutionOutcome::Completed {
                status: ExecutionStatus::NoFill,
                result,
                trade_id: None,
                position_id: None,
                error: Some(reason),
            });
        }

        let status = if result.both_filled() {
            ExecutionStatus::FullFill
        } else {
            ExecutionStatus::PartialFill
        };

        let trade_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let trade = Trade {
            trade_id: trade_id.clone(),
            market_id: approval.market_id.clone(),
            strategy: approval.strategy_name.clone(),
            side: "ARBITRAGE".to_string(),
            yes_token_id: approval.yes_token.clone(),
            no_token_id: approval.no_token.clone(),
            yes_size: result.yes_filled(),
            no_size: result.no_filled(),
            yes_price: approval.yes_price.inner(),
            no_price: approval.no_price.inner(),
            total_cost: result.total_cost(),
            guaranteed_pnl: result.guaranteed_pnl(),
            status: if status == ExecutionStatus::FullFill {
                "FILLED".to_string()
            } else {
                "PARTIAL".to_string()
            },
            execution_status: status,
            pre_fill_yes_depth: result.pre_fill_yes_depth,
            pre_fill_no_depth: result.pre_fill_no_depth,
            dry_run: self.config.dry_run,
            created_at: now,
            updated_at: now,
        };

        let position = Position::open(
            approval.market_id.clone(),
            trade_id.clone(),
            result.yes_filled(),
            result.no_filled(),
            result.total_cost(),
        );

        let mut fills = Vec::new();
        if result.yes_order.status.is_matched() {
            fills.push(Fill::from_order(
                &result.yes_order,
                approval.market_id.clone(),
                Outcome::Yes,
            ));
        }
        if result.no_order.status.is_matched() {
            fills.push(Fill::from_order(
                &result.no_order,
                approval.market_id.clone(),
                Outcome::No,
            ));
        }

        self.store.record_execution(&trade, Some(&position), &fills)?;

        for fill in &fills {
            self.bus
                .publish(
                    topics::ORDER_FILLED,
                    json!({
                        "order_id": fill.order_id,
                        "trade_id": trade_id,
                        "market_id": fill.market_id.as_str(),
                        "token_id": fill.token_id.as_str(),
                        "outcome": fill.outcome.to_string(),
                        "side": fill.side.to_string(),
                        "filled_size": fill.filled_size.to_string(),
                        "filled_price": fill.filled_price.to_string(),
                        "cost": fill.cost.to_string(),
                        "slippage_cents": fill.slippage_cents.to_string(),
                    }),
                )
                .await?;
        }

        if status == ExecutionStatus::FullFill {
            info!(
                signal_id = %approval.signal_id,
                trade_id = %trade_id,
                shares = %result.yes_filled(),
                cost = %result.total_cost(),
                guaranteed_pnl = %result.guaranteed_pnl(),
                "full fill"
            );
            self.bus
                .publish(
                    topics::POSITION_OPENED,
                    json!({
                        "position_id": position.position_id,
                        "market_id": approval.market_id.as_str(),
                        "trade_id": trade_id,
                        "yes_shares": position.yes_shares.to_string(),
                        "no_shares": position.no_shares.to_string(),
                        "cost_basis": position.cost_basis.to_string(),
                        "hedge_ratio": position.hedge_ratio().to_string(),
                    }),
                )
                .await?;
            return Ok(ExecutionOutcome::Completed {
                status,
                result,
                trade_id: Some(trade_id),
                position_id: Some(position.position_id),
                error: None,
            });
        }

        // Partial fill: the held leg stays. It exits through settlement.
        let (held, missing) = if result.yes_order.status.is_matched() {
            ("YES", "NO")
        } else {
            ("NO", "YES")
        };
        let error = format!(
            "PARTIAL FILL: {held} leg matched, {missing} leg did not. Position held until resolution"
        );
        warn!(
            signal_id = %approval.signal_id,
            trade_id = %trade_id,
            held,
            "partial fill, holding"
        );
        self.bus
            .publish(
                topics::EXECUTION_PARTIAL,
                json!({
                    "signal_id": approval.signal_id,
                    "market_id": approval.market_id.as_str(),
                    "trade_id": trade_id,
                    "position_id": position.position_id,
                    "held_side": held,
                    "hedge_ratio": position.hedge_ratio().to_string(),
                    "reason": "Position held",
                }),
            )
            .await?;

        Ok(ExecutionOutcome::Completed {
            status,
            result,
            trade_id: Some(trade_id),
            position_id: Some(position.position_id),
            error: Some(error),
        })
    }
}

fn failed_order(request: &OrderRequest, reason: &str) -> Order {
    let now = Utc::now();
    warn!(token_id = %request.token_id, reason, "leg failed at transport");
    Order {
        order_id: format!("failed-{}", Uuid::new_v4()),
        token_id: request.token_id.clone(),
        side: request.side,
        status: OrderStatus::Failed,
        requested_price: request.price,
        requested_size: request.size,
        filled_size: Size::ZERO,
        filled_cost: Decimal::ZERO,
        submitted_at: now,
        completed_at: Some(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clob::{ClobError, LegScript, MockClobClient};
    use mercury_book::{MarketBookSnapshot, MarketOrderBook};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct StaticBooks(HashMap<ConditionId, MarketBookSnapshot>);

    impl SnapshotSource for StaticBooks {
        fn market_snapshot(&self, market_id: &ConditionId) -> Option<MarketBookSnapshot> {
            self.0.get(market_id).cloned()
        }
    }

    fn snapshot(yes_levels: &[(Decimal, Decimal)], no_levels: &[(Decimal, Decimal)]) -> MarketBookSnapshot {
        let mut market = MarketOrderBook::create(
            ConditionId::from("0xcond"),
            TokenId::from("tok-yes"),
            TokenId::from("tok-no"),
        );
        market
            .yes_book_mut()
            .apply_snapshot(
                vec![],
                yes_levels
                    .iter()
                    .map(|(p, s)| (Price::new(*p), Size::new(*s)))
                    .collect(),
            )
            .unwrap();
        market
            .no_book_mut()
            .apply_snapshot(
                vec![],
                no_levels
                    .iter()
                    .map(|(p, s)| (Price::new(*p), Size::new(*s)))
                    .collect(),
            )
            .unwrap();
        market.snapshot(10)
    }

    fn approval(size: Decimal, yes: Decimal, no: Decimal) -> Approval {
        Approval {
            signal_id: "sig-1".into(),
            strategy_name: "gabagool".into(),
            market_id: ConditionId::from("0xcond"),
            signal_type: SignalType::Arbitrage,
            approved_size_usd: size,
            yes_price: Price::new(yes),
            no_price: Price::new(no),
            yes_token: TokenId::from("tok-yes"),
            no_token: TokenId::from("tok-no"),
        }
    }

    struct Harness {
        engine: Arc<ExecutionEngine>,
        clob: Arc<MockClobClient>,
        store: Arc<StateStore>,
        bus: Arc<EventBus>,
    }

    fn harness(book: MarketBookSnapshot) -> Harness {
        let bus = Arc::new(EventBus::new());
        let clob = Arc::new(MockClobClient::new());
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut books = HashMap::new();
        books.insert(ConditionId::from("0xcond"), book);
        let engine = Arc::new(ExecutionEngine::new(
            ExecutionConfig::default(),
            Arc::clone(&bus),
            Arc::clone(&clob) as Arc<dyn ClobClient>,
            Arc::new(StaticBooks(books)),
            Arc::clone(&store),
        ));
        Harness {
            engine,
            clob,
            store,
            bus,
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
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("closed")
    }

    fn deep_book() -> MarketBookSnapshot {
        snapshot(
            &[(dec!(0.48), dec!(100)), (dec!(0.49), dec!(100)), (dec!(0.50), dec!(100))],
            &[(dec!(0.50), dec!(100)), (dec!(0.51), dec!(100)), (dec!(0.52), dec!(100))],
        )
    }

    #[test]
    fn test_round_shares_to_clean() {
        // 0.48 needs multiples of 0.25 shares, 0.50 multiples of 0.02:
        // lcm step is 0.50 shares.
        let s = round_shares_to_clean(
            dec!(10.2040816),
            Price::new(dec!(0.48)),
            Price::new(dec!(0.50)),
        );
        assert_eq!(s, Size::new(dec!(10)));
        // Clean on both legs.
        assert_eq!(s.notional(Price::new(dec!(0.48))), dec!(4.80));
        assert_eq!(s.notional(Price::new(dec!(0.50))), dec!(5.00));

        // Four-decimal price narrows the grid further.
        let s = round_shares_to_clean(
            dec!(10.31),
            Price::new(dec!(0.4825)),
            Price::new(dec!(0.50)),
        );
        assert_eq!(s, Size::new(dec!(8)));
        assert_eq!(s.notional(Price::new(dec!(0.4825))), dec!(3.8600));

        // Degenerate price.
        assert_eq!(
            round_shares_to_clean(dec!(10), Price::ZERO, Price::new(dec!(0.5))),
            Size::ZERO
        );
    }

    #[tokio::test]
    async fn test_full_fill_happy_path() {
        let h = harness(deep_book());
        let mut filled_rx = collect(&h.bus, "order.filled");
        let mut opened_rx = collect(&h.bus, "position.opened");

        let outcome = h.engine.execute(&approval(dec!(9.80), dec!(0.48), dec!(0.50))).await.unwrap();
        assert!(outcome.is_success());

        let ExecutionOutcome::Completed {
            result,
            trade_id,
            position_id,
            ..
        } = outcome
        else {
            panic!("expected completion");
        };
        // Equal shares and positive locked-in profit.
        assert_eq!(result.yes_filled(), result.no_filled());
        assert!(result.guaranteed_pnl() > Decimal::ZERO);

        // Persisted trade and position.
        let trade = h.store.get_trade(&trade_id.unwrap()).unwrap().unwrap();
        assert_eq!(trade.execution_status, ExecutionStatus::FullFill);
        assert_eq!(trade.pre_fill_yes_depth, Size::new(dec!(300)));
        let position = h.store.get_position(&position_id.unwrap()).unwrap().unwrap();
        assert!(position.is_hedged());

        // Events: two fills and one position.opened.
        let (_, fill) = recv(&mut filled_rx).await;
        assert_eq!(fill["side"], "BUY");
        recv(&mut filled_rx).await;
        let (_, opened) = recv(&mut opened_rx).await;
        assert_eq!(opened["hedge_ratio"], "1");

        // Only BUY orders ever hit the transport.
        assert!(h
            .clob
            .placed_orders()
            .iter()
            .all(|o| o.side == OrderSide::Buy && o.tif == TimeInForce::Fok));
        assert!(h.clob.cancelled_orders().is_empty());
    }

    #[tokio::test]
    async fn test_partial_fill_holds_never_unwinds() {
        let h = harness(deep_book());
        h.clob
            .script(TokenId::from("tok-no"), LegScript::Reject("FOK kill".into()));
        let mut partial_rx = collect(&h.bus, "execution.partial_fill");

        let outcome = h.engine.execute(&approval(dec!(9.80), dec!(0.48), dec!(0.50))).await.unwrap();
        assert!(!outcome.is_success());

        let ExecutionOutcome::Completed {
            status,
            result,
            error,
            position_id,
            trade_id,
        } = outcome
        else {
            panic!("expected completion");
        };
        assert_eq!(status, ExecutionStatus::PartialFill);
        assert_eq!(result.yes_filled(), Size::new(dec!(10)));
        assert_eq!(result.no_filled(), Size::ZERO);
        let error = error.unwrap();
        assert!(error.contains("PARTIAL FILL"));
        assert!(error.contains("held"));

        // The invariant: nothing sold, nothing matched cancelled.
        assert!(h.clob.placed_orders().iter().all(|o| o.side == OrderSide::Buy));
        assert!(h.clob.cancelled_orders().is_empty());

        // Stored with hedge ratio 0 and partial status.
        let trade = h.store.get_trade(&trade_id.unwrap()).unwrap().unwrap();
        assert_eq!(trade.execution_status, ExecutionStatus::PartialFill);
        let position = h.store.get_position(&position_id.unwrap()).unwrap().unwrap();
        assert_eq!(position.hedge_ratio(), dec!(0));

        let (_, payload) = recv(&mut partial_rx).await;
        assert_eq!(payload["reason"], "Position held");
        assert_eq!(payload["held_side"], "YES");
    }

    #[tokio::test]
    async fn test_live_counterpart_cancelled_matched_never() {
        let h = harness(deep_book());
        h.clob.script(TokenId::from("tok-no"), LegScript::Live);

        let outcome = h.engine.execute(&approval(dec!(9.80), dec!(0.48), dec!(0.50))).await.unwrap();
        let ExecutionOutcome::Completed { status, result, .. } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(status, ExecutionStatus::PartialFill);

        // Only the live NO leg was cancelled.
        assert_eq!(
            h.clob.cancelled_orders(),
            vec![result.no_order.order_id.clone()]
        );
        assert!(result.yes_order.status.is_matched());
    }

    #[tokio::test]
    async fn test_no_fill_publishes_failure() {
        let h = harness(deep_book());
        h.clob
            .script(TokenId::from("tok-yes"), LegScript::Reject("kill".into()));
        h.clob
            .script(TokenId::from("tok-no"), LegScript::Reject("kill".into()));
        let mut failed_rx = collect(&h.bus, "execution.failed");

        let outcome = h.engine.execute(&approval(dec!(9.80), dec!(0.48), dec!(0.50))).await.unwrap();
        let ExecutionOutcome::Completed {
            status, trade_id, ..
        } = outcome
        else {
            panic!("expected completion");
        };
        assert_eq!(status, ExecutionStatus::NoFill);
        assert!(trade_id.is_none());
        assert_eq!(h.store.open_positions_count().unwrap(), 0);

        let (_, payload) = recv(&mut failed_rx).await;
        assert!(payload["reason"].as_str().unwrap().contains("No fill"));
    }

    #[tokio::test]
    async fn test_transport_error_is_leg_rejection() {
        let h = harness(deep_book());
        h.clob.script(
            TokenId::from("tok-no"),
            LegScript::TransportError(ClobError::Timeout("30s".into())),
        );

        let outcome = h.engine.execute(&approval(dec!(9.80), dec!(0.48), dec!(0.50))).await.unwrap();
        let ExecutionOutcome::Completed { status, result, .. } = outcome else {
            panic!("expected completion");
        };
        // YES matched, NO failed at transport: partial fill, held.
        assert_eq!(status, ExecutionStatus::PartialFill);
        assert_eq!(result.no_order.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_liquidity_precheck_aborts_without_orders() {
        // Only 12 shares of depth on YES across top 3: 50% cap = 6 shares.
        let h = harness(snapshot(
            &[(dec!(0.48), dec!(4)), (dec!(0.49), dec!(4)), (dec!(0.50), dec!(4))],
            &[(dec!(0.50), dec!(100))],
        ));
        let mut skipped_rx = collect(&h.bus, "execution.skipped");

        let outcome = h.engine.execute(&approval(dec!(9.80), dec!(0.48), dec!(0.50))).await.unwrap();
        let ExecutionOutcome::Aborted {
            reason,
            pre_fill_yes_depth,
            ..
        } = outcome
        else {
            panic!("expected abort");
        };
        assert!(reason.contains("Insufficient liquidity"));
        assert!(reason.contains("YES"));
        assert!(reason.contains("max 50.0%"));
        // Depth still reported for telemetry.
        assert_eq!(pre_fill_yes_depth, Size::new(dec!(12)));

        assert!(h.clob.placed_orders().is_empty());
        let (_, payload) = recv(&mut skipped_rx).await;
        assert_eq!(payload["pre_fill_yes_depth"], "12");
    }

    #[tokio::test]
    async fn test_arbitrage_invalid_recheck() {
        let h = harness(deep_book());
        let outcome = h.engine.execute(&approval(dec!(9.80), dec!(0.52), dec!(0.52))).await.unwrap();
        let ExecutionOutcome::Aborted { reason, .. } = outcome else {
            panic!("expected abort");
        };
        assert!(reason.contains("ARBITRAGE_INVALID"));
        assert!(h.clob.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_sequential_mode_places_both_legs() {
        let bus = Arc::new(EventBus::new());
        let clob = Arc::new(MockClobClient::new());
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut books = HashMap::new();
        books.insert(ConditionId::from("0xcond"), deep_book());
        let engine = ExecutionEngine::new(
            ExecutionConfig {
                parallel: false,
                ..Default::default()
            },
            bus,
            Arc::clone(&clob) as Arc<dyn ClobClient>,
            Arc::new(StaticBooks(books)),
            store,
        );

        let outcome = engine.execute(&approval(dec!(9.80), dec!(0.48), dec!(0.50))).await.unwrap();
        assert!(outcome.is_success());
        let placed = clob.placed_orders();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].token_id, TokenId::from("tok-yes"));
        assert_eq!(placed[1].token_id, TokenId::from("tok-no"));
    }

    #[tokio::test]
    async fn test_non_arbitrage_approval_skipped() {
        let h = harness(deep_book());
        h.engine.start().unwrap();
        let mut skipped_rx = collect(&h.bus, "execution.skipped");

        h.bus
            .publish(
                "risk.approved.sig-2",
                json!({
                    "signal_id": "sig-2",
                    "market_id": "0xcond",
                    "strategy_name": "directional",
                    "signal_type": "BUY_YES",
                    "approved_size_usd": "10",
                    "yes_price": "0.48",
                    "no_price": "0.50",
                }),
            )
            .await
            .unwrap();

        let (_, payload) = recv(&mut skipped_rx).await;
        assert!(payload["reason"]
            .as_str()
            .unwrap()
            .contains("not executable"));
        assert!(h.clob.placed_orders().is_empty());
    }
}
