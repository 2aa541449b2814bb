//! Abstract trading transport (CLOB).
//!
//! The engine talks to the exchange through this trait only. Real
//! transports wrap HTTP/WS order APIs; tests use [`MockClobClient`],
//! which scripts per-token outcomes and records every call so tests can
//! assert what was (and was not) sent.

use mercury_book::TokenBookSnapshot;
use mercury_core::{ConditionId, Order, OrderSide, OrderStatus, Price, Size, TimeInForce, TokenId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Typed transport errors.
///
/// `Timeout` is the only transient kind here; everything else is
/// permanent and must not be retried by the engine (the strategy decides
/// whether to signal again).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClobError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Transport timeout: {0}")]
    Timeout(String),

    #[error("Insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    #[error("ARBITRAGE_INVALID: {0}")]
    ArbitrageInvalid(String),

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Batch error: {0}")]
    BatchError(String),
}

impl ClobError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result type alias for transport operations.
pub type ClobResult<T> = std::result::Result<T, ClobError>;

/// A single-leg order request.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub token_id: TokenId,
    pub side: OrderSide,
    pub size: Size,
    pub price: Price,
    pub tif: TimeInForce,
}

/// Parallel submits both legs concurrently; sequential is the legacy
/// one-after-the-other mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    #[default]
    Parallel,
    Sequential,
}

/// A dual-leg request as handed to the placement path.
#[derive(Debug, Clone, PartialEq)]
pub struct DualLegRequest {
    pub market_id: ConditionId,
    pub yes_token: TokenId,
    pub no_token: TokenId,
    pub yes_price: Price,
    pub yes_size: Size,
    pub no_price: Price,
    pub no_size: Size,
    pub tif: TimeInForce,
    pub mode: PlacementMode,
}

/// The trading transport seam.
pub trait ClobClient: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, ClobResult<()>>;

    fn close(&self) -> BoxFuture<'_, ClobResult<()>>;

    /// On-demand book fetch for one token, independent of the streaming
    /// feed (used for spot checks and recovery).
    fn get_order_book(&self, token_id: &TokenId) -> BoxFuture<'_, ClobResult<TokenBookSnapshot>>;

    /// Place one leg. A transport failure is an `Err`; an exchange
    /// rejection is an `Ok` order with a rejection status.
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ClobResult<Order>>;

    fn cancel_order(&self, order_id: &str) -> BoxFuture<'_, ClobResult<()>>;

    fn get_order(&self, order_id: &str) -> BoxFuture<'_, ClobResult<Order>>;
}

/// Dry-run transport: every FOK order fills completely at its requested
/// price and nothing leaves the process. Used when `mercury.dry_run` is
/// set; live trading requires a real transport to be injected.
#[derive(Debug, Default)]
pub struct SimulatedClob {
    placed: Mutex<Vec<OrderRequest>>,
}

impl SimulatedClob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.placed.lock().clone()
    }
}

impl ClobClient for SimulatedClob {
    fn connect(&self) -> BoxFuture<'_, ClobResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BoxFuture<'_, ClobResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn get_order_book(&self, token_id: &TokenId) -> BoxFuture<'_, ClobResult<TokenBookSnapshot>> {
        let token_id = token_id.clone();
        Box::pin(async move { Ok(empty_book(token_id)) })
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ClobResult<Order>> {
        Box::pin(async move {
            self.placed.lock().push(request.clone());
            let now = chrono::Utc::now();
            Ok(Order {
                order_id: format!("sim-{}", uuid::Uuid::new_v4()),
                token_id: request.token_id.clone(),
                side: request.side,
                status: OrderStatus::Matched,
                requested_price: request.price,
                requested_size: request.size,
                filled_size: request.size,
                filled_cost: request.size.notional(request.price),
                submitted_at: now,
                completed_at: Some(now),
            })
        })
    }

    fn cancel_order(&self, _order_id: &str) -> BoxFuture<'_, ClobResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn get_order(&self, order_id: &str) -> BoxFuture<'_, ClobResult<Order>> {
        let order_id = order_id.to_string();
        Box::pin(async move { Err(ClobError::Rejected(format!("unknown order {order_id}"))) })
    }
}

fn empty_book(token_id: TokenId) -> TokenBookSnapshot {
    TokenBookSnapshot {
        token_id,
        bids: Vec::new(),
        asks: Vec::new(),
        sequence: 0,
        last_update: chrono::Utc::now(),
    }
}

/// Scripted outcome for one leg in the mock transport.
#[derive(Debug, Clone)]
pub enum LegScript {
    /// Fill completely at the requested price.
    Match,
    /// Fill completely at the given price (slippage scenarios).
    MatchAt(Price),
    /// Exchange rejection with a reason.
    Reject(String),
    /// Order rests on the book (non-FOK behavior).
    Live,
    /// Transport-level failure.
    TransportError(ClobError),
}

/// Hand-rolled mock transport: scripts per-token outcomes and records
/// every placement and cancel for test assertions.
#[derive(Default)]
pub struct MockClobClient {
    scripts: Mutex<HashMap<TokenId, LegScript>>,
    placed: Mutex<Vec<OrderRequest>>,
    cancelled: Mutex<Vec<String>>,
}

impl MockClobClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, token_id: TokenId, outcome: LegScript) {
        self.scripts.lock().insert(token_id, outcome);
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.placed.lock().clone()
    }

    pub fn cancelled_orders(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    fn build_order(request: &OrderRequest, script: &LegScript) -> ClobResult<Order> {
        let now = chrono::Utc::now();
        let base = Order {
            order_id: format!("ord-{}", request.token_id),
            token_id: request.token_id.clone(),
            side: request.side,
            status: OrderStatus::Rejected,
            requested_price: request.price,
            requested_size: request.size,
            filled_size: Size::ZERO,
            filled_cost: rust_decimal::Decimal::ZERO,
            submitted_at: now,
            completed_at: Some(now),
        };
        match script {
            LegScript::Match => Ok(Order {
                status: OrderStatus::Matched,
                filled_size: request.size,
                filled_cost: request.size.notional(request.price),
                ..base
            }),
            LegScript::MatchAt(price) => Ok(Order {
                status: OrderStatus::Matched,
                filled_size: request.size,
                filled_cost: request.size.notional(*price),
                ..base
            }),
            LegScript::Reject(_reason) => Ok(base),
            LegScript::Live => Ok(Order {
                status: OrderStatus::Live,
                completed_at: None,
                ..base
            }),
            LegScript::TransportError(e) => Err(e.clone()),
        }
    }
}

impl ClobClient for MockClobClient {
    fn connect(&self) -> BoxFuture<'_, ClobResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BoxFuture<'_, ClobResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn get_order_book(&self, token_id: &TokenId) -> BoxFuture<'_, ClobResult<TokenBookSnapshot>> {
        let token_id = token_id.clone();
        Box::pin(async move { Ok(empty_book(token_id)) })
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ClobResult<Order>> {
        Box::pin(async move {
            self.placed.lock().push(request.clone());
            let script = self
                .scripts
                .lock()
                .get(&request.token_id)
                .cloned()
                .unwrap_or(LegScript::Match);
            Self::build_order(&request, &script)
        })
    }

    fn cancel_order(&self, order_id: &str) -> BoxFuture<'_, ClobResult<()>> {
        let order_id = order_id.to_string();
        Box::pin(async move {
            self.cancelled.lock().push(order_id);
            Ok(())
        })
    }

    fn get_order(&self, order_id: &str) -> BoxFuture<'_, ClobResult<Order>> {
        let order_id = order_id.to_string();
        Box::pin(async move { Err(ClobError::Rejected(format!("unknown order {order_id}"))) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(token: &str) -> OrderRequest {
        OrderRequest {
            token_id: TokenId::from(token),
            side: OrderSide::Buy,
            size: Size::new(dec!(10)),
            price: Price::new(dec!(0.48)),
            tif: TimeInForce::Fok,
        }
    }

    #[tokio::test]
    async fn test_mock_records_and_matches_by_default() {
        let clob = MockClobClient::new();
        let order = clob.place_order(request("tok")).await.unwrap();
        assert_eq!(order.status, OrderStatus::Matched);
        assert_eq!(order.filled_cost, dec!(4.80));
        assert_eq!(clob.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_rejection_and_error() {
        let clob = MockClobClient::new();
        clob.script(TokenId::from("rej"), LegScript::Reject("FOK kill".into()));
        clob.script(
            TokenId::from("err"),
            LegScript::TransportError(ClobError::Timeout("30s".into())),
        );

        let order = clob.place_order(request("rej")).await.unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert!(order.filled_size.is_zero());

        let err = clob.place_order(request("err")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_cancel_log() {
        let clob = MockClobClient::new();
        clob.cancel_order("ord-1").await.unwrap();
        assert_eq!(clob.cancelled_orders(), vec!["ord-1".to_string()]);
    }
}
