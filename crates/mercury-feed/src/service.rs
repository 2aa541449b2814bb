//! Market-data service implementation.
//!
//! Owns every `MarketOrderBook` in the process. Three long-lived tasks:
//! the WebSocket connection loop, the frame decode loop, and the
//! staleness monitor. Books are mutated only here; every other component
//! sees read-only snapshots through [`SnapshotSource`] or bus events.

use crate::error::{FeedError, FeedResult};
use crate::frame::{decode_frames, BookFrame, BookSide};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mercury_book::{MarketBookSnapshot, MarketOrderBook, SnapshotSource};
use mercury_bus::EventBus;
use mercury_core::events::{FreshAlertEvent, StaleAlertEvent};
use mercury_core::{ConditionId, TokenId};
use mercury_ws::{ConnectionConfig, ConnectionManager, SubscriptionManager, WsHandle};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Market-data service configuration.
#[derive(Debug, Clone)]
pub struct MarketDataServiceConfig {
    /// Transport connection settings.
    pub connection: ConnectionConfig,
    /// Seconds without an update before a market is stale.
    pub stale_threshold_secs: u64,
    /// Staleness monitor tick interval.
    pub staleness_check_interval_secs: u64,
    /// Ladder depth captured in snapshots.
    pub snapshot_depth: usize,
    /// Capacity of the transport -> decoder channel.
    pub feed_channel_capacity: usize,
}

impl Default for MarketDataServiceConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            stale_threshold_secs: 60,
            staleness_check_interval_secs: 5,
            snapshot_depth: 10,
            feed_channel_capacity: 1024,
        }
    }
}

/// The market-data service.
pub struct MarketDataService {
    config: MarketDataServiceConfig,
    bus: Arc<EventBus>,
    connection: Arc<ConnectionManager>,
    ws_handle: WsHandle,
    message_rx: Mutex<Option<mpsc::Receiver<String>>>,
    books: DashMap<ConditionId, Arc<RwLock<MarketOrderBook>>>,
    token_index: DashMap<TokenId, ConditionId>,
    /// Markets currently flagged stale, with the time they went stale.
    stale_markets: DashMap<ConditionId, DateTime<Utc>>,
    running: AtomicBool,
    parse_errors: AtomicU64,
    cancel: CancellationToken,
}

impl MarketDataService {
    pub fn new(config: MarketDataServiceConfig, bus: Arc<EventBus>) -> Self {
        let (message_tx, message_rx) = mpsc::channel(config.feed_channel_capacity);
        let connection = Arc::new(ConnectionManager::new(config.connection.clone(), message_tx));
        let ws_handle = connection.handle();
        Self {
            config,
            bus,
            connection,
            ws_handle,
            message_rx: Mutex::new(Some(message_rx)),
            books: DashMap::new(),
            token_index: DashMap::new(),
            stale_markets: DashMap::new(),
            running: AtomicBool::new(false),
            parse_errors: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the connection, decode and staleness tasks.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("market data service starting");

        let connection = Arc::clone(&self.connection);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.run(cancel).await {
                warn!(error = %e, "connection loop exited with error");
            }
        });

        let service = Arc::clone(self);
        let mut message_rx = self
            .message_rx
            .lock()
            .take()
            .expect("start called twice on MarketDataService");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = service.cancel.cancelled() => break,
                    text = message_rx.recv() => {
                        match text {
                            Some(text) => service.process_text(&text).await,
                            None => break,
                        }
                    }
                }
            }
            debug!("decode loop exited");
        });

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(
                service.config.staleness_check_interval_secs.max(1),
            ));
            loop {
                tokio::select! {
                    _ = service.cancel.cancelled() => break,
                    _ = ticker.tick() => service.check_staleness_once(Utc::now()).await,
                }
            }
            debug!("staleness monitor exited");
        });
    }

    /// Stop all tasks. Idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("market data service stopping");
        }
        self.cancel.cancel();
    }

    /// Register a market's two tokens for data. Queued while disconnected
    /// and replayed on the next OPEN.
    pub async fn subscribe_market(
        &self,
        market_id: ConditionId,
        yes_token: TokenId,
        no_token: TokenId,
    ) -> FeedResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(FeedError::NotRunning);
        }

        self.books.entry(market_id.clone()).or_insert_with(|| {
            Arc::new(RwLock::new(MarketOrderBook::create(
                market_id.clone(),
                yes_token.clone(),
                no_token.clone(),
            )))
        });
        self.token_index.insert(yes_token.clone(), market_id.clone());
        self.token_index.insert(no_token.clone(), market_id.clone());

        let subs = self.ws_handle.subscriptions();
        subs.register(yes_token.clone());
        subs.register(no_token.clone());

        if self.ws_handle.is_connected() {
            let frame = SubscriptionManager::subscribe_frame(&[yes_token, no_token]);
            self.ws_handle.send_frame(frame).await?;
        }
        info!(%market_id, "market subscribed");
        Ok(())
    }

    /// Drop a market and unsubscribe its tokens.
    pub async fn unsubscribe_market(&self, market_id: &ConditionId) -> FeedResult<()> {
        let Some((_, book)) = self.books.remove(market_id) else {
            return Ok(());
        };
        let (yes_token, no_token) = {
            let book = book.read();
            (
                book.yes_book().token_id().clone(),
                book.no_book().token_id().clone(),
            )
        };
        self.token_index.remove(&yes_token);
        self.token_index.remove(&no_token);
        self.stale_markets.remove(market_id);

        if self.ws_handle.is_connected() {
            let frame = SubscriptionManager::unsubscribe_frame(&[yes_token, no_token]);
            self.ws_handle.send_frame(frame).await?;
        }
        info!(%market_id, "market unsubscribed");
        Ok(())
    }

    /// Decode one transport frame and apply every mutation it carries.
    /// Parse failures are counted and dropped, never fatal.
    pub async fn process_text(&self, text: &str) {
        let frames = match decode_frames(text) {
            Ok(frames) => frames,
            Err(e) => {
                self.parse_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        for frame in frames {
            if let Err(e) = self.apply_frame(frame).await {
                self.parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "dropping inapplicable frame");
            }
        }
    }

    async fn apply_frame(&self, frame: BookFrame) -> FeedResult<()> {
        let token_id = frame.token_id().clone();
        let market_id = self
            .token_index
            .get(&token_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FeedError::UnknownToken(token_id.to_string()))?;

        let book = self
            .books
            .get(&market_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| FeedError::UnknownToken(token_id.to_string()))?;

        let event = {
            let mut book = book.write();
            let token_book = book
                .book_for_token_mut(&token_id)
                .ok_or_else(|| FeedError::UnknownToken(token_id.to_string()))?;
            match frame {
                BookFrame::PriceChange {
                    side, price, size, ..
                } => match side {
                    BookSide::Bid => token_book.update_bid(price, size)?,
                    BookSide::Ask => token_book.update_ask(price, size)?,
                },
                BookFrame::Snapshot { bids, asks, .. } => {
                    token_book.apply_snapshot(bids, asks)?;
                }
            }
            book.snapshot_event()
        };

        // First data for a token confirms its subscription.
        if self.ws_handle.subscriptions().mark_active(&token_id) {
            info!(%token_id, "subscription activated by first message");
        }

        self.bus.publish_event(&event).await?;

        if let Some((_, stale_since)) = self.stale_markets.remove(&market_id) {
            let fresh = FreshAlertEvent {
                market_id: market_id.clone(),
                stale_for_seconds: (Utc::now() - stale_since).num_seconds(),
                timestamp: Utc::now(),
            };
            info!(%market_id, "market fresh again");
            self.bus.publish_event(&fresh).await?;
        }

        Ok(())
    }

    /// One staleness sweep: flags markets whose newest book update is
    /// older than the threshold. Already-stale markets are not re-flagged.
    pub async fn check_staleness_once(&self, now: DateTime<Utc>) {
        let threshold = self.config.stale_threshold_secs as i64;
        let mut alerts = Vec::new();

        for entry in self.books.iter() {
            let market_id = entry.key().clone();
            if self.stale_markets.contains_key(&market_id) {
                continue;
            }
            let last_update = entry.value().read().last_update();
            let silent = (now - last_update).num_seconds();
            if silent > threshold {
                self.stale_markets.insert(market_id.clone(), now);
                alerts.push(StaleAlertEvent {
                    market_id,
                    last_update_at: last_update,
                    stale_for_seconds: silent,
                    timestamp: now,
                });
            }
        }

        for alert in alerts {
            warn!(market_id = %alert.market_id, silent = alert.stale_for_seconds, "market stale");
            if let Err(e) = self.bus.publish_event(&alert).await {
                warn!(error = %e, "failed to publish stale alert");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.ws_handle.is_connected()
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn market_count(&self) -> usize {
        self.books.len()
    }

    pub fn stale_market_count(&self) -> usize {
        self.stale_markets.len()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.ws_handle.subscriptions().active_count()
    }
}

impl SnapshotSource for MarketDataService {
    fn market_snapshot(&self, market_id: &ConditionId) -> Option<MarketBookSnapshot> {
        self.books
            .get(market_id)
            .map(|entry| entry.value().read().snapshot(self.config.snapshot_depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration as StdDuration;
    use tokio::sync::mpsc as tokio_mpsc;
    use tokio::time::timeout;

    fn service_with_bus() -> (Arc<MarketDataService>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let config = MarketDataServiceConfig {
            stale_threshold_secs: 0,
            ..Default::default()
        };
        let service = Arc::new(MarketDataService::new(config, Arc::clone(&bus)));
        (service, bus)
    }

    fn collect(
        bus: &EventBus,
        pattern: &str,
    ) -> tokio_mpsc::UnboundedReceiver<(String, Value)> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
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

    async fn recv(rx: &mut tokio_mpsc::UnboundedReceiver<(String, Value)>) -> (String, Value) {
        timeout(StdDuration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("closed")
    }

    async fn subscribe_test_market(service: &Arc<MarketDataService>) {
        service.running.store(true, Ordering::SeqCst);
        service
            .subscribe_market(
                ConditionId::from("0xcond"),
                TokenId::from("tok-yes"),
                TokenId::from("tok-no"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_market_requires_running() {
        let (service, _bus) = service_with_bus();
        let err = service
            .subscribe_market(
                ConditionId::from("m"),
                TokenId::from("y"),
                TokenId::from("n"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::NotRunning));
    }

    #[tokio::test]
    async fn test_snapshot_frame_publishes_orderbook_event() {
        let (service, bus) = service_with_bus();
        let mut rx = collect(&bus, "market.orderbook.*");
        subscribe_test_market(&service).await;

        service
            .process_text(
                r#"{"asset_id": "tok-yes",
                    "bids": [{"price": "0.45", "size": "10"}],
                    "asks": [{"price": "0.48", "size": "100"}]}"#,
            )
            .await;

        let (topic, payload) = recv(&mut rx).await;
        assert_eq!(topic, "market.orderbook.0xcond");
        assert_eq!(payload["yes_best_ask"], "0.48");
        assert_eq!(payload["sequence"], 1);
        assert_eq!(service.parse_errors(), 0);

        // The YES token is now ACTIVE.
        assert_eq!(service.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_price_change_updates_combined_metrics() {
        let (service, bus) = service_with_bus();
        let mut rx = collect(&bus, "market.orderbook.*");
        subscribe_test_market(&service).await;

        service
            .process_text(
                r#"{"price_changes": [
                    {"asset_id": "tok-yes", "price": "0.48", "size": "100", "side": "ask"},
                    {"asset_id": "tok-no", "price": "0.50", "size": "100", "side": "ask"}
                ]}"#,
            )
            .await;

        // Two mutations -> two snapshots; the second sees both asks.
        let _ = recv(&mut rx).await;
        let (_, payload) = recv(&mut rx).await;
        assert_eq!(payload["combined_ask"], "0.98");
        assert_eq!(payload["arbitrage_spread_cents"], "2.00");
    }

    #[tokio::test]
    async fn test_parse_failures_counted_not_fatal() {
        let (service, _bus) = service_with_bus();
        subscribe_test_market(&service).await;

        service.process_text("garbage").await;
        assert_eq!(service.parse_errors(), 1);

        // Frames for unknown tokens are dropped and counted.
        service
            .process_text(
                r#"{"asset_id": "mystery", "bids": [], "asks": []}"#,
            )
            .await;
        assert_eq!(service.parse_errors(), 2);

        // Service still applies good frames afterwards.
        service
            .process_text(r#"{"asset_id": "tok-yes", "bids": [], "asks": [{"price": "0.5", "size": "1"}]}"#)
            .await;
        assert_eq!(service.parse_errors(), 2);
    }

    #[tokio::test]
    async fn test_stale_then_fresh_cycle() {
        let (service, bus) = service_with_bus();
        let mut stale_rx = collect(&bus, "market.stale.*");
        let mut fresh_rx = collect(&bus, "market.fresh.*");
        subscribe_test_market(&service).await;

        // Threshold is zero; any past update counts as stale.
        tokio::time::sleep(StdDuration::from_millis(1100)).await;
        service.check_staleness_once(Utc::now()).await;

        let (topic, payload) = recv(&mut stale_rx).await;
        assert_eq!(topic, "market.stale.0xcond");
        assert!(payload["stale_for_seconds"].as_i64().unwrap() >= 1);
        assert_eq!(service.stale_market_count(), 1);

        // A second sweep must not re-flag.
        service.check_staleness_once(Utc::now()).await;
        assert!(
            timeout(StdDuration::from_millis(50), stale_rx.recv())
                .await
                .is_err()
        );

        // New data flips the market back to fresh.
        service
            .process_text(r#"{"asset_id": "tok-yes", "bids": [], "asks": [{"price": "0.5", "size": "1"}]}"#)
            .await;
        let (topic, _) = recv(&mut fresh_rx).await;
        assert_eq!(topic, "market.fresh.0xcond");
        assert_eq!(service.stale_market_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_source_view() {
        let (service, _bus) = service_with_bus();
        subscribe_test_market(&service).await;
        service
            .process_text(
                r#"{"asset_id": "tok-yes", "bids": [], "asks": [{"price": "0.48", "size": "100"}]}"#,
            )
            .await;

        let snap = service
            .market_snapshot(&ConditionId::from("0xcond"))
            .unwrap();
        assert_eq!(snap.yes.best_ask().unwrap().to_string(), "0.48");
        assert!(service
            .market_snapshot(&ConditionId::from("missing"))
            .is_none());
    }
}
