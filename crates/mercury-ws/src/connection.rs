//! WebSocket connection manager.
//!
//! Owns the single long-lived socket to the market-data transport.
//! Reconnects with exponential backoff (1 s doubling to 60 s, reset as
//! soon as a message arrives), replays pending subscriptions after every
//! OPEN, and enforces the heartbeat contract: PING every 20 s, PONG
//! within 10 s, two missed pongs or 60 s of total silence force a
//! reconnect.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatMonitor;
use crate::subscription::SubscriptionManager;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Seconds between PINGs.
    pub ping_interval_secs: u64,
    /// Seconds to wait for a PONG.
    pub pong_timeout_secs: u64,
    /// Seconds of total silence before forcing a reconnect.
    pub stale_threshold_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 60_000,
            ping_interval_secs: 20,
            pong_timeout_secs: 10,
            stale_threshold_secs: 60,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Cloneable handle for components that need to observe or write to the
/// connection without owning it.
#[derive(Clone)]
pub struct WsHandle {
    state: Arc<RwLock<ConnectionState>>,
    subscriptions: Arc<SubscriptionManager>,
    outbound_tx: mpsc::Sender<String>,
}

impl WsHandle {
    pub fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Queue a raw text frame for the write half. Frames queued while
    /// disconnected are sent after the next OPEN.
    pub async fn send_frame(&self, frame: String) -> WsResult<()> {
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| WsError::ConnectionFailed("connection task gone".to_string()))
    }
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    subscriptions: Arc<SubscriptionManager>,
    heartbeat: HeartbeatMonitor,
    /// Raw text frames forwarded to the feed decoder.
    message_tx: mpsc::Sender<String>,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: Mutex<Option<mpsc::Receiver<String>>>,
    attempt: AtomicU32,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, message_tx: mpsc::Sender<String>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let heartbeat = HeartbeatMonitor::new(
            config.ping_interval_secs,
            config.pong_timeout_secs,
            config.stale_threshold_secs,
        );
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            subscriptions: Arc::new(SubscriptionManager::new()),
            heartbeat,
            message_tx,
            outbound_tx,
            outbound_rx: Mutex::new(None),
            attempt: AtomicU32::new(0),
        }
    }

    pub fn handle(&self) -> WsHandle {
        WsHandle {
            state: Arc::clone(&self.state),
            subscriptions: Arc::clone(&self.subscriptions),
            outbound_tx: self.outbound_tx.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Run the connect/read/reconnect loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> WsResult<()> {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .expect("run called twice on the same ConnectionManager");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            *self.state.write() = ConnectionState::Connecting;

            match self.try_connect(&cancel, &mut outbound_rx).await {
                Ok(()) => {
                    info!("WebSocket connection closed");
                    if cancel.is_cancelled() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "WebSocket connection error");
                }
            }

            // Active subscriptions must be replayed after reconnect.
            self.subscriptions.demote_all();

            let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "max reconnection attempts reached");
                *self.state.write() = ConnectionState::Disconnected;
                return Err(WsError::ConnectionFailed(
                    "max reconnection attempts reached".to_string(),
                ));
            }

            *self.state.write() = ConnectionState::Reconnecting;
            let delay = calculate_backoff_delay(
                attempt,
                self.config.reconnect_base_delay_ms,
                self.config.reconnect_max_delay_ms,
            );
            warn!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        *self.state.write() = ConnectionState::Disconnected;
        Ok(())
    }

    async fn try_connect(
        &self,
        cancel: &CancellationToken,
        outbound_rx: &mut mpsc::Receiver<String>,
    ) -> WsResult<()> {
        info!(url = %self.config.url, "connecting to WebSocket");

        let (ws_stream, _response) = connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        *self.state.write() = ConnectionState::Connected;
        info!("WebSocket connected");

        // Replay pending subscriptions in one batch frame.
        let pending = self.subscriptions.pending_tokens();
        if !pending.is_empty() {
            let frame = SubscriptionManager::subscribe_frame(&pending);
            write.send(Message::Text(frame.into())).await?;
            info!(count = pending.len(), "pending subscriptions sent");
        }

        self.heartbeat.reset();
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message();
                            self.attempt.store(0, Ordering::SeqCst);
                            match text.as_str() {
                                "PONG" => self.heartbeat.record_pong(),
                                "PING" => {
                                    write.send(Message::Text("PONG".into())).await?;
                                }
                                _ => {
                                    // The read loop never blocks on the
                                    // decoder; a full channel drops the
                                    // frame in favor of fresher data.
                                    if self.message_tx.try_send(text.to_string()).is_err() {
                                        warn!("feed channel full, frame dropped");
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_message();
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Err(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "stream ended".to_string(),
                            });
                        }
                        _ => {}
                    }
                }

                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            debug!(len = frame.len(), "sending outbound frame");
                            write.send(Message::Text(frame.into())).await?;
                        }
                        None => {
                            return Err(WsError::ConnectionFailed(
                                "outbound channel closed".to_string(),
                            ));
                        }
                    }
                }

                _ = ticker.tick() => {
                    if let Some(missed) = self.heartbeat.check_pong_expiry() {
                        warn!(missed, "pong timeout");
                        if self.heartbeat.pong_exhausted() {
                            return Err(WsError::HeartbeatTimeout { missed_pongs: missed });
                        }
                    }
                    if self.heartbeat.is_stale() {
                        return Err(WsError::StaleConnection {
                            silent_for_seconds: self.heartbeat.seconds_since_last_message(),
                        });
                    }
                    if self.heartbeat.ping_due() {
                        write.send(Message::Text("PING".into())).await?;
                        self.heartbeat.record_ping();
                        debug!("ping sent");
                    }
                }
            }
        }
    }
}

/// Exponential backoff: base * 2^(attempt-1), capped, plus 0-1000 ms of
/// jitter so a fleet of clients does not reconnect in lockstep.
pub fn calculate_backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    Duration::from_millis(delay + nanos_jitter())
}

/// Cheap jitter source (0-1000 ms) without pulling in a RNG.
fn nanos_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as u64
}
