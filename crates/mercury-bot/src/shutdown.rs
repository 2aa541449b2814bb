//! Graceful shutdown controller.
//!
//! Ordered phases with per-callback timeouts. A callback failure or
//! timeout is recorded and the sequence still advances; shutdown must
//! terminate even when components misbehave.
//!
//! Phase order:
//! 1. STOPPING_NEW_WORK - strategies stop generating signals
//! 2. DRAINING_ORDERS - in-flight orders complete (bounded, with an
//!    optional force-cancel on timeout)
//! 3. CLOSING_CONNECTIONS - transports disconnect
//! 4. FLUSHING_DATA - metrics and persisted state flushed
//! 5. CLEANUP - remaining components stopped

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Boxed future for dyn-compatible callbacks.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// A shutdown callback; errors are collected, never fatal.
pub type ShutdownCallback =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Budget for the optional force-cancel hook after a drain timeout.
const FORCE_CANCEL_BUDGET: Duration = Duration::from_secs(5);

/// Drain poll cadence.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Phases of graceful shutdown, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShutdownPhase {
    Running,
    SignalReceived,
    StoppingNewWork,
    DrainingOrders,
    ClosingConnections,
    FlushingData,
    Cleanup,
    Completed,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::SignalReceived => "signal_received",
            Self::StoppingNewWork => "stopping_new_work",
            Self::DrainingOrders => "draining_orders",
            Self::ClosingConnections => "closing_connections",
            Self::FlushingData => "flushing_data",
            Self::Cleanup => "cleanup",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Final shutdown report.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub phase: ShutdownPhase,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub signal_received: Option<String>,
    pub orders_drained: bool,
    pub websocket_closed: bool,
    pub metrics_flushed: bool,
    pub database_closed: bool,
    pub errors: Vec<String>,
}

impl ShutdownReport {
    fn new() -> Self {
        Self {
            phase: ShutdownPhase::Running,
            started_at: None,
            completed_at: None,
            signal_received: None,
            orders_drained: false,
            websocket_closed: false,
            metrics_flushed: false,
            database_closed: false,
            errors: Vec::new(),
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }
}

/// Shutdown coordinator.
pub struct ShutdownController {
    timeout: Duration,
    drain_timeout: Duration,
    callbacks: Mutex<HashMap<ShutdownPhase, Vec<(String, ShutdownCallback)>>>,
    in_flight: Mutex<Option<Arc<AtomicU64>>>,
    force_cancel: Mutex<Option<ShutdownCallback>>,
    triggered: AtomicBool,
    trigger_token: CancellationToken,
    report: Mutex<ShutdownReport>,
}

impl ShutdownController {
    pub fn new(timeout_seconds: u64, drain_timeout_seconds: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_seconds.max(1)),
            drain_timeout: Duration::from_secs(drain_timeout_seconds),
            callbacks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(None),
            force_cancel: Mutex::new(None),
            triggered: AtomicBool::new(false),
            trigger_token: CancellationToken::new(),
            report: Mutex::new(ShutdownReport::new()),
        }
    }

    fn register(&self, phase: ShutdownPhase, name: impl Into<String>, callback: ShutdownCallback) {
        self.callbacks
            .lock()
            .entry(phase)
            .or_default()
            .push((name.into(), callback));
    }

    pub fn on_stop_new_work(&self, name: impl Into<String>, callback: ShutdownCallback) {
        self.register(ShutdownPhase::StoppingNewWork, name, callback);
    }

    pub fn on_drain_orders(&self, name: impl Into<String>, callback: ShutdownCallback) {
        self.register(ShutdownPhase::DrainingOrders, name, callback);
    }

    pub fn on_close_connections(&self, name: impl Into<String>, callback: ShutdownCallback) {
        self.register(ShutdownPhase::ClosingConnections, name, callback);
    }

    pub fn on_flush_data(&self, name: impl Into<String>, callback: ShutdownCallback) {
        self.register(ShutdownPhase::FlushingData, name, callback);
    }

    pub fn on_cleanup(&self, name: impl Into<String>, callback: ShutdownCallback) {
        self.register(ShutdownPhase::Cleanup, name, callback);
    }

    /// Counter polled during the drain phase.
    pub fn set_in_flight_counter(&self, counter: Arc<AtomicU64>) {
        *self.in_flight.lock() = Some(counter);
    }

    /// Invoked (with a 5 s budget) when the drain times out.
    pub fn set_force_cancel(&self, callback: ShutdownCallback) {
        *self.force_cancel.lock() = Some(callback);
    }

    /// Request shutdown. A second trigger is a no-op.
    pub fn trigger(&self, signal: &str) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            warn!(signal, "shutdown already in progress, ignoring trigger");
            return;
        }
        info!(signal, "shutdown triggered");
        {
            let mut report = self.report.lock();
            report.signal_received = Some(signal.to_string());
            report.phase = ShutdownPhase::SignalReceived;
            report.started_at = Some(Utc::now());
        }
        self.trigger_token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.report.lock().phase
    }

    /// Token cancelled at trigger time; long-lived loops watch this.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.trigger_token.clone()
    }

    pub async fn wait_for_trigger(&self) {
        self.trigger_token.cancelled().await;
    }

    /// Install SIGTERM/SIGINT handlers that trigger shutdown once.
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let ctrl_c = async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    "SIGINT"
                } else {
                    "SIGINT(error)"
                }
            };

            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = match signal(SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(error = %e, "failed to install SIGTERM handler");
                        let name = ctrl_c.await;
                        controller.trigger(name);
                        return;
                    }
                };
                tokio::select! {
                    name = ctrl_c => controller.trigger(name),
                    _ = sigterm.recv() => controller.trigger("SIGTERM"),
                }
            }

            #[cfg(not(unix))]
            {
                let name = ctrl_c.await;
                controller.trigger(name);
            }
        });
    }

    fn advance(&self, phase: ShutdownPhase) {
        info!(phase = %phase, "shutdown phase");
        self.report.lock().phase = phase;
    }

    /// Run the full ordered sequence and return the report.
    pub async fn shutdown(&self) -> ShutdownReport {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            // Programmatic shutdown without an earlier trigger.
            let mut report = self.report.lock();
            report.signal_received = Some("programmatic".to_string());
            report.phase = ShutdownPhase::SignalReceived;
            report.started_at = Some(Utc::now());
            drop(report);
            self.trigger_token.cancel();
        }

        self.advance(ShutdownPhase::StoppingNewWork);
        self.run_phase(ShutdownPhase::StoppingNewWork).await;

        self.advance(ShutdownPhase::DrainingOrders);
        self.run_phase(ShutdownPhase::DrainingOrders).await;
        self.drain_in_flight().await;

        self.advance(ShutdownPhase::ClosingConnections);
        self.run_phase(ShutdownPhase::ClosingConnections).await;
        self.report.lock().websocket_closed = true;

        self.advance(ShutdownPhase::FlushingData);
        self.run_phase(ShutdownPhase::FlushingData).await;
        self.report.lock().metrics_flushed = true;

        self.advance(ShutdownPhase::Cleanup);
        self.run_phase(ShutdownPhase::Cleanup).await;
        self.report.lock().database_closed = true;

        {
            let mut report = self.report.lock();
            report.phase = ShutdownPhase::Completed;
            report.completed_at = Some(Utc::now());
        }
        let report = self.report.lock().clone();
        info!(
            duration_seconds = report.duration_seconds().unwrap_or(0.0),
            errors = report.errors.len(),
            "shutdown completed"
        );
        report
    }

    async fn run_phase(&self, phase: ShutdownPhase) {
        let callbacks: Vec<(String, ShutdownCallback)> = self
            .callbacks
            .lock()
            .get(&phase)
            .map(|v| v.to_vec())
            .unwrap_or_default();

        for (name, callback) in callbacks {
            match tokio::time::timeout(self.timeout, callback()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let message = format!("{phase}/{name}: {e}");
                    error!(%message, "shutdown callback failed");
                    self.report.lock().errors.push(message);
                }
                Err(_) => {
                    let message = format!(
                        "{phase}/{name}: timed out after {}s",
                        self.timeout.as_secs()
                    );
                    error!(%message, "shutdown callback timed out");
                    self.report.lock().errors.push(message);
                }
            }
        }
    }

    async fn drain_in_flight(&self) {
        let Some(counter) = self.in_flight.lock().clone() else {
            self.report.lock().orders_drained = true;
            return;
        };

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            let remaining = counter.load(Ordering::SeqCst);
            if remaining == 0 {
                self.report.lock().orders_drained = true;
                info!("in-flight orders drained");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                let message = format!(
                    "drain timed out after {}s with {remaining} in-flight orders",
                    self.drain_timeout.as_secs()
                );
                warn!(%message);
                self.report.lock().errors.push(message);

                let force_cancel = self.force_cancel.lock().clone();
                if let Some(callback) = force_cancel {
                    match tokio::time::timeout(FORCE_CANCEL_BUDGET, callback()).await {
                        Ok(Ok(())) => info!("force cancel completed"),
                        Ok(Err(e)) => {
                            self.report.lock().errors.push(format!("force_cancel: {e}"));
                        }
                        Err(_) => {
                            self.report
                                .lock()
                                .errors
                                .push("force_cancel: timed out".to_string());
                        }
                    }
                }
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> ShutdownCallback {
        let log = Arc::clone(log);
        Arc::new(move || {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push(name.to_string());
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_phases_advance_in_declared_order() {
        let controller = ShutdownController::new(5, 1);
        let log = Arc::new(Mutex::new(Vec::new()));
        controller.on_stop_new_work("a", recorder(&log, "stop_new_work"));
        controller.on_drain_orders("b", recorder(&log, "drain_orders"));
        controller.on_close_connections("c", recorder(&log, "close_connections"));
        controller.on_flush_data("d", recorder(&log, "flush_data"));
        controller.on_cleanup("e", recorder(&log, "cleanup"));

        let report = controller.shutdown().await;
        assert_eq!(report.phase, ShutdownPhase::Completed);
        assert!(report.errors.is_empty());
        assert!(report.orders_drained);
        assert!(report.websocket_closed);
        assert!(report.metrics_flushed);
        assert!(report.database_closed);
        assert_eq!(
            *log.lock(),
            vec![
                "stop_new_work",
                "drain_orders",
                "close_connections",
                "flush_data",
                "cleanup"
            ]
        );
    }

    #[tokio::test]
    async fn test_timeout_in_one_phase_does_not_skip_next() {
        let controller = ShutdownController::new(1, 1);
        let log = Arc::new(Mutex::new(Vec::new()));

        // This callback never finishes inside the 1s budget.
        controller.on_stop_new_work(
            "hang",
            Arc::new(|| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                })
            }),
        );
        controller.on_close_connections("ws", recorder(&log, "close_connections"));

        let report = controller.shutdown().await;
        assert_eq!(report.phase, ShutdownPhase::Completed);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("timed out"));
        assert_eq!(*log.lock(), vec!["close_connections"]);
    }

    #[tokio::test]
    async fn test_callback_error_is_collected() {
        let controller = ShutdownController::new(5, 1);
        controller.on_flush_data(
            "metrics",
            Arc::new(|| Box::pin(async { Err("flush exploded".to_string()) })),
        );

        let report = controller.shutdown().await;
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("flush exploded"));
        // The flag still flips: the phase ran.
        assert!(report.metrics_flushed);
    }

    #[tokio::test]
    async fn test_drain_polls_until_zero() {
        let controller = ShutdownController::new(5, 10);
        let counter = Arc::new(AtomicU64::new(1));
        controller.set_in_flight_counter(Arc::clone(&counter));

        let decrementer = Arc::clone(&counter);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            decrementer.store(0, Ordering::SeqCst);
        });

        let report = controller.shutdown().await;
        assert!(report.orders_drained);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_drain_timeout_invokes_force_cancel() {
        let controller = ShutdownController::new(5, 1);
        let counter = Arc::new(AtomicU64::new(3));
        controller.set_in_flight_counter(counter);

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        controller.set_force_cancel(Arc::new(move || {
            let flag = Arc::clone(&flag);
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
        }));

        let report = controller.shutdown().await;
        assert!(!report.orders_drained);
        assert!(cancelled.load(Ordering::SeqCst));
        assert!(report.errors.iter().any(|e| e.contains("drain timed out")));
        // The sequence still completed.
        assert_eq!(report.phase, ShutdownPhase::Completed);
    }

    #[tokio::test]
    async fn test_double_trigger_is_noop() {
        let controller = ShutdownController::new(5, 1);
        controller.trigger("SIGINT");
        let first_started = controller.report.lock().started_at;
        controller.trigger("SIGTERM");
        let report = controller.report.lock();
        assert_eq!(report.signal_received.as_deref(), Some("SIGINT"));
        assert_eq!(report.started_at, first_started);
    }

    #[tokio::test]
    async fn test_trigger_cancels_token() {
        let controller = Arc::new(ShutdownController::new(5, 1));
        let token = controller.cancellation_token();
        assert!(!token.is_cancelled());
        controller.trigger("SIGTERM");
        assert!(token.is_cancelled());
        controller.wait_for_trigger().await;
    }
}
