//! Application wiring.
//!
//! Builds every component, connects them through the event bus, wires
//! the shutdown sequence and the health surface, and runs until a
//! shutdown trigger.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::shutdown::ShutdownController;
use mercury_bus::EventBus;
use mercury_core::{ConditionId, TokenId};
use mercury_executor::{ClobClient, ExecutionEngine, SimulatedClob};
use mercury_feed::{MarketDataService, MarketDataServiceConfig};
use mercury_risk::RiskManager;
use mercury_settlement::{
    ClaimBackend, DryRunClaimer, GammaClient, MarketInfoSource, SettlementManager,
};
use mercury_store::{CircuitBreakerRow, StateStore};
use mercury_strategy::{GabagoolStrategy, StrategyEngine};
use mercury_telemetry::{HealthReport, HealthServer, HealthStatus, MetricsRecorder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The assembled application.
pub struct Application {
    config: AppConfig,
    config_path: Option<String>,
    bus: Arc<EventBus>,
    store: Arc<StateStore>,
    feed: Arc<MarketDataService>,
    strategy_engine: Arc<StrategyEngine>,
    risk: Arc<RiskManager>,
    executor: Arc<ExecutionEngine>,
    settlement: Arc<SettlementManager>,
    shutdown: Arc<ShutdownController>,
    started_at: Instant,
}

impl Application {
    /// Build with the default transports: simulated CLOB and dry-run
    /// claimer. Live trading requires injected transports via
    /// [`Application::with_transports`].
    pub fn new(config: AppConfig) -> AppResult<Self> {
        if !config.mercury.dry_run {
            return Err(AppError::Config(
                "live trading requires a real CLOB transport and claim backend; \
                 set mercury.dry_run = true or construct with_transports"
                    .to_string(),
            ));
        }
        let oracle = Arc::new(
            GammaClient::new(config.mercury.gamma_base_url.clone(), Duration::from_secs(60))
                .map_err(AppError::Settlement)?,
        );
        Self::with_transports(
            config,
            Arc::new(SimulatedClob::new()),
            oracle,
            Arc::new(DryRunClaimer),
        )
    }

    /// Build with explicit transport implementations.
    pub fn with_transports(
        config: AppConfig,
        clob: Arc<dyn ClobClient>,
        oracle: Arc<dyn MarketInfoSource>,
        claimer: Arc<dyn ClaimBackend>,
    ) -> AppResult<Self> {
        config.validate()?;

        let bus = Arc::new(EventBus::new());
        let store = Arc::new(StateStore::open(&config.mercury.db_path)?);

        let feed_config = MarketDataServiceConfig {
            connection: config.connection_config(),
            stale_threshold_secs: config.mercury.stale_threshold_seconds,
            ..Default::default()
        };
        let feed = Arc::new(MarketDataService::new(feed_config, Arc::clone(&bus)));

        let strategy_engine = Arc::new(StrategyEngine::new(Arc::clone(&bus)));
        strategy_engine
            .register_strategy(Box::new(GabagoolStrategy::new(config.gabagool_config())?))?;

        let risk = Arc::new(RiskManager::new(
            config.risk_manager_config(),
            Arc::clone(&bus),
        ));

        let executor = Arc::new(ExecutionEngine::new(
            config.execution_config(),
            Arc::clone(&bus),
            clob,
            Arc::clone(&feed) as Arc<dyn mercury_book::SnapshotSource>,
            Arc::clone(&store),
        ));

        let settlement = Arc::new(SettlementManager::new(
            config.settlement_config(),
            Arc::clone(&bus),
            Arc::clone(&store),
            oracle,
            claimer,
        ));

        let shutdown = Arc::new(ShutdownController::new(
            config.mercury.shutdown_timeout_seconds,
            config.mercury.drain_timeout_seconds,
        ));

        Ok(Self {
            config,
            config_path: None,
            bus,
            store,
            feed,
            strategy_engine,
            risk,
            executor,
            settlement,
            shutdown,
            started_at: Instant::now(),
        })
    }

    /// Remember where the config came from so SIGHUP can re-read it.
    pub fn set_config_path(&mut self, path: impl Into<String>) {
        self.config_path = Some(path.into());
    }

    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    fn wire_shutdown(&self) {
        let engine = Arc::clone(&self.strategy_engine);
        self.shutdown.on_stop_new_work(
            "strategy_engine",
            Arc::new(move || {
                let engine = Arc::clone(&engine);
                Box::pin(async move {
                    engine.stop();
                    Ok(())
                })
            }),
        );

        self.shutdown
            .set_in_flight_counter(self.executor.in_flight_counter());

        let feed = Arc::clone(&self.feed);
        let bus = Arc::clone(&self.bus);
        self.shutdown.on_close_connections(
            "market_data",
            Arc::new(move || {
                let feed = Arc::clone(&feed);
                let bus = Arc::clone(&bus);
                Box::pin(async move {
                    feed.stop();
                    bus.disconnect().await.map_err(|e| e.to_string())
                })
            }),
        );

        let risk = Arc::clone(&self.risk);
        let store = Arc::clone(&self.store);
        self.shutdown.on_flush_data(
            "risk_state",
            Arc::new(move || {
                let risk = Arc::clone(&risk);
                let store = Arc::clone(&store);
                Box::pin(async move {
                    let snapshot = risk.snapshot();
                    let row = CircuitBreakerRow {
                        date: chrono::Utc::now().date_naive(),
                        realized_pnl: snapshot.daily_pnl,
                        circuit_breaker_hit: snapshot.circuit_breaker_state.is_halted(),
                        hit_at: snapshot.circuit_breaker_triggered_at,
                        hit_reason: snapshot
                            .circuit_breaker_state
                            .is_halted()
                            .then(|| snapshot.circuit_breaker_state.to_string()),
                        total_trades_today: snapshot.daily_trades,
                        updated_at: chrono::Utc::now(),
                    };
                    store.save_circuit_breaker(&row).map_err(|e| e.to_string())
                })
            }),
        );

        let settlement = Arc::clone(&self.settlement);
        let risk = Arc::clone(&self.risk);
        let executor = Arc::clone(&self.executor);
        self.shutdown.on_cleanup(
            "services",
            Arc::new(move || {
                let settlement = Arc::clone(&settlement);
                let risk = Arc::clone(&risk);
                let executor = Arc::clone(&executor);
                Box::pin(async move {
                    settlement.stop();
                    executor.stop();
                    risk.stop();
                    Ok(())
                })
            }),
        );
    }

    fn health_provider(&self) -> mercury_telemetry::health::HealthProvider {
        let bus = Arc::clone(&self.bus);
        let feed = Arc::clone(&self.feed);
        let risk = Arc::clone(&self.risk);
        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.strategy_engine);
        let started_at = self.started_at;

        Arc::new(move || {
            let breaker = risk.circuit_breaker_state();
            let ws_connected = feed.is_connected();
            let open_positions = store.open_positions_count();

            let status = match &open_positions {
                Err(_) => HealthStatus::Unhealthy,
                Ok(_) if !ws_connected || breaker.is_halted() => HealthStatus::Degraded,
                Ok(_) => HealthStatus::Healthy,
            };

            HealthReport {
                status,
                redis_connected: bus.is_connected(),
                websocket_connected: ws_connected,
                circuit_breaker_state: breaker.to_string(),
                uptime_seconds: started_at.elapsed().as_secs_f64(),
                active_strategies: engine.enabled_strategies(),
                open_positions_count: open_positions.unwrap_or(0),
            }
        })
    }

    /// Start everything and block until shutdown completes.
    pub async fn run(&self) -> AppResult<crate::shutdown::ShutdownReport> {
        info!(dry_run = self.config.mercury.dry_run, "starting mercury");

        // Restore daily risk state persisted before the last stop.
        match self.store.load_circuit_breaker() {
            Ok(Some(row)) if row.date == chrono::Utc::now().date_naive() => {
                info!(
                    realized_pnl = %row.realized_pnl,
                    trades = row.total_trades_today,
                    "restoring persisted daily risk state"
                );
                self.risk
                    .restore(row.realized_pnl, row.total_trades_today, row.hit_at);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not load persisted circuit breaker"),
        }

        MetricsRecorder::attach(&self.bus)?;
        self.wire_shutdown();

        self.risk.start()?;
        self.executor.start()?;
        self.settlement.start()?;
        self.strategy_engine.start()?;
        self.feed.start();

        for market in &self.config.strategies.gabagool.markets {
            self.feed
                .subscribe_market(
                    ConditionId::from(market.condition_id.as_str()),
                    TokenId::from(market.yes_token_id.as_str()),
                    TokenId::from(market.no_token_id.as_str()),
                )
                .await?;
        }

        let health_addr: SocketAddr = ([0, 0, 0, 0], self.config.mercury.health_port).into();
        let health_server = HealthServer::new(health_addr, self.health_provider());
        let health_cancel = self.shutdown.cancellation_token();
        tokio::spawn(async move {
            if let Err(e) = health_server.run(health_cancel).await {
                warn!(error = %e, "health server exited");
            }
        });

        // Periodic refresh of the gauges no bus event maintains.
        {
            use mercury_telemetry::metrics::{
                CIRCUIT_BREAKER_STATE, FEED_PARSE_ERRORS, OPEN_POSITIONS, STALE_MARKETS,
                WS_CONNECTED,
            };
            let feed = Arc::clone(&self.feed);
            let risk = Arc::clone(&self.risk);
            let store = Arc::clone(&self.store);
            let cancel = self.shutdown.cancellation_token();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(5));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            WS_CONNECTED.set(if feed.is_connected() { 1.0 } else { 0.0 });
                            FEED_PARSE_ERRORS.set(feed.parse_errors() as i64);
                            STALE_MARKETS.set(feed.stale_market_count() as i64);
                            CIRCUIT_BREAKER_STATE
                                .set(risk.circuit_breaker_state() as i64);
                            if let Ok(count) = store.open_positions_count() {
                                OPEN_POSITIONS.set(count as i64);
                            }
                        }
                    }
                }
            });
        }

        // Daily counters roll over at UTC midnight.
        {
            let risk = Arc::clone(&self.risk);
            let cancel = self.shutdown.cancellation_token();
            tokio::spawn(async move {
                loop {
                    let now = chrono::Utc::now();
                    let next_midnight = (now + chrono::Duration::days(1))
                        .date_naive()
                        .and_hms_opt(0, 0, 0)
                        .expect("midnight exists")
                        .and_utc();
                    let until = (next_midnight - now)
                        .to_std()
                        .unwrap_or(Duration::from_secs(60));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(until) => {
                            info!("daily rollover");
                            risk.reset_daily();
                        }
                    }
                }
            });
        }

        // SIGHUP re-reads the config file and synchronizes the
        // strategies.<name>.enabled flags.
        #[cfg(unix)]
        if let Some(config_path) = self.config_path.clone() {
            let engine = Arc::clone(&self.strategy_engine);
            let cancel = self.shutdown.cancellation_token();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                let mut hangup = match signal(SignalKind::hangup()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGHUP handler");
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = hangup.recv() => {
                            match AppConfig::from_file(&config_path) {
                                Ok(reloaded) => {
                                    info!(config_path = %config_path, "configuration reloaded");
                                    engine
                                        .sync_from_config(&reloaded.strategy_enabled_map())
                                        .await;
                                }
                                Err(e) => {
                                    warn!(error = %e, "config reload failed, keeping current");
                                }
                            }
                        }
                    }
                }
            });
        }

        self.shutdown.install_signal_handlers();
        info!(
            markets = self.config.strategies.gabagool.markets.len(),
            "mercury running"
        );

        self.shutdown.wait_for_trigger().await;
        let report = self.shutdown.shutdown().await;
        if !report.errors.is_empty() {
            warn!(errors = ?report.errors, "shutdown finished with errors");
        }
        Ok(report)
    }
}
