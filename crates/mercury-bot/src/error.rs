//! Error types for the application crate.

use thiserror::Error;

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] mercury_store::StoreError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] mercury_strategy::StrategyError),

    #[error("Risk error: {0}")]
    Risk(#[from] mercury_risk::RiskError),

    #[error("Executor error: {0}")]
    Executor(#[from] mercury_executor::ExecutorError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] mercury_settlement::SettlementError),

    #[error("Feed error: {0}")]
    Feed(#[from] mercury_feed::FeedError),

    #[error("Bus error: {0}")]
    Bus(#[from] mercury_bus::BusError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] mercury_telemetry::TelemetryError),
}

/// Result type alias for application operations.
pub type AppResult<T> = std::result::Result<T, AppError>;
