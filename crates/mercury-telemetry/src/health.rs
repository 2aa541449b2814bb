//! HTTP health and metrics surface.
//!
//! `GET /health` returns the aggregated component status as JSON with
//! 200 for healthy/degraded and 503 for unhealthy; `GET /metrics`
//! returns the Prometheus text document.

use crate::error::{TelemetryError, TelemetryResult};
use crate::metrics::gather_metrics;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Aggregate health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Up but impaired (e.g. circuit breaker HALT); still returns 200 so
    /// orchestrators do not restart a deliberately halted bot.
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// The `/health` payload.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub redis_connected: bool,
    pub websocket_connected: bool,
    pub circuit_breaker_state: String,
    pub uptime_seconds: f64,
    pub active_strategies: Vec<String>,
    pub open_positions_count: u32,
}

/// Callback assembling the current report; wired by the application.
pub type HealthProvider = Arc<dyn Fn() -> HealthReport + Send + Sync>;

/// The health/metrics HTTP server.
pub struct HealthServer {
    addr: SocketAddr,
    provider: HealthProvider,
}

impl HealthServer {
    pub fn new(addr: SocketAddr, provider: HealthProvider) -> Self {
        Self { addr, provider }
    }

    pub fn router(provider: HealthProvider) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/metrics", get(handle_metrics))
            .with_state(provider)
    }

    /// Serve until the token is cancelled.
    pub async fn run(self, cancel: CancellationToken) -> TelemetryResult<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| TelemetryError::Server(e.to_string()))?;
        info!(addr = %self.addr, "health server listening");

        axum::serve(listener, Self::router(self.provider))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| TelemetryError::Server(e.to_string()))
    }
}

async fn handle_health(State(provider): State<HealthProvider>) -> impl IntoResponse {
    let report = provider();
    (report.status.status_code(), Json(report))
}

async fn handle_metrics() -> impl IntoResponse {
    match gather_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            e.to_string(),
        ),
    }
}
