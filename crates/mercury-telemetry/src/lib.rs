//! Telemetry: structured logging, Prometheus metrics and the HTTP
//! health/metrics surface.

pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use health::{HealthReport, HealthServer, HealthStatus};
pub use logging::init_logging;
pub use metrics::{gather_metrics, MetricsRecorder};
