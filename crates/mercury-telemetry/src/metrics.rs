//! Prometheus metrics.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally: a registration
//! failure means duplicate metric names, a fatal build error better
//! caught at startup than hidden. The panics can only fire during static
//! initialization.

use crate::error::TelemetryResult;
use mercury_bus::EventBus;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_int_gauge, Counter,
    CounterVec, Gauge, IntGauge, TextEncoder,
};
use serde_json::Value;
use std::sync::Arc;

/// WebSocket connection state (1 = connected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "mercury_ws_connected",
        "Market data WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Order book snapshots published.
pub static BOOK_SNAPSHOTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "mercury_book_snapshots_total",
        "Order book snapshots published on the bus"
    )
    .unwrap()
});

/// Frames the feed has dropped as undecodable (refreshed from the feed's
/// own counter).
pub static FEED_PARSE_ERRORS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "mercury_feed_parse_errors",
        "Transport frames dropped as undecodable"
    )
    .unwrap()
});

/// Markets currently flagged stale.
pub static STALE_MARKETS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("mercury_stale_markets", "Markets currently flagged stale").unwrap()
});

/// Signals emitted, by strategy and priority.
pub static SIGNALS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mercury_signals_total",
        "Trading signals emitted",
        &["strategy", "priority"]
    )
    .unwrap()
});

/// Risk gate outcomes.
pub static RISK_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mercury_risk_decisions_total",
        "Pre-trade gate outcomes",
        &["outcome"]
    )
    .unwrap()
});

/// Execution outcomes, by classification.
pub static EXECUTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mercury_executions_total",
        "Dual-leg execution outcomes",
        &["status"]
    )
    .unwrap()
});

/// Individual order fills.
pub static FILLS_TOTAL: Lazy<Counter> =
    Lazy::new(|| register_counter!("mercury_fills_total", "Order fills recorded").unwrap());

/// Settlement claim outcomes.
pub static SETTLEMENT_CLAIMS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mercury_settlement_claims_total",
        "Settlement claim outcomes",
        &["result"]
    )
    .unwrap()
});

/// Circuit breaker state (0=NORMAL 1=WARNING 2=CAUTION 3=HALT).
pub static CIRCUIT_BREAKER_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "mercury_circuit_breaker_state",
        "Circuit breaker state (0=NORMAL 1=WARNING 2=CAUTION 3=HALT)"
    )
    .unwrap()
});

/// Open positions held.
pub static OPEN_POSITIONS: Lazy<IntGauge> =
    Lazy::new(|| register_int_gauge!("mercury_open_positions", "Open positions held").unwrap());

/// Render the full registry as Prometheus text format.
pub fn gather_metrics() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    Ok(encoder.encode_to_string(&families)?)
}

/// Bus-driven metrics updater: subscribes to the event streams and keeps
/// the statics current, so no component needs a direct telemetry
/// dependency.
pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn attach(bus: &Arc<EventBus>) -> TelemetryResult<()> {
        bus.subscribe(
            "market.orderbook.*",
            Arc::new(|_topic, _payload| {
                Box::pin(async {
                    BOOK_SNAPSHOTS_TOTAL.inc();
                    Ok(())
                })
            }),
        )?;

        bus.subscribe(
            "signal.*",
            Arc::new(|topic, payload| {
                Box::pin(async move {
                    let strategy = topic.rsplit('.').next().unwrap_or("unknown").to_string();
                    let priority = payload
                        .get("priority")
                        .and_then(Value::as_str)
                        .unwrap_or("UNKNOWN")
                        .to_string();
                    SIGNALS_TOTAL.with_label_values(&[&strategy, &priority]).inc();
                    Ok(())
                })
            }),
        )?;

        bus.subscribe(
            "risk.approved.*",
            Arc::new(|_topic, _payload| {
                Box::pin(async {
                    RISK_DECISIONS_TOTAL.with_label_values(&["approved"]).inc();
                    Ok(())
                })
            }),
        )?;

        bus.subscribe(
            "risk.rejected.*",
            Arc::new(|_topic, _payload| {
                Box::pin(async {
                    RISK_DECISIONS_TOTAL.with_label_values(&["rejected"]).inc();
                    Ok(())
                })
            }),
        )?;

        bus.subscribe(
            "order.filled",
            Arc::new(|_topic, _payload| {
                Box::pin(async {
                    FILLS_TOTAL.inc();
                    Ok(())
                })
            }),
        )?;

        bus.subscribe(
            "execution.*",
            Arc::new(|topic, _payload| {
                Box::pin(async move {
                    let status = match topic.as_str() {
                        "execution.failed" => "no_fill",
                        "execution.partial_fill" => "partial_fill",
                        _ => "skipped",
                    };
                    EXECUTIONS_TOTAL.with_label_values(&[status]).inc();
                    Ok(())
                })
            }),
        )?;

        bus.subscribe(
            "position.opened",
            Arc::new(|_topic, _payload| {
                Box::pin(async {
                    EXECUTIONS_TOTAL.with_label_values(&["full_fill"]).inc();
                    OPEN_POSITIONS.inc();
                    Ok(())
                })
            }),
        )?;

        bus.subscribe(
            "settlement.claimed",
            Arc::new(|_topic, _payload| {
                Box::pin(async {
                    SETTLEMENT_CLAIMS_TOTAL.with_label_values(&["claimed"]).inc();
                    OPEN_POSITIONS.dec();
                    Ok(())
                })
            }),
        )?;

        bus.subscribe(
            "settlement.failed",
            Arc::new(|_topic, payload| {
                Box::pin(async move {
                    let result = if payload
                        .get("is_permanent")
                        .and_then(Value::as_bool)
                        .unwrap_or(false)
                    {
                        "abandoned"
                    } else {
                        "failed"
                    };
                    SETTLEMENT_CLAIMS_TOTAL.with_label_values(&[result]).inc();
                    Ok(())
                })
            }),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_recorder_counts_bus_events() {
        let bus = Arc::new(EventBus::new());
        MetricsRecorder::attach(&bus).unwrap();

        let fills_before = FILLS_TOTAL.get();
        let approved_before = RISK_DECISIONS_TOTAL.with_label_values(&["approved"]).get();

        bus.publish("order.filled", json!({})).await.unwrap();
        bus.publish("risk.approved.sig-1", json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(FILLS_TOTAL.get(), fills_before + 1.0);
        assert_eq!(
            RISK_DECISIONS_TOTAL.with_label_values(&["approved"]).get(),
            approved_before + 1.0
        );
    }

    #[test]
    fn test_gather_renders_text() {
        FILLS_TOTAL.inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("mercury_fills_total"));
    }
}
