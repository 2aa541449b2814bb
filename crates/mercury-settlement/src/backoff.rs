//! Exponential backoff for claim retries.

use std::time::Duration;

/// Retry delay policy: base * 2^(attempt-1), capped, with ±10% jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_secs: u64,
    pub cap_secs: u64,
    /// Jitter half-width in percent (10 = ±10%).
    pub jitter_pct: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_secs: 60,
            cap_secs: 3600,
            jitter_pct: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, where `attempt` is the number of
    /// attempts already made (1 = first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let base_ms = self
            .base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.cap_secs)
            .saturating_mul(1000);

        // ±jitter_pct%, spread from a cheap nanosecond source.
        let spread = base_ms * self.jitter_pct / 100;
        if spread == 0 {
            return Duration::from_millis(base_ms);
        }
        let jitter = nanos_in_range(2 * spread);
        Duration::from_millis(base_ms - spread + jitter)
    }
}

fn nanos_in_range(range_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % range_ms.max(1)
}
