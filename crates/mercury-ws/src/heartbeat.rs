//! Heartbeat monitoring for the market-data socket.
//!
//! Sends PING every `ping_interval`, expects a PONG within
//! `pong_timeout`. Each expired wait increments a missed-pong counter;
//! two misses force a reconnect. Total silence past `stale_threshold`
//! also forces a reconnect regardless of pong state.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Missed pongs tolerated before the connection is considered dead.
pub const MAX_MISSED_PONGS: u32 = 2;

/// Heartbeat state for one connection attempt.
pub struct HeartbeatMonitor {
    ping_interval_secs: u64,
    pong_timeout_secs: u64,
    stale_threshold_secs: u64,
    last_ping: RwLock<Option<DateTime<Utc>>>,
    last_message: RwLock<DateTime<Utc>>,
    waiting_for_pong: RwLock<bool>,
    missed_pongs: AtomicU32,
}

impl HeartbeatMonitor {
    pub fn new(ping_interval_secs: u64, pong_timeout_secs: u64, stale_threshold_secs: u64) -> Self {
        Self {
            ping_interval_secs,
            pong_timeout_secs,
            stale_threshold_secs,
            last_ping: RwLock::new(None),
            last_message: RwLock::new(Utc::now()),
            waiting_for_pong: RwLock::new(false),
            missed_pongs: AtomicU32::new(0),
        }
    }

    /// Reset all state; called on every (re)connect.
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_message.write() = Utc::now();
        *self.waiting_for_pong.write() = false;
        self.missed_pongs.store(0, Ordering::SeqCst);
    }

    pub fn record_ping(&self) {
        *self.last_ping.write() = Some(Utc::now());
        *self.waiting_for_pong.write() = true;
    }

    pub fn record_pong(&self) {
        *self.waiting_for_pong.write() = false;
        self.missed_pongs.store(0, Ordering::SeqCst);
        if let Some(ping_time) = *self.last_ping.read() {
            let rtt_ms = (Utc::now() - ping_time).num_milliseconds();
            debug!(rtt_ms, "pong received");
        }
    }

    /// Record that any message arrived.
    pub fn record_message(&self) {
        *self.last_message.write() = Utc::now();
    }

    pub fn missed_pongs(&self) -> u32 {
        self.missed_pongs.load(Ordering::SeqCst)
    }

    pub fn seconds_since_last_message(&self) -> i64 {
        (Utc::now() - *self.last_message.read()).num_seconds()
    }

    /// Connection is stale when nothing at all arrived for the threshold.
    pub fn is_stale(&self) -> bool {
        self.seconds_since_last_message() >= self.stale_threshold_secs as i64
    }

    /// A ping is due when we are not already waiting for a pong and the
    /// interval elapsed since the last traffic.
    pub fn ping_due(&self) -> bool {
        if *self.waiting_for_pong.read() {
            return false;
        }
        self.seconds_since_last_message() >= self.ping_interval_secs as i64
    }

    /// Check for an expired pong wait; on expiry the miss is counted and
    /// the wait cleared so the next interval can ping again. Returns the
    /// updated miss count when a miss was recorded.
    pub fn check_pong_expiry(&self) -> Option<u32> {
        if !*self.waiting_for_pong.read() {
            return None;
        }
        let ping_time = (*self.last_ping.read())?;
        if (Utc::now() - ping_time).num_seconds() < self.pong_timeout_secs as i64 {
            return None;
        }
        *self.waiting_for_pong.write() = false;
        let missed = self.missed_pongs.fetch_add(1, Ordering::SeqCst) + 1;
        Some(missed)
    }

    /// Whether missed pongs crossed the reconnect threshold.
    pub fn pong_exhausted(&self) -> bool {
        self.missed_pongs() >= MAX_MISSED_PONGS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(20, 10, 60)
    }

    #[test]
    fn test_initial_state() {
        let hb = monitor();
        assert_eq!(hb.missed_pongs(), 0);
        assert!(!hb.is_stale());
        assert!(!hb.ping_due());
        assert!(hb.check_pong_expiry().is_none());
    }

    #[test]
    fn test_pong_resets_miss_counter() {
        let hb = monitor();
        hb.record_ping();
        hb.missed_pongs.store(1, Ordering::SeqCst);
        hb.record_pong();
        assert_eq!(hb.missed_pongs(), 0);
        assert!(!hb.pong_exhausted());
    }

    #[test]
    fn test_pong_expiry_counts_misses() {
        let hb = monitor();
        hb.record_ping();
        // Force the ping into the past.
        *hb.last_ping.write() = Some(Utc::now() - chrono::Duration::seconds(11));
        assert_eq!(hb.check_pong_expiry(), Some(1));
        assert!(!hb.pong_exhausted());

        hb.record_ping();
        *hb.last_ping.write() = Some(Utc::now() - chrono::Duration::seconds(11));
        assert_eq!(hb.check_pong_expiry(), Some(2));
        assert!(hb.pong_exhausted());
    }

    #[test]
    fn test_stale_detection() {
        let hb = monitor();
        *hb.last_message.write() = Utc::now() - chrono::Duration::seconds(61);
        assert!(hb.is_stale());
        hb.record_message();
        assert!(!hb.is_stale());
    }

    #[test]
    fn test_reset_clears_everything() {
        let hb = monitor();
        hb.record_ping();
        hb.missed_pongs.store(2, Ordering::SeqCst);
        hb.reset();
        assert_eq!(hb.missed_pongs(), 0);
        assert!(hb.check_pong_expiry().is_none());
    }
}
