//! The gabagool asymmetric binary arbitrage strategy.
//!
//! Principles:
//! 1. Never predict direction; always hedge both sides.
//! 2. Only enter when spread > threshold.
//! 3. Buy equal shares of YES and NO.
//! 4. Hold until market resolution.

use crate::error::{StrategyError, StrategyResult};
use crate::strategy::Strategy;
use chrono::{DateTime, Duration, Utc};
use mercury_core::events::OrderBookSnapshotEvent;
use mercury_core::{ConditionId, SignalPriority, SignalType, TradingSignal};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Gabagool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GabagoolConfig {
    /// Start enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minimum spread (in dollars) worth signaling. Default 0.015.
    #[serde(default = "default_min_spread_threshold")]
    pub min_spread_threshold: Decimal,
    /// Budget per trade and hard cap per side, in USD.
    #[serde(default = "default_max_trade_size_usd")]
    pub max_trade_size_usd: Decimal,
    /// Markets to watch. Empty means every market the feed carries.
    #[serde(default)]
    pub markets: Vec<ConditionId>,
    /// Minimum seconds between signals per market.
    #[serde(default = "default_signal_cooldown_seconds")]
    pub signal_cooldown_seconds: u64,
    /// Seconds until an emitted signal expires.
    #[serde(default = "default_signal_ttl_seconds")]
    pub signal_ttl_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_min_spread_threshold() -> Decimal {
    dec!(0.015)
}

fn default_max_trade_size_usd() -> Decimal {
    dec!(100)
}

fn default_signal_cooldown_seconds() -> u64 {
    5
}

fn default_signal_ttl_seconds() -> u64 {
    30
}

impl Default for GabagoolConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            min_spread_threshold: default_min_spread_threshold(),
            max_trade_size_usd: default_max_trade_size_usd(),
            markets: Vec::new(),
            signal_cooldown_seconds: default_signal_cooldown_seconds(),
            signal_ttl_seconds: default_signal_ttl_seconds(),
        }
    }
}

impl GabagoolConfig {
    pub fn validate(&self) -> StrategyResult<()> {
        if self.min_spread_threshold <= Decimal::ZERO || self.min_spread_threshold >= Decimal::ONE
        {
            return Err(StrategyError::InvalidConfig(format!(
                "min_spread_threshold must be in (0, 1): {}",
                self.min_spread_threshold
            )));
        }
        if self.max_trade_size_usd <= Decimal::ZERO {
            return Err(StrategyError::InvalidConfig(format!(
                "max_trade_size_usd must be positive: {}",
                self.max_trade_size_usd
            )));
        }
        Ok(())
    }
}

/// Fixed slippage tolerance on emitted signals: one cent.
const MAX_SLIPPAGE_USD: Decimal = dec!(0.01);

/// Spread (cents) at and above which confidence saturates.
const MAX_CONFIDENCE_SPREAD_CENTS: Decimal = dec!(5);

pub struct GabagoolStrategy {
    config: GabagoolConfig,
    enabled: bool,
    running: bool,
    last_signal_time: HashMap<ConditionId, DateTime<Utc>>,
}

impl GabagoolStrategy {
    pub fn new(config: GabagoolConfig) -> StrategyResult<Self> {
        config.validate()?;
        let enabled = config.enabled;
        Ok(Self {
            config,
            enabled,
            running: false,
            last_signal_time: HashMap::new(),
        })
    }

    fn on_cooldown(&self, market_id: &ConditionId, now: DateTime<Utc>) -> bool {
        self.last_signal_time
            .get(market_id)
            .map(|last| now - *last < Duration::seconds(self.config.signal_cooldown_seconds as i64))
            .unwrap_or(false)
    }

    /// Equal-shares sizing. For arbitrage profit both sides need the SAME
    /// share count; the dollar split is therefore uneven, spending more
    /// on the expensive side. Both amounts are scaled down uniformly when
    /// either would exceed the per-trade cap.
    pub fn calculate_position_sizes(
        &self,
        budget: Decimal,
        yes_price: Decimal,
        no_price: Decimal,
    ) -> (Decimal, Decimal) {
        if yes_price <= Decimal::ZERO || no_price <= Decimal::ZERO {
            return (Decimal::ZERO, Decimal::ZERO);
        }

        let cost_per_pair = yes_price + no_price;
        if cost_per_pair <= Decimal::ZERO || cost_per_pair >= Decimal::ONE {
            return (Decimal::ZERO, Decimal::ZERO);
        }

        let num_pairs = budget / cost_per_pair;
        let mut yes_amount = num_pairs * yes_price;
        let mut no_amount = num_pairs * no_price;

        let max_single = self.config.max_trade_size_usd;
        if yes_amount > max_single || no_amount > max_single {
            let scale = max_single / yes_amount.max(no_amount);
            yes_amount *= scale;
            no_amount *= scale;
        }

        (yes_amount, no_amount)
    }

    /// payout of the hedged pairs minus total cost.
    pub fn calculate_expected_profit(
        yes_amount: Decimal,
        no_amount: Decimal,
        yes_price: Decimal,
        no_price: Decimal,
    ) -> Decimal {
        if yes_price <= Decimal::ZERO || no_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let yes_shares = yes_amount / yes_price;
        let no_shares = no_amount / no_price;
        yes_shares.min(no_shares) - (yes_amount + no_amount)
    }

    /// Confidence scales linearly from 0.5 at the minimum spread to 0.95
    /// at five cents.
    fn confidence(&self, spread_cents: Decimal) -> Decimal {
        let min_cents = self.config.min_spread_threshold * dec!(100);
        if spread_cents <= min_cents {
            return dec!(0.5);
        }
        if spread_cents >= MAX_CONFIDENCE_SPREAD_CENTS {
            return dec!(0.95);
        }
        dec!(0.5)
            + (spread_cents - min_cents) / (MAX_CONFIDENCE_SPREAD_CENTS - min_cents) * dec!(0.45)
    }

    fn priority(spread_cents: Decimal) -> SignalPriority {
        if spread_cents >= dec!(4) {
            SignalPriority::Critical
        } else if spread_cents >= dec!(3) {
            SignalPriority::High
        } else if spread_cents >= dec!(2) {
            SignalPriority::Medium
        } else {
            SignalPriority::Low
        }
    }
}

impl Strategy for GabagoolStrategy {
    fn name(&self) -> &str {
        "gabagool"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn enable(&mut self) {
        self.enabled = true;
        info!(strategy = self.name(), "strategy enabled");
    }

    fn disable(&mut self) {
        self.enabled = false;
        info!(strategy = self.name(), "strategy disabled");
    }

    fn start(&mut self) {
        self.running = true;
        info!(
            strategy = self.name(),
            enabled = self.enabled,
            min_spread = %self.config.min_spread_threshold,
            max_trade = %self.config.max_trade_size_usd,
            markets = self.config.markets.len(),
            "strategy started"
        );
    }

    fn stop(&mut self) {
        self.running = false;
        info!(strategy = self.name(), "strategy stopped");
    }

    fn subscribed_markets(&self) -> HashSet<ConditionId> {
        self.config.markets.iter().cloned().collect()
    }

    fn on_market_data(&mut self, book: &OrderBookSnapshotEvent) -> Vec<TradingSignal> {
        if !self.enabled || !self.running {
            return Vec::new();
        }

        // Need asks on both sides.
        let (Some(yes_ask), Some(no_ask)) = (book.yes_best_ask, book.no_best_ask) else {
            return Vec::new();
        };
        let (yes_price, no_price) = (yes_ask.inner(), no_ask.inner());
        if yes_price <= Decimal::ZERO || no_price <= Decimal::ZERO {
            return Vec::new();
        }

        let combined = yes_price + no_price;
        if combined >= Decimal::ONE {
            return Vec::new();
        }

        let spread = Decimal::ONE - combined;
        if spread < self.config.min_spread_threshold {
            debug!(
                market_id = %book.market_id,
                spread = %spread,
                threshold = %self.config.min_spread_threshold,
                "spread below threshold"
            );
            return Vec::new();
        }

        let now = Utc::now();
        if self.on_cooldown(&book.market_id, now) {
            return Vec::new();
        }

        let (yes_amount, no_amount) =
            self.calculate_position_sizes(self.config.max_trade_size_usd, yes_price, no_price);
        if yes_amount <= Decimal::ZERO || no_amount <= Decimal::ZERO {
            return Vec::new();
        }

        let expected_pnl =
            Self::calculate_expected_profit(yes_amount, no_amount, yes_price, no_price);
        let spread_cents = spread * dec!(100);
        let profit_pct = spread / combined * dec!(100);

        let mut metadata = serde_json::Map::new();
        metadata.insert("spread_cents".into(), spread_cents.to_string().into());
        metadata.insert("profit_percentage".into(), profit_pct.to_string().into());
        metadata.insert("yes_amount".into(), yes_amount.to_string().into());
        metadata.insert("no_amount".into(), no_amount.to_string().into());

        let signal = TradingSignal::new(
            self.name(),
            book.market_id.clone(),
            SignalType::Arbitrage,
            self.confidence(spread_cents),
            Self::priority(spread_cents),
            yes_amount + no_amount,
            yes_ask,
            no_ask,
            expected_pnl,
            MAX_SLIPPAGE_USD,
            metadata,
            Some(Duration::seconds(self.config.signal_ttl_seconds as i64)),
        );

        self.last_signal_time.insert(book.market_id.clone(), now);

        info!(
            market_id = %book.market_id,
            signal_id = %signal.signal_id,
            spread_cents = %spread_cents,
            yes_price = %yes_price,
            no_price = %no_price,
            target_size = %signal.target_size_usd,
            expected_pnl = %expected_pnl,
            "arbitrage signal generated"
        );

        vec![signal]
    }
}
