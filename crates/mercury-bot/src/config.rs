//! Application configuration.
//!
//! Loaded from a TOML file with `MERCURY__`-prefixed environment
//! overrides layered on top. Every section has serde defaults so a
//! minimal file is enough to run dry.

use crate::error::{AppError, AppResult};
use mercury_core::ConditionId;
use mercury_executor::ExecutionConfig;
use mercury_risk::{CircuitBreakerThresholds, RiskLimits, RiskManagerConfig};
use mercury_settlement::{BackoffPolicy, SettlementConfig};
use mercury_strategy::GabagoolConfig;
use mercury_ws::ConnectionConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level config tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mercury: MercurySection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub settlement: SettlementSection,
    #[serde(default)]
    pub strategies: StrategiesSection,
    #[serde(default)]
    pub retry: RetrySection,
}

/// Core runtime options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MercurySection {
    /// Never touch the real transport or chain.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
    #[serde(default = "default_drain_timeout_seconds")]
    pub drain_timeout_seconds: u64,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_gamma_base_url")]
    pub gamma_base_url: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    #[serde(default = "default_stale_threshold_seconds")]
    pub stale_threshold_seconds: u64,
}

fn default_dry_run() -> bool {
    true
}

fn default_shutdown_timeout_seconds() -> u64 {
    30
}

fn default_drain_timeout_seconds() -> u64 {
    60
}

fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}

fn default_gamma_base_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_db_path() -> String {
    "mercury.db".to_string()
}

fn default_health_port() -> u16 {
    8080
}

fn default_stale_threshold_seconds() -> u64 {
    60
}

impl Default for MercurySection {
    fn default() -> Self {
        Self {
            dry_run: default_dry_run(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
            drain_timeout_seconds: default_drain_timeout_seconds(),
            ws_url: default_ws_url(),
            gamma_base_url: default_gamma_base_url(),
            db_path: default_db_path(),
            health_port: default_health_port(),
            stale_threshold_seconds: default_stale_threshold_seconds(),
        }
    }
}

/// Risk limits and circuit-breaker thresholds, flattened the way the
/// config surface spells them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskSection {
    #[serde(default)]
    pub max_daily_loss_usd: Option<Decimal>,
    #[serde(default)]
    pub max_position_size_usd: Option<Decimal>,
    #[serde(default)]
    pub max_unhedged_exposure_usd: Option<Decimal>,
    #[serde(default)]
    pub circuit_breaker_warning_failures: Option<u32>,
    #[serde(default)]
    pub circuit_breaker_caution_failures: Option<u32>,
    #[serde(default)]
    pub circuit_breaker_halt_failures: Option<u32>,
    #[serde(default)]
    pub circuit_breaker_warning_loss: Option<Decimal>,
    #[serde(default)]
    pub circuit_breaker_caution_loss: Option<Decimal>,
    #[serde(default)]
    pub circuit_breaker_halt_loss: Option<Decimal>,
    #[serde(default)]
    pub cooldown_minutes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default = "default_max_liquidity_consumption_pct")]
    pub max_liquidity_consumption_pct: Decimal,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

fn default_max_liquidity_consumption_pct() -> Decimal {
    Decimal::new(50, 2) // 0.50
}

fn default_parallel() -> bool {
    true
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            max_liquidity_consumption_pct: default_max_liquidity_consumption_pct(),
            parallel: default_parallel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSection {
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_max_claim_attempts")]
    pub max_claim_attempts: u32,
}

fn default_check_interval_seconds() -> u64 {
    60
}

fn default_max_claim_attempts() -> u32 {
    5
}

impl Default for SettlementSection {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval_seconds(),
            max_claim_attempts: default_max_claim_attempts(),
        }
    }
}

/// One tradable market: the condition and both outcome tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEntry {
    pub condition_id: String,
    pub yes_token_id: String,
    pub no_token_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategiesSection {
    #[serde(default)]
    pub gabagool: GabagoolSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GabagoolSection {
    #[serde(default = "default_strategy_enabled")]
    pub enabled: bool,
    #[serde(default = "default_min_spread_threshold")]
    pub min_spread_threshold: Decimal,
    #[serde(default = "default_max_trade_size_usd")]
    pub max_trade_size_usd: Decimal,
    #[serde(default = "default_signal_cooldown_seconds")]
    pub signal_cooldown_seconds: u64,
    #[serde(default)]
    pub markets: Vec<MarketEntry>,
}

fn default_strategy_enabled() -> bool {
    true
}

fn default_min_spread_threshold() -> Decimal {
    Decimal::new(15, 3) // 0.015
}

fn default_max_trade_size_usd() -> Decimal {
    Decimal::from(100)
}

fn default_signal_cooldown_seconds() -> u64 {
    5
}

impl Default for GabagoolSection {
    fn default() -> Self {
        Self {
            enabled: default_strategy_enabled(),
            min_spread_threshold: default_min_spread_threshold(),
            max_trade_size_usd: default_max_trade_size_usd(),
            signal_cooldown_seconds: default_signal_cooldown_seconds(),
            markets: Vec::new(),
        }
    }
}

/// Default retry policy for outbound adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_min_wait_seconds")]
    pub min_wait_seconds: u64,
    #[serde(default = "default_retry_max_wait_seconds")]
    pub max_wait_seconds: u64,
    #[serde(default = "default_retry_jitter")]
    pub jitter: bool,
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_min_wait_seconds() -> u64 {
    60
}

fn default_retry_max_wait_seconds() -> u64 {
    3600
}

fn default_retry_jitter() -> bool {
    true
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            min_wait_seconds: default_retry_min_wait_seconds(),
            max_wait_seconds: default_retry_max_wait_seconds(),
            jitter: default_retry_jitter(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file plus `MERCURY__SECTION__KEY` environment
    /// overrides.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("MERCURY").separator("__"))
            .build()?;
        let parsed: Self = settings.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> AppResult<()> {
        let pct = self.execution.max_liquidity_consumption_pct;
        if pct <= Decimal::ZERO || pct > Decimal::ONE {
            return Err(AppError::Config(format!(
                "execution.max_liquidity_consumption_pct must be in (0, 1]: {pct}"
            )));
        }
        if self.settlement.max_claim_attempts == 0 {
            return Err(AppError::Config(
                "settlement.max_claim_attempts must be at least 1".to_string(),
            ));
        }
        for market in &self.strategies.gabagool.markets {
            if market.condition_id.is_empty()
                || market.yes_token_id.is_empty()
                || market.no_token_id.is_empty()
            {
                return Err(AppError::Config(format!(
                    "incomplete market entry: {market:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn risk_manager_config(&self) -> RiskManagerConfig {
        let defaults_limits = RiskLimits::default();
        let defaults_breaker = CircuitBreakerThresholds::default();
        let r = &self.risk;
        RiskManagerConfig {
            limits: RiskLimits {
                max_daily_loss_usd: r
                    .max_daily_loss_usd
                    .unwrap_or(defaults_limits.max_daily_loss_usd),
                max_position_size_usd: r
                    .max_position_size_usd
                    .unwrap_or(defaults_limits.max_position_size_usd),
                max_unhedged_exposure_usd: r
                    .max_unhedged_exposure_usd
                    .unwrap_or(defaults_limits.max_unhedged_exposure_usd),
            },
            circuit_breaker: CircuitBreakerThresholds {
                warning_failures: r
                    .circuit_breaker_warning_failures
                    .unwrap_or(defaults_breaker.warning_failures),
                caution_failures: r
                    .circuit_breaker_caution_failures
                    .unwrap_or(defaults_breaker.caution_failures),
                halt_failures: r
                    .circuit_breaker_halt_failures
                    .unwrap_or(defaults_breaker.halt_failures),
                warning_loss: r
                    .circuit_breaker_warning_loss
                    .unwrap_or(defaults_breaker.warning_loss),
                caution_loss: r
                    .circuit_breaker_caution_loss
                    .unwrap_or(defaults_breaker.caution_loss),
                halt_loss: r
                    .circuit_breaker_halt_loss
                    .unwrap_or(defaults_breaker.halt_loss),
                cooldown_minutes: r.cooldown_minutes.unwrap_or(defaults_breaker.cooldown_minutes),
            },
        }
    }

    pub fn gabagool_config(&self) -> GabagoolConfig {
        let g = &self.strategies.gabagool;
        GabagoolConfig {
            enabled: g.enabled,
            min_spread_threshold: g.min_spread_threshold,
            max_trade_size_usd: g.max_trade_size_usd,
            markets: g
                .markets
                .iter()
                .map(|m| ConditionId::from(m.condition_id.as_str()))
                .collect(),
            signal_cooldown_seconds: g.signal_cooldown_seconds,
            signal_ttl_seconds: 30,
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            max_liquidity_consumption_pct: self.execution.max_liquidity_consumption_pct,
            parallel: self.execution.parallel,
            dry_run: self.mercury.dry_run,
            liquidity_depth_levels: 3,
        }
    }

    pub fn settlement_config(&self) -> SettlementConfig {
        SettlementConfig {
            check_interval_seconds: self.settlement.check_interval_seconds,
            max_claim_attempts: self.settlement.max_claim_attempts,
            backoff: BackoffPolicy {
                base_secs: self.retry.min_wait_seconds,
                cap_secs: self.retry.max_wait_seconds,
                jitter_pct: if self.retry.jitter { 10 } else { 0 },
            },
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.mercury.ws_url.clone(),
            ..Default::default()
        }
    }

    /// `strategies.<name>.enabled` flags for the reload sync hook.
    pub fn strategy_enabled_map(&self) -> HashMap<String, bool> {
        let mut map = HashMap::new();
        map.insert("gabagool".to_string(), self.strategies.gabagool.enabled);
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_config() {
        let config = AppConfig::default();
        assert!(config.mercury.dry_run);
        assert_eq!(config.mercury.shutdown_timeout_seconds, 30);
        assert_eq!(config.execution.max_liquidity_consumption_pct, dec!(0.50));
        assert!(config.execution.parallel);
        assert_eq!(config.settlement.check_interval_seconds, 60);
        assert_eq!(config.settlement.max_claim_attempts, 5);
        assert_eq!(config.strategies.gabagool.min_spread_threshold, dec!(0.015));
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[mercury]
dry_run = true
drain_timeout_seconds = 15

[risk]
max_daily_loss_usd = "250"
circuit_breaker_halt_failures = 7

[execution]
parallel = false

[strategies.gabagool]
min_spread_threshold = "0.02"
max_trade_size_usd = "10"

[[strategies.gabagool.markets]]
condition_id = "0xcond"
yes_token_id = "tok-yes"
no_token_id = "tok-no"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mercury.drain_timeout_seconds, 15);
        assert!(!config.execution.parallel);

        let risk = config.risk_manager_config();
        assert_eq!(risk.limits.max_daily_loss_usd, dec!(250));
        assert_eq!(risk.circuit_breaker.halt_failures, 7);
        // Unset keys fall back to defaults.
        assert_eq!(risk.circuit_breaker.warning_failures, 3);

        let gabagool = config.gabagool_config();
        assert_eq!(gabagool.min_spread_threshold, dec!(0.02));
        assert_eq!(gabagool.markets.len(), 1);
        assert_eq!(gabagool.markets[0], ConditionId::from("0xcond"));
    }

    #[test]
    fn test_validation_rejects_bad_pct() {
        let mut config = AppConfig::default();
        config.execution.max_liquidity_consumption_pct = dec!(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_incomplete_market() {
        let mut config = AppConfig::default();
        config.strategies.gabagool.markets.push(MarketEntry {
            condition_id: "0xcond".into(),
            yes_token_id: String::new(),
            no_token_id: "tok-no".into(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settlement_backoff_from_retry_section() {
        let mut config = AppConfig::default();
        config.retry.min_wait_seconds = 30;
        config.retry.jitter = false;
        let settlement = config.settlement_config();
        assert_eq!(settlement.backoff.base_secs, 30);
        assert_eq!(settlement.backoff.jitter_pct, 0);
    }
}
