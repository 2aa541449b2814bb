//! Trading signal types.
//!
//! A `TradingSignal` is the immutable output of a strategy. Once emitted
//! it is never mutated; the risk manager and execution engine only read.

use crate::{ConditionId, Price};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// What the strategy wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    /// Buy equal shares of YES and NO (dual-leg).
    Arbitrage,
    BuyYes,
    BuyNo,
    SellYes,
    SellNo,
    Exit,
}

impl SignalType {
    /// Only ARBITRAGE signals take the dual-leg execution path; the rest
    /// describe single-leg intents for directional strategies.
    pub fn is_arbitrage(&self) -> bool {
        matches!(self, Self::Arbitrage)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arbitrage => write!(f, "ARBITRAGE"),
            Self::BuyYes => write!(f, "BUY_YES"),
            Self::BuyNo => write!(f, "BUY_NO"),
            Self::SellYes => write!(f, "SELL_YES"),
            Self::SellNo => write!(f, "SELL_NO"),
            Self::Exit => write!(f, "EXIT"),
        }
    }
}

/// Urgency bucket, derived from edge size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for SignalPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// An immutable trading signal emitted by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub signal_id: String,
    pub strategy_name: String,
    pub market_id: ConditionId,
    pub signal_type: SignalType,
    /// Confidence in [0, 1].
    pub confidence: Decimal,
    pub priority: SignalPriority,
    /// Total USD the strategy wants deployed.
    #[serde(with = "rust_decimal::serde::str")]
    pub target_size_usd: Decimal,
    pub yes_price: Price,
    pub no_price: Price,
    #[serde(with = "rust_decimal::serde::str")]
    pub expected_pnl: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_slippage: Decimal,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TradingSignal {
    /// Create a signal with a fresh id and `created_at = now`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy_name: impl Into<String>,
        market_id: ConditionId,
        signal_type: SignalType,
        confidence: Decimal,
        priority: SignalPriority,
        target_size_usd: Decimal,
        yes_price: Price,
        no_price: Price,
        expected_pnl: Decimal,
        max_slippage: Decimal,
        metadata: Map<String, Value>,
        ttl: Option<Duration>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            signal_id: Uuid::new_v4().to_string(),
            strategy_name: strategy_name.into(),
            market_id,
            signal_type,
            confidence,
            priority,
            target_size_usd,
            yes_price,
            no_price,
            expected_pnl,
            max_slippage,
            metadata,
            created_at,
            expires_at: ttl.map(|t| created_at + t),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }

    /// Canonical bus payload: every money field as a fixed-point string.
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "signal_id": self.signal_id,
            "strategy_name": self.strategy_name,
            "market_id": self.market_id.as_str(),
            "signal_type": self.signal_type.to_string(),
            "confidence": self.confidence.to_string(),
            "priority": self.priority.to_string(),
            "target_size_usd": self.target_size_usd.to_string(),
            "yes_price": self.yes_price.to_string(),
            "no_price": self.no_price.to_string(),
            "expected_pnl": self.expected_pnl.to_string(),
            "max_slippage": self.max_slippage.to_string(),
            "metadata": Value::Object(self.metadata.clone()),
            "created_at": self.created_at.to_rfc3339(),
            "expires_at": self.expires_at.map(|t| t.to_rfc3339()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal(ttl: Option<Duration>) -> TradingSignal {
        TradingSignal::new(
            "gabagool",
            ConditionId::from("0xcond"),
            SignalType::Arbitrage,
            dec!(0.5),
            SignalPriority::Medium,
            dec!(9.80),
            Price::new(dec!(0.48)),
            Price::new(dec!(0.50)),
            dec!(0.20),
            dec!(0.01),
            Map::new(),
            ttl,
        )
    }

    #[test]
    fn test_signal_expiry() {
        let s = signal(Some(Duration::seconds(30)));
        assert!(!s.is_expired(Utc::now()));
        assert!(s.is_expired(Utc::now() + Duration::seconds(31)));

        let no_ttl = signal(None);
        assert!(!no_ttl.is_expired(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn test_payload_serializes_money_as_strings() {
        let s = signal(None);
        let payload = s.to_payload();
        assert_eq!(payload["target_size_usd"], "9.80");
        assert_eq!(payload["yes_price"], "0.48");
        assert_eq!(payload["signal_type"], "ARBITRAGE");
    }

    #[test]
    fn test_signal_ids_unique() {
        assert_ne!(signal(None).signal_id, signal(None).signal_id);
    }
}
