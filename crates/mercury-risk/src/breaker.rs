//! Staged circuit breaker.
//!
//! State is a pure function of (consecutive failures, daily loss) against
//! the configured thresholds; the manager recomputes it after every
//! failure or P&L event. HALT additionally carries a cooldown stamped at
//! trigger time.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Circuit breaker state, escalating NORMAL -> WARNING -> CAUTION -> HALT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CircuitBreakerState {
    #[default]
    Normal,
    Warning,
    Caution,
    Halt,
}

impl CircuitBreakerState {
    /// Position-size multiplier strategies apply in each state.
    pub fn size_multiplier(&self) -> Decimal {
        match self {
            Self::Normal => Decimal::ONE,
            Self::Warning => dec!(0.5),
            Self::Caution => dec!(0.25),
            Self::Halt => Decimal::ZERO,
        }
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, Self::Halt)
    }
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "NORMAL",
            Self::Warning => "WARNING",
            Self::Caution => "CAUTION",
            Self::Halt => "HALT",
        };
        write!(f, "{s}")
    }
}

/// Escalation thresholds, by consecutive failures and daily loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerThresholds {
    #[serde(default = "default_warning_failures")]
    pub warning_failures: u32,
    #[serde(default = "default_caution_failures")]
    pub caution_failures: u32,
    #[serde(default = "default_halt_failures")]
    pub halt_failures: u32,
    #[serde(default = "default_warning_loss")]
    pub warning_loss: Decimal,
    #[serde(default = "default_caution_loss")]
    pub caution_loss: Decimal,
    #[serde(default = "default_halt_loss")]
    pub halt_loss: Decimal,
    /// Minutes a HALT suppresses approvals before they may resume.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
}

fn default_warning_failures() -> u32 {
    3
}

fn default_caution_failures() -> u32 {
    4
}

fn default_halt_failures() -> u32 {
    5
}

fn default_warning_loss() -> Decimal {
    dec!(250)
}

fn default_caution_loss() -> Decimal {
    dec!(500)
}

fn default_halt_loss() -> Decimal {
    dec!(1000)
}

fn default_cooldown_minutes() -> u64 {
    30
}

impl Default for CircuitBreakerThresholds {
    fn default() -> Self {
        Self {
            warning_failures: default_warning_failures(),
            caution_failures: default_caution_failures(),
            halt_failures: default_halt_failures(),
            warning_loss: default_warning_loss(),
            caution_loss: default_caution_loss(),
            halt_loss: default_halt_loss(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

/// Compute the breaker state for the given failure count and loss
/// (positive loss = money lost today).
pub fn compute_state(
    consecutive_failures: u32,
    loss: Decimal,
    thresholds: &CircuitBreakerThresholds,
) -> CircuitBreakerState {
    if consecutive_failures >= thresholds.halt_failures || loss >= thresholds.halt_loss {
        CircuitBreakerState::Halt
    } else if consecutive_failures >= thresholds.caution_failures
        || loss >= thresholds.caution_loss
    {
        CircuitBreakerState::Caution
    } else if consecutive_failures >= thresholds.warning_failures
        || loss >= thresholds.warning_loss
    {
        CircuitBreakerState::Warning
    } else {
        CircuitBreakerState::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> CircuitBreakerThresholds {
        CircuitBreakerThresholds {
            warning_failures: 3,
            caution_failures: 4,
            halt_failures: 5,
            warning_loss: dec!(250),
            caution_loss: dec!(500),
            halt_loss: dec!(1000),
            cooldown_minutes: 30,
        }
    }

    #[test]
    fn test_failure_escalation_table() {
        let t = thresholds();
        assert_eq!(compute_state(0, dec!(0), &t), CircuitBreakerState::Normal);
        assert_eq!(compute_state(2, dec!(0), &t), CircuitBreakerState::Normal);
        assert_eq!(compute_state(3, dec!(0), &t), CircuitBreakerState::Warning);
        assert_eq!(compute_state(4, dec!(0), &t), CircuitBreakerState::Caution);
        assert_eq!(compute_state(5, dec!(0), &t), CircuitBreakerState::Halt);
        assert_eq!(compute_state(99, dec!(0), &t), CircuitBreakerState::Halt);
    }

    #[test]
    fn test_loss_escalation_table() {
        let t = thresholds();
        assert_eq!(compute_state(0, dec!(249.99), &t), CircuitBreakerState::Normal);
        assert_eq!(compute_state(0, dec!(250), &t), CircuitBreakerState::Warning);
        assert_eq!(compute_state(0, dec!(500), &t), CircuitBreakerState::Caution);
        assert_eq!(compute_state(0, dec!(1000), &t), CircuitBreakerState::Halt);
        // A profit never escalates.
        assert_eq!(compute_state(0, dec!(-50), &t), CircuitBreakerState::Normal);
    }

    #[test]
    fn test_worst_dimension_wins() {
        let t = thresholds();
        // Failures say WARNING, loss says HALT: HALT.
        assert_eq!(compute_state(3, dec!(1200), &t), CircuitBreakerState::Halt);
        // Failures say HALT, loss says NORMAL: HALT.
        assert_eq!(compute_state(5, dec!(0), &t), CircuitBreakerState::Halt);
    }

    #[test]
    fn test_size_multipliers() {
        assert_eq!(CircuitBreakerState::Normal.size_multiplier(), dec!(1));
        assert_eq!(CircuitBreakerState::Warning.size_multiplier(), dec!(0.5));
        assert_eq!(CircuitBreakerState::Caution.size_multiplier(), dec!(0.25));
        assert_eq!(CircuitBreakerState::Halt.size_multiplier(), dec!(0));
    }
}
