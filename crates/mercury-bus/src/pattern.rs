//! Topic pattern matching.
//!
//! Topics are dotted paths. A pattern either matches exactly or ends in a
//! single trailing `*` segment: `market.orderbook.*` matches one or more
//! trailing segments under `market.orderbook`, `market.*` matches
//! everything below `market`. Wildcards are only valid in the final
//! position.

use crate::error::{BusError, BusResult};
use std::fmt;

/// A parsed, validated subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    raw: String,
    /// Leading literal segments (everything before a trailing `*`).
    prefix: Vec<String>,
    wildcard: bool,
}

impl TopicPattern {
    /// Parse a pattern string.
    ///
    /// Fails on empty patterns, empty segments, or a `*` anywhere other
    /// than the final segment.
    pub fn parse(pattern: &str) -> BusResult<Self> {
        if pattern.is_empty() {
            return Err(BusError::InvalidPattern("empty pattern".to_string()));
        }

        let segments: Vec<&str> = pattern.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(BusError::InvalidPattern(format!(
                "empty segment in '{pattern}'"
            )));
        }

        let wildcard = *segments.last().expect("non-empty") == "*";
        let literal_count = if wildcard {
            segments.len() - 1
        } else {
            segments.len()
        };

        if segments[..literal_count].iter().any(|s| s.contains('*')) {
            return Err(BusError::InvalidPattern(format!(
                "wildcard only allowed as the final segment: '{pattern}'"
            )));
        }

        if wildcard && literal_count == 0 {
            return Err(BusError::InvalidPattern(
                "bare '*' would match every topic".to_string(),
            ));
        }

        Ok(Self {
            raw: pattern.to_string(),
            prefix: segments[..literal_count]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            wildcard,
        })
    }

    /// Check whether a concrete topic matches this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let segments: Vec<&str> = topic.split('.').collect();

        if !self.wildcard {
            return segments.len() == self.prefix.len()
                && segments.iter().zip(&self.prefix).all(|(t, p)| t == p);
        }

        // Trailing wildcard: prefix must match and at least one more
        // segment must follow.
        segments.len() > self.prefix.len()
            && segments
                .iter()
                .zip(&self.prefix)
                .all(|(t, p)| t == p)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let p = TopicPattern::parse("settlement.claimed").unwrap();
        assert!(p.matches("settlement.claimed"));
        assert!(!p.matches("settlement.failed"));
        assert!(!p.matches("settlement.claimed.extra"));
        assert!(!p.matches("settlement"));
    }

    #[test]
    fn test_trailing_wildcard_one_segment() {
        let p = TopicPattern::parse("market.orderbook.*").unwrap();
        assert!(p.matches("market.orderbook.0xabc"));
        assert!(!p.matches("market.orderbook"));
        assert!(!p.matches("market.stale.0xabc"));
    }

    #[test]
    fn test_wildcard_matches_all_below() {
        let p = TopicPattern::parse("market.*").unwrap();
        assert!(p.matches("market.orderbook.0xabc"));
        assert!(p.matches("market.stale.0xabc"));
        assert!(p.matches("market.trade.x.y"));
        assert!(!p.matches("market"));
        assert!(!p.matches("signal.gabagool"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(TopicPattern::parse("").is_err());
        assert!(TopicPattern::parse("*").is_err());
        assert!(TopicPattern::parse("market.*.orderbook").is_err());
        assert!(TopicPattern::parse("market..orderbook").is_err());
        assert!(TopicPattern::parse("market.").is_err());
    }

    #[test]
    fn test_risk_approved_wildcard() {
        let p = TopicPattern::parse("risk.approved.*").unwrap();
        assert!(p.matches("risk.approved.sig-123"));
        assert!(!p.matches("risk.rejected.sig-123"));
    }
}
