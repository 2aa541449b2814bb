//! Binary-market identifiers.
//!
//! A binary market is identified by its `ConditionId` and owns exactly
//! two outcome tokens: YES and NO. At resolution exactly one token pays
//! one dollar per share, the other zero.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a binary market (condition).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionId(pub String);

impl ConditionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConditionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one outcome token (one side of a binary market).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which side of a binary market a token represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
        }
    }
}

/// Resolution state of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketResolution {
    #[default]
    Unresolved,
    ResolvedYes,
    ResolvedNo,
}

impl MarketResolution {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    /// The winning outcome, if resolved.
    pub fn winner(&self) -> Option<Outcome> {
        match self {
            Self::Unresolved => None,
            Self::ResolvedYes => Some(Outcome::Yes),
            Self::ResolvedNo => Some(Outcome::No),
        }
    }
}

impl fmt::Display for MarketResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved => write!(f, "UNRESOLVED"),
            Self::ResolvedYes => write!(f, "RESOLVED_YES"),
            Self::ResolvedNo => write!(f, "RESOLVED_NO"),
        }
    }
}

/// A binary market and its two outcome tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub condition_id: ConditionId,
    pub yes_token_id: TokenId,
    pub no_token_id: TokenId,
    #[serde(default)]
    pub resolution: MarketResolution,
}

impl Market {
    pub fn new(condition_id: ConditionId, yes_token_id: TokenId, no_token_id: TokenId) -> Self {
        Self {
            condition_id,
            yes_token_id,
            no_token_id,
            resolution: MarketResolution::Unresolved,
        }
    }

    /// Map a token id to its outcome side, if it belongs to this market.
    pub fn outcome_of(&self, token_id: &TokenId) -> Option<Outcome> {
        if token_id == &self.yes_token_id {
            Some(Outcome::Yes)
        } else if token_id == &self.no_token_id {
            Some(Outcome::No)
        } else {
            None
        }
    }

    pub fn token_for(&self, outcome: Outcome) -> &TokenId {
        match outcome {
            Outcome::Yes => &self.yes_token_id,
            Outcome::No => &self.no_token_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> Market {
        Market::new(
            ConditionId::from("0xcond"),
            TokenId::from("yes-token"),
            TokenId::from("no-token"),
        )
    }

    #[test]
    fn test_outcome_of_token() {
        let m = market();
        assert_eq!(m.outcome_of(&TokenId::from("yes-token")), Some(Outcome::Yes));
        assert_eq!(m.outcome_of(&TokenId::from("no-token")), Some(Outcome::No));
        assert_eq!(m.outcome_of(&TokenId::from("other")), None);
    }

    #[test]
    fn test_resolution_winner() {
        assert_eq!(MarketResolution::Unresolved.winner(), None);
        assert_eq!(MarketResolution::ResolvedYes.winner(), Some(Outcome::Yes));
        assert_eq!(MarketResolution::ResolvedNo.winner(), Some(Outcome::No));
    }

    #[test]
    fn test_resolution_display() {
        assert_eq!(MarketResolution::ResolvedYes.to_string(), "RESOLVED_YES");
        assert_eq!(Outcome::No.to_string(), "NO");
    }
}
