//! Per-token subscription registry.
//!
//! Tracks the lifecycle of each outcome-token subscription:
//! PENDING (registered, not yet confirmed by data), ACTIVE (first message
//! seen), ERRORED. On disconnect every ACTIVE subscription re-enters
//! PENDING so the next OPEN replays it.

use mercury_core::TokenId;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info};

/// Subscription lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    Active,
    Errored,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Errored => write!(f, "ERRORED"),
        }
    }
}

/// Registry of token subscriptions.
#[derive(Default)]
pub struct SubscriptionManager {
    tokens: RwLock<HashMap<TokenId, SubscriptionState>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token as PENDING. Re-registering an existing token is a
    /// no-op and keeps its current state.
    pub fn register(&self, token_id: TokenId) {
        let mut tokens = self.tokens.write();
        tokens.entry(token_id).or_insert(SubscriptionState::Pending);
    }

    pub fn state(&self, token_id: &TokenId) -> Option<SubscriptionState> {
        self.tokens.read().get(token_id).copied()
    }

    /// First message for a token promotes it PENDING -> ACTIVE.
    /// Returns true on the transition.
    pub fn mark_active(&self, token_id: &TokenId) -> bool {
        let mut tokens = self.tokens.write();
        match tokens.get_mut(token_id) {
            Some(state) if *state != SubscriptionState::Active => {
                *state = SubscriptionState::Active;
                debug!(%token_id, "subscription active");
                true
            }
            _ => false,
        }
    }

    pub fn mark_errored(&self, token_id: &TokenId) {
        if let Some(state) = self.tokens.write().get_mut(token_id) {
            *state = SubscriptionState::Errored;
        }
    }

    /// Demote every ACTIVE subscription to PENDING; called on disconnect
    /// so the next OPEN resends them.
    pub fn demote_all(&self) {
        let mut tokens = self.tokens.write();
        let mut demoted = 0usize;
        for state in tokens.values_mut() {
            if *state == SubscriptionState::Active {
                *state = SubscriptionState::Pending;
                demoted += 1;
            }
        }
        if demoted > 0 {
            info!(demoted, "subscriptions demoted to pending");
        }
    }

    /// Tokens awaiting a subscribe frame.
    pub fn pending_tokens(&self) -> Vec<TokenId> {
        let mut pending: Vec<TokenId> = self
            .tokens
            .read()
            .iter()
            .filter(|(_, s)| **s == SubscriptionState::Pending)
            .map(|(t, _)| t.clone())
            .collect();
        pending.sort();
        pending
    }

    pub fn active_count(&self) -> usize {
        self.tokens
            .read()
            .values()
            .filter(|s| **s == SubscriptionState::Active)
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.tokens.read().len()
    }

    /// Wire frame subscribing a batch of tokens to the market channel.
    pub fn subscribe_frame(tokens: &[TokenId]) -> String {
        json!({
            "type": "market",
            "assets_ids": tokens.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        })
        .to_string()
    }

    /// Wire frame unsubscribing a batch of tokens.
    pub fn unsubscribe_frame(tokens: &[TokenId]) -> String {
        json!({
            "type": "unsubscribe",
            "channel": "market",
            "assets_ids": tokens.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        })
        .to_string()
    }
}
