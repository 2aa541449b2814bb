//! Abstract claim backend.
//!
//! A real backend performs chain redemption; the dry-run backend returns
//! a synthetic receipt with no external side effect.

use crate::error::SettlementResult;
use crate::oracle::BoxFuture;
use mercury_core::{ConditionId, Outcome};
use tracing::info;

/// Receipt for one redemption.
#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub tx_hash: Option<String>,
    pub gas_used: Option<u64>,
    pub dry_run: bool,
}

impl TxReceipt {
    pub fn synthetic() -> Self {
        Self {
            tx_hash: None,
            gas_used: None,
            dry_run: true,
        }
    }
}

/// The claim seam.
pub trait ClaimBackend: Send + Sync {
    fn redeem(
        &self,
        condition_id: &ConditionId,
        side: Outcome,
    ) -> BoxFuture<'_, SettlementResult<TxReceipt>>;
}

/// Dry-run claimer: always succeeds, touches nothing.
#[derive(Debug, Default)]
pub struct DryRunClaimer;

impl ClaimBackend for DryRunClaimer {
    fn redeem(
        &self,
        condition_id: &ConditionId,
        side: Outcome,
    ) -> BoxFuture<'_, SettlementResult<TxReceipt>> {
        let condition_id = condition_id.clone();
        Box::pin(async move {
            info!(%condition_id, %side, "dry-run redeem");
            Ok(TxReceipt::synthetic())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_receipt() {
        let claimer = DryRunClaimer;
        let receipt = claimer
            .redeem(&ConditionId::from("0xcond"), Outcome::Yes)
            .await
            .unwrap();
        assert!(receipt.dry_run);
        assert!(receipt.tx_hash.is_none());
    }
}
