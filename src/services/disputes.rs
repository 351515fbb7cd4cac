//! Reaction of the ledger to damage claims

use uuid::Uuid;

use super::escrow::EscrowLedger;
use crate::{
    error::AppResult,
    models::{ClaimReaction, ClaimStatus, EscrowStatus},
    repository::Repository,
};

#[derive(Clone)]
pub struct DisputeCoordinator {
    repository: Repository,
    ledger: EscrowLedger,
}

impl DisputeCoordinator {
    pub fn new(repository: Repository, ledger: EscrowLedger) -> Self {
        Self { repository, ledger }
    }

    /// Apply the current state of a claim to its booking's escrow
    pub async fn on_claim(&self, claim_id: Uuid) -> AppResult<ClaimReaction> {
        let claim = self.repository.claims.get(claim_id).await?;
        let Some(payment) = self.ledger.get_for_booking(claim.booking_id).await? else {
            tracing::debug!(claim_id = %claim_id, booking_id = %claim.booking_id, "Claim on unpaid booking");
            return Ok(ClaimReaction::NoPayment);
        };

        let reaction = match claim.status {
            ClaimStatus::Pending => ClaimReaction::NoAction,
            ClaimStatus::Resolved => ClaimReaction::ReadyForResolution,
            status if status.freezes_escrow() => match payment.escrow_status {
                EscrowStatus::Held => {
                    self.ledger.mark_disputed(payment.id).await?;
                    ClaimReaction::EscrowFrozen
                }
                EscrowStatus::Disputed => ClaimReaction::EscrowFrozen,
                settled => {
                    tracing::warn!(
                        claim_id = %claim_id,
                        payment_id = %payment.id,
                        escrow = %settled,
                        "Claim filed after escrow settled, nothing to freeze"
                    );
                    ClaimReaction::NoAction
                }
            },
            _ => ClaimReaction::NoAction,
        };

        tracing::info!(
            claim_id = %claim_id,
            claim_status = %claim.status,
            reaction = ?reaction,
            "Damage claim processed"
        );
        Ok(reaction)
    }
}
