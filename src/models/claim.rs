//! Damage claim model (read-only for the engine)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::enums::ClaimStatus;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DamageClaim {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub filed_by: Uuid,
    pub damage_description: String,
    #[schema(value_type = String)]
    pub estimated_cost: Decimal,
    pub evidence_photos: Vec<String>,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DamageClaimRow {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub filed_by: Uuid,
    pub damage_description: String,
    pub estimated_cost: Decimal,
    pub evidence_photos: Vec<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DamageClaimRow> for DamageClaim {
    type Error = AppError;

    fn try_from(row: DamageClaimRow) -> Result<Self, Self::Error> {
        Ok(DamageClaim {
            status: row.status.parse()?,
            id: row.id,
            booking_id: row.booking_id,
            filed_by: row.filed_by,
            damage_description: row.damage_description,
            estimated_cost: row.estimated_cost,
            evidence_photos: row.evidence_photos,
            created_at: row.created_at,
        })
    }
}

/// What the engine did in response to a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClaimReaction {
    /// Claim is pending, nothing to do yet
    NoAction,
    /// Escrow was frozen (or already was)
    EscrowFrozen,
    /// Claim resolved; an admin may now release or refund
    ReadyForResolution,
    /// Booking has no payment to act on
    NoPayment,
}
