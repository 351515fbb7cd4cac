//! Damage claims repository (read-only)

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use super::ClaimStore;
use crate::{
    error::{AppError, AppResult},
    models::{claim::DamageClaimRow, DamageClaim},
};

#[derive(Clone)]
pub struct PgClaimStore {
    pool: Pool<Postgres>,
}

impl PgClaimStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClaimStore for PgClaimStore {
    async fn get(&self, id: Uuid) -> AppResult<DamageClaim> {
        sqlx::query_as::<_, DamageClaimRow>("SELECT * FROM damage_claims WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Damage claim {} not found", id)))?
            .try_into()
    }

    async fn list_for_booking(&self, booking_id: Uuid) -> AppResult<Vec<DamageClaim>> {
        sqlx::query_as::<_, DamageClaimRow>(
            "SELECT * FROM damage_claims WHERE booking_id = $1 ORDER BY created_at",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(DamageClaim::try_from)
        .collect()
    }
}
