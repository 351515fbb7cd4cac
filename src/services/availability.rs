//! Equipment availability collaborator

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::DateRange,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvailabilityProvider: Send + Sync {
    /// True when no other approved or active booking overlaps `range`.
    /// `exclude_booking` is left out of the overlap check.
    async fn check_availability(
        &self,
        equipment_id: Uuid,
        range: DateRange,
        exclude_booking: Option<Uuid>,
    ) -> AppResult<bool>;

    async fn equipment_owner(&self, equipment_id: Uuid) -> AppResult<Uuid>;
}

/// Availability computed from the booking table
#[derive(Clone)]
pub struct PgAvailability {
    pool: Pool<Postgres>,
}

impl PgAvailability {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AvailabilityProvider for PgAvailability {
    async fn check_availability(
        &self,
        equipment_id: Uuid,
        range: DateRange,
        exclude_booking: Option<Uuid>,
    ) -> AppResult<bool> {
        let conflicts: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM booking_requests
            WHERE equipment_id = $1
              AND status IN ('approved', 'active')
              AND start_date <= $3
              AND end_date >= $2
              AND ($4::uuid IS NULL OR id <> $4)
            "#,
        )
        .bind(equipment_id)
        .bind(range.start)
        .bind(range.end)
        .bind(exclude_booking)
        .fetch_one(&self.pool)
        .await?;

        Ok(conflicts == 0)
    }

    async fn equipment_owner(&self, equipment_id: Uuid) -> AppResult<Uuid> {
        sqlx::query_scalar::<_, Uuid>("SELECT owner_id FROM equipment WHERE id = $1")
            .bind(equipment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Equipment {} not found", equipment_id)))
    }
}
