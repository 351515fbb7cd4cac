//! Inspections repository for database operations

use async_trait::async_trait;
use sqlx::{types::Json, Pool, Postgres};
use uuid::Uuid;

use super::InspectionStore;
use crate::{
    error::{AppError, AppResult},
    models::{inspection::InspectionRow, Inspection, ReleaseOverride},
};

#[derive(Clone)]
pub struct PgInspectionStore {
    pool: Pool<Postgres>,
}

impl PgInspectionStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InspectionStore for PgInspectionStore {
    async fn insert(&self, inspection: &Inspection) -> AppResult<Inspection> {
        let result = sqlx::query_as::<_, InspectionRow>(
            r#"
            INSERT INTO inspections (
                id, booking_id, inspection_type, recorded_by, photos, checklist_items, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(inspection.id)
        .bind(inspection.booking_id)
        .bind(inspection.inspection_type.as_str())
        .bind(inspection.recorded_by)
        .bind(&inspection.photos)
        .bind(Json(&inspection.checklist_items))
        .bind(inspection.created_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.try_into(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AppError::DuplicateInspection {
                    booking_id: inspection.booking_id,
                    inspection_type: inspection.inspection_type.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_for_booking(&self, booking_id: Uuid) -> AppResult<Vec<Inspection>> {
        sqlx::query_as::<_, InspectionRow>(
            "SELECT * FROM inspections WHERE booking_id = $1 ORDER BY created_at",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Inspection::try_from)
        .collect()
    }

    async fn record_override(
        &self,
        release_override: &ReleaseOverride,
    ) -> AppResult<ReleaseOverride> {
        sqlx::query(
            r#"
            INSERT INTO release_overrides (booking_id, granted_by, granted_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (booking_id) DO NOTHING
            "#,
        )
        .bind(release_override.booking_id)
        .bind(release_override.granted_by)
        .bind(release_override.granted_at)
        .execute(&self.pool)
        .await?;

        self.find_override(release_override.booking_id)
            .await?
            .ok_or_else(|| AppError::Internal("release override vanished after insert".to_string()))
    }

    async fn find_override(&self, booking_id: Uuid) -> AppResult<Option<ReleaseOverride>> {
        let row = sqlx::query_as::<_, ReleaseOverride>(
            "SELECT booking_id, granted_by, granted_at FROM release_overrides WHERE booking_id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
