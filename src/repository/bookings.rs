//! Booking requests repository for database operations

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use super::BookingStore;
use crate::{
    error::{AppError, AppResult},
    models::{booking::BookingRow, BookingRequest, BookingStatus},
};

#[derive(Clone)]
pub struct PgBookingStore {
    pool: Pool<Postgres>,
}

impl PgBookingStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch_many(&self, sql: &str, status: BookingStatus, today: NaiveDate) -> AppResult<Vec<BookingRequest>> {
        sqlx::query_as::<_, BookingRow>(sql)
            .bind(status.as_str())
            .bind(today)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(BookingRequest::try_from)
            .collect()
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn insert(&self, booking: &BookingRequest) -> AppResult<BookingRequest> {
        let row = sqlx::query_as::<_, BookingRow>(
            r#"
            INSERT INTO booking_requests (
                id, equipment_id, renter_id, owner_id, start_date, end_date,
                total_amount, status, message, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(booking.id)
        .bind(booking.equipment_id)
        .bind(booking.renter_id)
        .bind(booking.owner_id)
        .bind(booking.start_date)
        .bind(booking.end_date)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(&booking.message)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .bind(booking.version)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get(&self, id: Uuid) -> AppResult<BookingRequest> {
        sqlx::query_as::<_, BookingRow>("SELECT * FROM booking_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Booking {} not found", id)))?
            .try_into()
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: BookingStatus,
    ) -> AppResult<BookingRequest> {
        let updated = sqlx::query_as::<_, BookingRow>(
            r#"
            UPDATE booking_requests
            SET status = $1, version = version + 1, updated_at = NOW()
            WHERE id = $2 AND version = $3
            RETURNING *
            "#,
        )
        .bind(status.as_str())
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(row) => row.try_into(),
            None => {
                // Either the row is gone or someone else won the race
                let current = self.get(id).await?;
                Err(AppError::StaleState {
                    entity: "booking",
                    id,
                    expected: expected_version,
                    actual: current.version,
                })
            }
        }
    }

    async fn list_due_for_activation(&self, today: NaiveDate) -> AppResult<Vec<BookingRequest>> {
        self.fetch_many(
            "SELECT * FROM booking_requests WHERE status = $1 AND start_date <= $2 ORDER BY start_date",
            BookingStatus::Approved,
            today,
        )
        .await
    }

    async fn list_due_for_completion(&self, today: NaiveDate) -> AppResult<Vec<BookingRequest>> {
        self.fetch_many(
            "SELECT * FROM booking_requests WHERE status = $1 AND end_date < $2 ORDER BY end_date",
            BookingStatus::Active,
            today,
        )
        .await
    }
}
