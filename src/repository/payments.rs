//! Payments repository for database operations

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use super::PaymentStore;
use crate::{
    error::{AppError, AppResult},
    models::{payment::PaymentRow, Payment},
};

#[derive(Clone)]
pub struct PgPaymentStore {
    pool: Pool<Postgres>,
}

impl PgPaymentStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert(&self, payment: &Payment) -> AppResult<Payment> {
        let amounts = &payment.amounts;
        let result = sqlx::query_as::<_, PaymentRow>(
            r#"
            INSERT INTO payments (
                id, booking_request_id, renter_id, owner_id,
                subtotal, service_fee, tax, insurance_amount, deposit_amount,
                total_amount, escrow_amount, owner_payout_amount,
                payment_status, escrow_status, refund_amount, refund_reason,
                stripe_payment_intent_id, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING *
            "#,
        )
        .bind(payment.id)
        .bind(payment.booking_request_id)
        .bind(payment.renter_id)
        .bind(payment.owner_id)
        .bind(amounts.subtotal)
        .bind(amounts.service_fee)
        .bind(amounts.tax)
        .bind(amounts.insurance_amount)
        .bind(amounts.deposit_amount)
        .bind(amounts.total_amount)
        .bind(amounts.escrow_amount)
        .bind(amounts.owner_payout_amount)
        .bind(payment.payment_status.as_str())
        .bind(payment.escrow_status.as_str())
        .bind(payment.refund_amount)
        .bind(&payment.refund_reason)
        .bind(&payment.stripe_payment_intent_id)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.version)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.try_into(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(AppError::Conflict(
                format!("Booking {} already has a payment", payment.booking_request_id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> AppResult<Payment> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", id)))?
            .try_into()
    }

    async fn find_by_booking(&self, booking_id: Uuid) -> AppResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE booking_request_id = $1")
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Payment::try_from)
            .transpose()
    }

    async fn update(&self, payment: &Payment, expected_version: i64) -> AppResult<Payment> {
        let updated = sqlx::query_as::<_, PaymentRow>(
            r#"
            UPDATE payments
            SET payment_status = $1, escrow_status = $2, refund_amount = $3,
                refund_reason = $4, stripe_payment_intent_id = $5,
                version = version + 1, updated_at = NOW()
            WHERE id = $6 AND version = $7
            RETURNING *
            "#,
        )
        .bind(payment.payment_status.as_str())
        .bind(payment.escrow_status.as_str())
        .bind(payment.refund_amount)
        .bind(&payment.refund_reason)
        .bind(&payment.stripe_payment_intent_id)
        .bind(payment.id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(row) => row.try_into(),
            None => {
                let current = self.get(payment.id).await?;
                Err(AppError::StaleState {
                    entity: "payment",
                    id: payment.id,
                    expected: expected_version,
                    actual: current.version,
                })
            }
        }
    }
}
