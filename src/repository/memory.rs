//! In-process store used by tests and local runs
//!
//! Applies the same compare-and-swap and uniqueness rules as the PostgreSQL
//! adapters so the engine behaves identically against either.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BookingStore, ClaimStore, InspectionStore, PaymentStore};
use crate::{
    error::{AppError, AppResult},
    models::{
        BookingRequest, BookingStatus, DamageClaim, Inspection, Payment, ReleaseOverride,
    },
};

#[derive(Default)]
struct Tables {
    bookings: HashMap<Uuid, BookingRequest>,
    payments: HashMap<Uuid, Payment>,
    inspections: Vec<Inspection>,
    overrides: HashMap<Uuid, ReleaseOverride>,
    claims: HashMap<Uuid, DamageClaim>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims are filed outside the engine; this stands in for that flow
    pub async fn put_claim(&self, claim: DamageClaim) {
        self.tables.write().await.claims.insert(claim.id, claim);
    }

    /// Overwrite a payment without any checks, simulating an out-of-band write
    pub async fn overwrite_payment(&self, payment: Payment) {
        self.tables.write().await.payments.insert(payment.id, payment);
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn insert(&self, booking: &BookingRequest) -> AppResult<BookingRequest> {
        let mut tables = self.tables.write().await;
        if tables.bookings.contains_key(&booking.id) {
            return Err(AppError::Conflict(format!("Booking {} already exists", booking.id)));
        }
        tables.bookings.insert(booking.id, booking.clone());
        Ok(booking.clone())
    }

    async fn get(&self, id: Uuid) -> AppResult<BookingRequest> {
        self.tables
            .read()
            .await
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Booking {} not found", id)))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: BookingStatus,
    ) -> AppResult<BookingRequest> {
        let mut tables = self.tables.write().await;
        let booking = tables
            .bookings
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Booking {} not found", id)))?;

        if booking.version != expected_version {
            return Err(AppError::StaleState {
                entity: "booking",
                id,
                expected: expected_version,
                actual: booking.version,
            });
        }

        booking.status = status;
        booking.version += 1;
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    async fn list_due_for_activation(&self, today: NaiveDate) -> AppResult<Vec<BookingRequest>> {
        let tables = self.tables.read().await;
        let mut due: Vec<_> = tables
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Approved && b.start_date <= today)
            .cloned()
            .collect();
        due.sort_by_key(|b| b.start_date);
        Ok(due)
    }

    async fn list_due_for_completion(&self, today: NaiveDate) -> AppResult<Vec<BookingRequest>> {
        let tables = self.tables.read().await;
        let mut due: Vec<_> = tables
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Active && b.end_date < today)
            .cloned()
            .collect();
        due.sort_by_key(|b| b.end_date);
        Ok(due)
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert(&self, payment: &Payment) -> AppResult<Payment> {
        let mut tables = self.tables.write().await;
        if tables
            .payments
            .values()
            .any(|p| p.booking_request_id == payment.booking_request_id)
        {
            return Err(AppError::Conflict(format!(
                "Booking {} already has a payment",
                payment.booking_request_id
            )));
        }
        tables.payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }

    async fn get(&self, id: Uuid) -> AppResult<Payment> {
        let payment = self
            .tables
            .read()
            .await
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", id)))?;
        payment.check_invariants()?;
        Ok(payment)
    }

    async fn find_by_booking(&self, booking_id: Uuid) -> AppResult<Option<Payment>> {
        let payment = self
            .tables
            .read()
            .await
            .payments
            .values()
            .find(|p| p.booking_request_id == booking_id)
            .cloned();
        if let Some(ref p) = payment {
            p.check_invariants()?;
        }
        Ok(payment)
    }

    async fn update(&self, payment: &Payment, expected_version: i64) -> AppResult<Payment> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", payment.id)))?;

        if stored.version != expected_version {
            return Err(AppError::StaleState {
                entity: "payment",
                id: payment.id,
                expected: expected_version,
                actual: stored.version,
            });
        }

        // Amounts are fixed at insert, only the mutable fields are copied
        let mut next = stored.clone();
        next.payment_status = payment.payment_status;
        next.escrow_status = payment.escrow_status;
        next.refund_amount = payment.refund_amount;
        next.refund_reason = payment.refund_reason.clone();
        next.stripe_payment_intent_id = payment.stripe_payment_intent_id.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        next.check_invariants()?;

        *stored = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl InspectionStore for MemoryStore {
    async fn insert(&self, inspection: &Inspection) -> AppResult<Inspection> {
        let mut tables = self.tables.write().await;
        if tables.inspections.iter().any(|i| {
            i.booking_id == inspection.booking_id && i.inspection_type == inspection.inspection_type
        }) {
            return Err(AppError::DuplicateInspection {
                booking_id: inspection.booking_id,
                inspection_type: inspection.inspection_type.to_string(),
            });
        }
        tables.inspections.push(inspection.clone());
        Ok(inspection.clone())
    }

    async fn list_for_booking(&self, booking_id: Uuid) -> AppResult<Vec<Inspection>> {
        Ok(self
            .tables
            .read()
            .await
            .inspections
            .iter()
            .filter(|i| i.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn record_override(
        &self,
        release_override: &ReleaseOverride,
    ) -> AppResult<ReleaseOverride> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .overrides
            .entry(release_override.booking_id)
            .or_insert_with(|| release_override.clone())
            .clone())
    }

    async fn find_override(&self, booking_id: Uuid) -> AppResult<Option<ReleaseOverride>> {
        Ok(self.tables.read().await.overrides.get(&booking_id).cloned())
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn get(&self, id: Uuid) -> AppResult<DamageClaim> {
        self.tables
            .read()
            .await
            .claims
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Damage claim {} not found", id)))
    }

    async fn list_for_booking(&self, booking_id: Uuid) -> AppResult<Vec<DamageClaim>> {
        let mut claims: Vec<_> = self
            .tables
            .read()
            .await
            .claims
            .values()
            .filter(|c| c.booking_id == booking_id)
            .cloned()
            .collect();
        claims.sort_by_key(|c| c.created_at);
        Ok(claims)
    }
}
