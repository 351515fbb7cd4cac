//! Repository layer: store traits and their adapters
//!
//! The engine never owns persistence. Each store trait describes what the
//! engine needs from the external relational store; `bookings`, `payments`,
//! `inspections` and `claims` hold the PostgreSQL adapters and `memory` an
//! in-process adapter used by tests and local runs.

pub mod bookings;
pub mod claims;
pub mod inspections;
pub mod memory;
pub mod payments;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        BookingRequest, BookingStatus, DamageClaim, Inspection, Payment, ReleaseOverride,
    },
};

pub use memory::MemoryStore;

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: &BookingRequest) -> AppResult<BookingRequest>;

    async fn get(&self, id: Uuid) -> AppResult<BookingRequest>;

    /// Compare-and-swap status write. Fails with `StaleState` when the stored
    /// version differs from `expected_version`.
    async fn update_status(
        &self,
        id: Uuid,
        expected_version: i64,
        status: BookingStatus,
    ) -> AppResult<BookingRequest>;

    /// Approved bookings whose start date has been reached
    async fn list_due_for_activation(&self, today: NaiveDate) -> AppResult<Vec<BookingRequest>>;

    /// Active bookings whose end date has passed
    async fn list_due_for_completion(&self, today: NaiveDate) -> AppResult<Vec<BookingRequest>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails with `Conflict` if the booking already has a payment
    async fn insert(&self, payment: &Payment) -> AppResult<Payment>;

    async fn get(&self, id: Uuid) -> AppResult<Payment>;

    async fn find_by_booking(&self, booking_id: Uuid) -> AppResult<Option<Payment>>;

    /// Compare-and-swap write of the mutable fields (statuses, refund fields,
    /// intent id). Amounts are fixed at insert and never rewritten.
    async fn update(&self, payment: &Payment, expected_version: i64) -> AppResult<Payment>;
}

#[async_trait]
pub trait InspectionStore: Send + Sync {
    /// Fails with `DuplicateInspection` if the type already exists for the booking
    async fn insert(&self, inspection: &Inspection) -> AppResult<Inspection>;

    async fn list_for_booking(&self, booking_id: Uuid) -> AppResult<Vec<Inspection>>;

    /// Keeps the first override recorded for a booking
    async fn record_override(&self, release_override: &ReleaseOverride)
        -> AppResult<ReleaseOverride>;

    async fn find_override(&self, booking_id: Uuid) -> AppResult<Option<ReleaseOverride>>;
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn get(&self, id: Uuid) -> AppResult<DamageClaim>;

    async fn list_for_booking(&self, booking_id: Uuid) -> AppResult<Vec<DamageClaim>>;
}

/// Main repository struct holding one handle per store
#[derive(Clone)]
pub struct Repository {
    pub bookings: Arc<dyn BookingStore>,
    pub payments: Arc<dyn PaymentStore>,
    pub inspections: Arc<dyn InspectionStore>,
    pub claims: Arc<dyn ClaimStore>,
}

impl Repository {
    /// Create a repository backed by PostgreSQL
    pub fn postgres(pool: Pool<Postgres>) -> Self {
        Self {
            bookings: Arc::new(bookings::PgBookingStore::new(pool.clone())),
            payments: Arc::new(payments::PgPaymentStore::new(pool.clone())),
            inspections: Arc::new(inspections::PgInspectionStore::new(pool.clone())),
            claims: Arc::new(claims::PgClaimStore::new(pool)),
        }
    }

    /// Create a repository backed by a shared in-memory store
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            bookings: store.clone(),
            payments: store.clone(),
            inspections: store.clone(),
            claims: store,
        }
    }
}
