//! Booking request model and related types

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::enums::{ActorRole, BookingStatus};
use crate::error::AppError;

/// Inclusive range of calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AppError> {
        if start > end {
            return Err(AppError::Validation(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Booking request as seen by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BookingRequest {
    pub id: Uuid,
    pub equipment_id: Uuid,
    pub renter_id: Uuid,
    pub owner_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub message: Option<String>,
    pub renter_reviewed_at: Option<DateTime<Utc>>,
    pub owner_reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, incremented on every write
    pub version: i64,
}

impl BookingRequest {
    pub fn date_range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    pub fn has_started(&self, today: NaiveDate) -> bool {
        today >= self.start_date
    }

    pub fn has_ended(&self, today: NaiveDate) -> bool {
        today > self.end_date
    }

    /// Whole days between `today` and the start date (negative once started)
    pub fn days_until_start(&self, today: NaiveDate) -> i64 {
        (self.start_date - today).num_days()
    }

    /// Role the user holds on this booking, if any
    pub fn party_role(&self, user_id: Uuid) -> Option<ActorRole> {
        if user_id == self.owner_id {
            Some(ActorRole::Owner)
        } else if user_id == self.renter_id {
            Some(ActorRole::Renter)
        } else {
            None
        }
    }

    /// The other party of the booking
    pub fn counterparty(&self, user_id: Uuid) -> Uuid {
        if user_id == self.owner_id {
            self.renter_id
        } else {
            self.owner_id
        }
    }
}

/// Booking row as stored, status kept as text until validated
#[derive(Debug, Clone, FromRow)]
pub struct BookingRow {
    pub id: Uuid,
    pub equipment_id: Uuid,
    pub renter_id: Uuid,
    pub owner_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_amount: Decimal,
    pub status: String,
    pub message: Option<String>,
    pub renter_reviewed_at: Option<DateTime<Utc>>,
    pub owner_reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl TryFrom<BookingRow> for BookingRequest {
    type Error = AppError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(BookingRequest {
            status: row.status.parse()?,
            id: row.id,
            equipment_id: row.equipment_id,
            renter_id: row.renter_id,
            owner_id: row.owner_id,
            start_date: row.start_date,
            end_date: row.end_date,
            total_amount: row.total_amount,
            message: row.message,
            renter_reviewed_at: row.renter_reviewed_at,
            owner_reviewed_at: row.owner_reviewed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

/// Create booking request (renter action)
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBooking {
    pub equipment_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    #[validate(length(max = 2000))]
    pub message: Option<String>,
}

/// Status change requested by an actor
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TransitionRequest {
    pub target: BookingStatus,
    /// Version of the booking the caller last observed
    pub expected_version: i64,
}

/// Cancellation requested by an actor
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CancelBooking {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    pub expected_version: i64,
}
