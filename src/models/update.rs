//! Change-feed events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    booking::BookingRequest,
    enums::{BookingStatus, EscrowStatus, InspectionType, PaymentStatus},
    inspection::Inspection,
    payment::Payment,
};
use crate::error::{AppError, AppResult};

/// Logical source of an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Booking,
    Payment,
    Inspection,
}

impl UpdateKind {
    pub fn table(&self) -> &'static str {
        match self {
            UpdateKind::Booking => "booking_requests",
            UpdateKind::Payment => "payments",
            UpdateKind::Inspection => "inspections",
        }
    }

    pub fn from_table(table: &str) -> AppResult<Self> {
        match table {
            "booking_requests" => Ok(UpdateKind::Booking),
            "payments" => Ok(UpdateKind::Payment),
            "inspections" => Ok(UpdateKind::Inspection),
            other => Err(AppError::DataCorruption(format!(
                "change event for unknown table '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert,
    Update,
    Delete,
}

impl std::str::FromStr for ChangeEvent {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(ChangeEvent::Insert),
            "update" => Ok(ChangeEvent::Update),
            "delete" => Ok(ChangeEvent::Delete),
            other => Err(AppError::DataCorruption(format!(
                "unknown change event '{}'",
                other
            ))),
        }
    }
}

/// Row-level change as delivered by the external store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub event: String,
    pub table: String,
    pub row: Value,
}

/// Typed update delivered to change-feed subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BookingUpdate {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub event: ChangeEvent,
    pub booking_id: Uuid,
    pub record_id: Uuid,
    pub version: i64,
    pub occurred_at: DateTime<Utc>,
    #[schema(value_type = Option<Object>)]
    pub record: Option<Value>,
}

impl BookingUpdate {
    pub fn booking(booking: &BookingRequest, event: ChangeEvent) -> Self {
        Self {
            kind: UpdateKind::Booking,
            event,
            booking_id: booking.id,
            record_id: booking.id,
            version: booking.version,
            occurred_at: Utc::now(),
            record: serde_json::to_value(booking).ok(),
        }
    }

    pub fn payment(payment: &Payment, event: ChangeEvent) -> Self {
        Self {
            kind: UpdateKind::Payment,
            event,
            booking_id: payment.booking_request_id,
            record_id: payment.id,
            version: payment.version,
            occurred_at: Utc::now(),
            record: serde_json::to_value(payment).ok(),
        }
    }

    pub fn inspection(inspection: &Inspection) -> Self {
        Self {
            kind: UpdateKind::Inspection,
            event: ChangeEvent::Insert,
            booking_id: inspection.booking_id,
            record_id: inspection.id,
            version: 1,
            occurred_at: Utc::now(),
            record: serde_json::to_value(inspection).ok(),
        }
    }

    /// Convert an external change into a typed update. Unknown tables, events
    /// or status values are reported as corruption, never guessed.
    pub fn from_raw(raw: RawChange) -> AppResult<Self> {
        let kind = UpdateKind::from_table(&raw.table)?;
        let event: ChangeEvent = raw.event.parse()?;
        let row = &raw.row;

        let record_id = uuid_field(row, "id")?;
        let (booking_id, version) = match kind {
            UpdateKind::Booking => {
                text_field(row, "status")?.parse::<BookingStatus>()?;
                (record_id, version_field(row)?)
            }
            UpdateKind::Payment => {
                text_field(row, "payment_status")?.parse::<PaymentStatus>()?;
                text_field(row, "escrow_status")?.parse::<EscrowStatus>()?;
                (uuid_field(row, "booking_request_id")?, version_field(row)?)
            }
            UpdateKind::Inspection => {
                text_field(row, "inspection_type")?.parse::<InspectionType>()?;
                (uuid_field(row, "booking_id")?, 1)
            }
        };

        Ok(Self {
            kind,
            event,
            booking_id,
            record_id,
            version,
            occurred_at: Utc::now(),
            record: Some(raw.row),
        })
    }
}

fn text_field<'a>(row: &'a Value, name: &str) -> AppResult<&'a str> {
    row.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::DataCorruption(format!("change row is missing '{}'", name)))
}

fn uuid_field(row: &Value, name: &str) -> AppResult<Uuid> {
    text_field(row, name)?
        .parse()
        .map_err(|_| AppError::DataCorruption(format!("change row has invalid '{}'", name)))
}

fn version_field(row: &Value) -> AppResult<i64> {
    row.get("version")
        .and_then(Value::as_i64)
        .ok_or_else(|| AppError::DataCorruption("change row is missing 'version'".to_string()))
}
