//! Pickup/return inspection records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::enums::InspectionType;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChecklistItem {
    pub label: String,
    pub ok: bool,
    pub note: Option<String>,
}

/// Condition report; immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Inspection {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub inspection_type: InspectionType,
    pub recorded_by: Uuid,
    /// Photo URLs in capture order
    pub photos: Vec<String>,
    pub checklist_items: Vec<ChecklistItem>,
    pub created_at: DateTime<Utc>,
}

impl Inspection {
    pub fn failed_items(&self) -> impl Iterator<Item = &ChecklistItem> {
        self.checklist_items.iter().filter(|item| !item.ok)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct InspectionRow {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub inspection_type: String,
    pub recorded_by: Uuid,
    pub photos: Vec<String>,
    pub checklist_items: Json<Vec<ChecklistItem>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<InspectionRow> for Inspection {
    type Error = AppError;

    fn try_from(row: InspectionRow) -> Result<Self, Self::Error> {
        Ok(Inspection {
            inspection_type: row.inspection_type.parse()?,
            id: row.id,
            booking_id: row.booking_id,
            recorded_by: row.recorded_by,
            photos: row.photos,
            checklist_items: row.checklist_items.0,
            created_at: row.created_at,
        })
    }
}

/// Inspection payload submitted by a party
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct InspectionPayload {
    pub inspection_type: InspectionType,
    #[validate(length(max = 50))]
    pub photos: Vec<String>,
    #[validate(length(max = 200))]
    pub checklist_items: Vec<ChecklistItem>,
}

/// Owner decision allowing release before the end date has passed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, FromRow)]
pub struct ReleaseOverride {
    pub booking_id: Uuid,
    pub granted_by: Uuid,
    pub granted_at: DateTime<Utc>,
}
