//! Inspection gate
//!
//! Records pickup and return inspections and decides whether escrow may be
//! released for a booking.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::{change_feed::ChangeFeedMultiplexer, clock::Clock};
use crate::{
    error::{AppError, AppResult},
    models::{
        Actor, ActorRole, BookingRequest, BookingStatus, BookingUpdate, Inspection,
        InspectionPayload, InspectionType, ReleaseOverride,
    },
    repository::Repository,
};

/// Breakdown of the release decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReleaseEligibility {
    pub booking_id: Uuid,
    pub status_allows_release: bool,
    pub pickup_recorded: bool,
    pub return_recorded: bool,
    pub rental_ended: bool,
    pub override_granted: bool,
    pub eligible: bool,
}

#[derive(Clone)]
pub struct InspectionGate {
    repository: Repository,
    clock: Arc<dyn Clock>,
    feed: ChangeFeedMultiplexer,
}

impl InspectionGate {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>, feed: ChangeFeedMultiplexer) -> Self {
        Self {
            repository,
            clock,
            feed,
        }
    }

    pub async fn can_release(&self, booking_id: Uuid) -> AppResult<bool> {
        Ok(self.release_eligibility(booking_id).await?.eligible)
    }

    pub async fn release_eligibility(&self, booking_id: Uuid) -> AppResult<ReleaseEligibility> {
        let booking = self.repository.bookings.get(booking_id).await?;
        let inspections = self.repository.inspections.list_for_booking(booking_id).await?;
        let has = |t: InspectionType| inspections.iter().any(|i| i.inspection_type == t);

        let status_allows_release =
            matches!(booking.status, BookingStatus::Active | BookingStatus::Completed);
        let pickup_recorded = has(InspectionType::Pickup);
        let return_recorded = has(InspectionType::Return);
        let rental_ended = booking.has_ended(self.clock.today());
        let override_granted = self
            .repository
            .inspections
            .find_override(booking_id)
            .await?
            .is_some();

        Ok(ReleaseEligibility {
            booking_id,
            status_allows_release,
            pickup_recorded,
            return_recorded,
            rental_ended,
            override_granted,
            eligible: status_allows_release
                && pickup_recorded
                && return_recorded
                && (rental_ended || override_granted),
        })
    }

    pub async fn record_inspection(
        &self,
        booking_id: Uuid,
        actor: Actor,
        payload: InspectionPayload,
    ) -> AppResult<Inspection> {
        payload
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let booking = self.repository.bookings.get(booking_id).await?;
        require_party_or_admin(&booking, actor)?;

        if !matches!(booking.status, BookingStatus::Approved | BookingStatus::Active) {
            return Err(AppError::NotEligible(format!(
                "inspections cannot be recorded for a {} booking",
                booking.status
            )));
        }

        let existing = self.repository.inspections.list_for_booking(booking_id).await?;
        let kind = payload.inspection_type;
        if existing.iter().any(|i| i.inspection_type == kind) {
            return Err(AppError::DuplicateInspection {
                booking_id,
                inspection_type: kind.to_string(),
            });
        }
        if kind == InspectionType::Return
            && !existing
                .iter()
                .any(|i| i.inspection_type == InspectionType::Pickup)
        {
            return Err(AppError::OutOfOrder(
                "return inspection requires a pickup inspection".to_string(),
            ));
        }

        let inspection = Inspection {
            id: Uuid::new_v4(),
            booking_id,
            inspection_type: kind,
            recorded_by: actor.user_id,
            photos: payload.photos,
            checklist_items: payload.checklist_items,
            created_at: Utc::now(),
        };
        let inspection = self.repository.inspections.insert(&inspection).await?;

        let failed = inspection.failed_items().count();
        tracing::info!(
            booking_id = %booking_id,
            inspection_type = %kind,
            recorded_by = %actor.user_id,
            photos = inspection.photos.len(),
            failed_items = failed,
            "Inspection recorded"
        );
        self.feed.publish(BookingUpdate::inspection(&inspection));
        Ok(inspection)
    }

    /// Owner allows release before the end date has passed
    pub async fn grant_release_override(
        &self,
        booking_id: Uuid,
        actor: Actor,
    ) -> AppResult<ReleaseOverride> {
        let booking = self.repository.bookings.get(booking_id).await?;
        if actor.role != ActorRole::Owner || actor.user_id != booking.owner_id {
            return Err(AppError::Unauthorized(
                "Only the booking's owner can allow early release".to_string(),
            ));
        }

        let release_override = self
            .repository
            .inspections
            .record_override(&ReleaseOverride {
                booking_id,
                granted_by: actor.user_id,
                granted_at: Utc::now(),
            })
            .await?;
        tracing::info!(booking_id = %booking_id, "Early release allowed by owner");
        Ok(release_override)
    }

    pub async fn list(&self, booking_id: Uuid) -> AppResult<Vec<Inspection>> {
        let mut inspections = self.repository.inspections.list_for_booking(booking_id).await?;
        inspections.sort_by_key(|i| i.created_at);
        Ok(inspections)
    }
}

fn require_party_or_admin(booking: &BookingRequest, actor: Actor) -> AppResult<()> {
    let allowed = match actor.role {
        ActorRole::Admin => true,
        ActorRole::Renter | ActorRole::Owner => booking.party_role(actor.user_id) == Some(actor.role),
        ActorRole::System => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "User {} is not a party to booking {}",
            actor.user_id, booking.id
        )))
    }
}
