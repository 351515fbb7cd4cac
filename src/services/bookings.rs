//! Booking state machine
//!
//! Legal moves live in a single table of edges. Each edge names the roles
//! allowed to take it; preconditions that depend on dates, payment or
//! inspections are checked separately against current facts.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;
use validator::Validate;

use super::{
    availability::AvailabilityProvider,
    change_feed::ChangeFeedMultiplexer,
    clock::Clock,
    notifications::{notify_all, Notifier},
};
use crate::{
    config::BookingPolicyConfig,
    error::{AppError, AppResult},
    models::{
        Actor, ActorRole, BookingRequest, BookingStatus, BookingUpdate, ChangeEvent,
        CreateBooking, DateRange, InspectionType, NotificationType, PaymentStatus,
        RelatedEntity,
    },
    repository::Repository,
};

use BookingStatus::*;

struct Edge {
    from: &'static [BookingStatus],
    to: BookingStatus,
    roles: &'static [ActorRole],
}

const TRANSITIONS: &[Edge] = &[
    Edge { from: &[Pending], to: Approved, roles: &[ActorRole::Owner] },
    Edge { from: &[Pending], to: Declined, roles: &[ActorRole::Owner] },
    Edge { from: &[Pending, Approved], to: Cancelled, roles: &[ActorRole::Renter, ActorRole::Owner] },
    Edge { from: &[Approved], to: Active, roles: &[ActorRole::System] },
    Edge { from: &[Active], to: Completed, roles: &[ActorRole::System] },
    Edge { from: &[Pending, Approved, Active], to: Cancelled, roles: &[ActorRole::Admin] },
];

/// Result of looking an edge up in the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeCheck {
    Allowed,
    NoSuchEdge,
    RoleNotPermitted,
}

pub fn check_edge(from: BookingStatus, to: BookingStatus, role: ActorRole) -> EdgeCheck {
    let mut edge_exists = false;
    for edge in TRANSITIONS.iter().filter(|e| e.to == to && e.from.contains(&from)) {
        edge_exists = true;
        if edge.roles.contains(&role) {
            return EdgeCheck::Allowed;
        }
    }
    if edge_exists {
        EdgeCheck::RoleNotPermitted
    } else {
        EdgeCheck::NoSuchEdge
    }
}

/// Targets reachable from `from` by any role
pub fn targets_from(from: BookingStatus) -> Vec<BookingStatus> {
    let mut targets = Vec::new();
    for edge in TRANSITIONS.iter().filter(|e| e.from.contains(&from)) {
        if !targets.contains(&edge.to) {
            targets.push(edge.to);
        }
    }
    targets
}

#[derive(Clone)]
pub struct BookingStateMachine {
    repository: Repository,
    availability: Arc<dyn AvailabilityProvider>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    feed: ChangeFeedMultiplexer,
    policy: BookingPolicyConfig,
}

impl BookingStateMachine {
    pub fn new(
        repository: Repository,
        availability: Arc<dyn AvailabilityProvider>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        feed: ChangeFeedMultiplexer,
        policy: BookingPolicyConfig,
    ) -> Self {
        Self {
            repository,
            availability,
            notifier,
            clock,
            feed,
            policy,
        }
    }

    /// Create a pending booking request (renter action)
    pub async fn create(&self, actor: Actor, request: CreateBooking) -> AppResult<BookingRequest> {
        if actor.role != ActorRole::Renter {
            return Err(AppError::Unauthorized(
                "Only renters can request bookings".to_string(),
            ));
        }
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let range = DateRange::new(request.start_date, request.end_date)?;
        let today = self.clock.today();
        if range.start < today {
            return Err(AppError::Validation(format!(
                "start date {} is in the past",
                range.start
            )));
        }
        if request.total_amount <= Decimal::ZERO || request.total_amount.scale() > 2 {
            return Err(AppError::Validation(format!(
                "total amount {} must be positive with at most two decimals",
                request.total_amount
            )));
        }

        let owner_id = self.availability.equipment_owner(request.equipment_id).await?;
        if owner_id == actor.user_id {
            return Err(AppError::Validation(
                "Owners cannot book their own equipment".to_string(),
            ));
        }

        let now = Utc::now();
        let booking = BookingRequest {
            id: Uuid::new_v4(),
            equipment_id: request.equipment_id,
            renter_id: actor.user_id,
            owner_id,
            start_date: range.start,
            end_date: range.end,
            total_amount: request.total_amount,
            status: Pending,
            message: request.message,
            renter_reviewed_at: None,
            owner_reviewed_at: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let booking = self.repository.bookings.insert(&booking).await?;
        tracing::info!(
            booking_id = %booking.id,
            equipment_id = %booking.equipment_id,
            renter_id = %booking.renter_id,
            "Booking requested"
        );
        self.feed.publish(BookingUpdate::booking(&booking, ChangeEvent::Insert));
        Ok(booking)
    }

    pub async fn get(&self, booking_id: Uuid) -> AppResult<BookingRequest> {
        self.repository.bookings.get(booking_id).await
    }

    /// Check that `actor` may move `booking` to `target` right now.
    /// Reads current facts but writes nothing.
    pub async fn validate_transition(
        &self,
        booking: &BookingRequest,
        actor: Actor,
        target: BookingStatus,
    ) -> AppResult<()> {
        match check_edge(booking.status, target, actor.role) {
            EdgeCheck::Allowed => {}
            EdgeCheck::NoSuchEdge => {
                return Err(AppError::invalid_transition(
                    booking.status,
                    target,
                    "no such transition",
                ))
            }
            EdgeCheck::RoleNotPermitted => {
                return Err(AppError::invalid_transition(
                    booking.status,
                    target,
                    format!("{} cannot make this transition", actor.role),
                ))
            }
        }

        if matches!(actor.role, ActorRole::Renter | ActorRole::Owner)
            && booking.party_role(actor.user_id) != Some(actor.role)
        {
            return Err(AppError::Unauthorized(format!(
                "User {} is not the {} of booking {}",
                actor.user_id, actor.role, booking.id
            )));
        }

        self.check_preconditions(booking, actor, target).await
    }

    async fn check_preconditions(
        &self,
        booking: &BookingRequest,
        actor: Actor,
        target: BookingStatus,
    ) -> AppResult<()> {
        let today = self.clock.today();
        let refuse = |reason: &str| Err(AppError::invalid_transition(booking.status, target, reason));

        match (target, actor.role) {
            (Approved, _) => {
                let available = self
                    .availability
                    .check_availability(booking.equipment_id, booking.date_range(), Some(booking.id))
                    .await?;
                if !available {
                    return refuse("equipment is not available for the requested dates");
                }
            }
            (Cancelled, ActorRole::Renter | ActorRole::Owner) => {
                if booking.has_started(today) {
                    return refuse("rental has already started");
                }
            }
            (Active, _) => {
                if !booking.has_started(today) {
                    return refuse("start date has not been reached");
                }
                let paid = self
                    .repository
                    .payments
                    .find_by_booking(booking.id)
                    .await?
                    .map(|p| p.payment_status == PaymentStatus::Succeeded)
                    .unwrap_or(false);
                if !paid {
                    return refuse("payment has not succeeded");
                }
                let clear = self
                    .availability
                    .check_availability(booking.equipment_id, booking.date_range(), Some(booking.id))
                    .await?;
                if !clear {
                    return refuse("another rental is active for these dates");
                }
            }
            (Completed, _) => {
                if !booking.has_ended(today) {
                    return refuse("end date has not passed");
                }
                if !self.policy.waive_return_inspection {
                    let returned = self
                        .repository
                        .inspections
                        .list_for_booking(booking.id)
                        .await?
                        .iter()
                        .any(|i| i.inspection_type == InspectionType::Return);
                    if !returned {
                        return refuse("return inspection has not been recorded");
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Move a booking to `target`. `expected_version` is the version the
    /// caller last observed; exactly one of several concurrent writers wins.
    pub async fn request_transition(
        &self,
        booking_id: Uuid,
        actor: Actor,
        target: BookingStatus,
        expected_version: i64,
    ) -> AppResult<BookingRequest> {
        let booking = self.repository.bookings.get(booking_id).await?;
        if booking.version != expected_version {
            return Err(AppError::StaleState {
                entity: "booking",
                id: booking_id,
                expected: expected_version,
                actual: booking.version,
            });
        }

        self.validate_transition(&booking, actor, target).await?;

        let updated = self
            .repository
            .bookings
            .update_status(booking_id, expected_version, target)
            .await?;

        tracing::info!(
            booking_id = %booking_id,
            from = %booking.status,
            to = %target,
            actor = %actor.role,
            version = updated.version,
            "Booking transitioned"
        );
        self.after_transition(&updated, actor).await;
        Ok(updated)
    }

    /// Finish a cancellation whose refund already went through. Only used
    /// as a repair step, so the role table does not apply.
    pub(crate) async fn complete_cancellation(&self, booking_id: Uuid) -> AppResult<BookingRequest> {
        let booking = self.repository.bookings.get(booking_id).await?;
        if booking.status == Cancelled {
            return Ok(booking);
        }
        if booking.status.is_terminal() {
            return Err(AppError::invalid_transition(
                booking.status,
                Cancelled,
                "booking already reached a terminal state",
            ));
        }

        let updated = self
            .repository
            .bookings
            .update_status(booking_id, booking.version, Cancelled)
            .await?;
        tracing::warn!(
            booking_id = %booking_id,
            from = %booking.status,
            "Cancellation completed by repair"
        );
        self.after_transition(&updated, Actor::system()).await;
        Ok(updated)
    }

    async fn after_transition(&self, booking: &BookingRequest, actor: Actor) {
        self.feed
            .publish(BookingUpdate::booking(booking, ChangeEvent::Update));

        let related = RelatedEntity::Booking(booking.id);
        let (kind, recipients) = match booking.status {
            Approved => (NotificationType::BookingConfirmed, vec![booking.renter_id]),
            Cancelled => {
                let recipients = match booking.party_role(actor.user_id) {
                    Some(_) => vec![booking.counterparty(actor.user_id)],
                    None => vec![booking.renter_id, booking.owner_id],
                };
                (NotificationType::BookingCancelled, recipients)
            }
            Completed => (
                NotificationType::BookingCompleted,
                vec![booking.renter_id, booking.owner_id],
            ),
            _ => return,
        };
        notify_all(self.notifier.as_ref(), &recipients, kind, related).await;
    }
}
