//! Booking lifecycle endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        Actor, BookingRequest, BookingStatus, CancelBooking, CreateBooking, ReleaseOverride,
        TransitionRequest,
    },
    services::{inspections::ReleaseEligibility, refunds::CancellationOutcome},
    AppState,
};

use super::AuthenticatedActor;

/// Parties of the booking and admins may read it
pub(crate) fn require_visible(booking: &BookingRequest, actor: Actor) -> AppResult<()> {
    if actor.is_admin() || booking.party_role(actor.user_id).is_some() {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "Booking {} belongs to other users",
            booking.id
        )))
    }
}

/// Request a booking
#[utoipa::path(
    post,
    path = "/bookings",
    tag = "bookings",
    security(("bearer_auth" = [])),
    request_body = CreateBooking,
    responses(
        (status = 201, description = "Booking requested", body = BookingRequest),
        (status = 400, description = "Invalid dates or amount"),
        (status = 403, description = "Only renters can request bookings"),
        (status = 404, description = "Equipment not found")
    )
)]
pub async fn create_booking(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(request): Json<CreateBooking>,
) -> AppResult<(StatusCode, Json<BookingRequest>)> {
    let booking = state.services.bookings.create(actor, request).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// Get a booking; repairs a half-finished cancellation on the way
#[utoipa::path(
    get,
    path = "/bookings/{id}",
    tag = "bookings",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Booking ID")
    ),
    responses(
        (status = 200, description = "Booking", body = BookingRequest),
        (status = 404, description = "Booking not found")
    )
)]
pub async fn get_booking(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<BookingRequest>> {
    let booking = state.services.refunds.reconcile(booking_id).await?;
    require_visible(&booking, actor)?;
    Ok(Json(booking))
}

/// Move a booking to another status
#[utoipa::path(
    post,
    path = "/bookings/{id}/transitions",
    tag = "bookings",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Booking ID")
    ),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Booking transitioned", body = BookingRequest),
        (status = 400, description = "Cancellation requested here instead of /cancel"),
        (status = 403, description = "Not a party to the booking"),
        (status = 409, description = "Booking changed since it was read"),
        (status = 422, description = "Transition not allowed")
    )
)]
pub async fn transition_booking(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> AppResult<Json<BookingRequest>> {
    // Cancelling moves money, it has its own endpoint
    if request.target == BookingStatus::Cancelled {
        return Err(AppError::Validation(
            "use POST /bookings/{id}/cancel to cancel a booking".to_string(),
        ));
    }
    let booking = state
        .services
        .bookings
        .request_transition(booking_id, actor, request.target, request.expected_version)
        .await?;
    Ok(Json(booking))
}

/// Cancel a booking with the refund policy applied
#[utoipa::path(
    post,
    path = "/bookings/{id}/cancel",
    tag = "bookings",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Booking ID")
    ),
    request_body = CancelBooking,
    responses(
        (status = 200, description = "Booking cancelled", body = CancellationOutcome),
        (status = 409, description = "Booking changed since it was read"),
        (status = 422, description = "Cancellation not allowed"),
        (status = 502, description = "Refund failed, booking unchanged")
    )
)]
pub async fn cancel_booking(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<CancelBooking>,
) -> AppResult<Json<CancellationOutcome>> {
    validator::Validate::validate(&request).map_err(|e| AppError::Validation(e.to_string()))?;

    let outcome = state
        .services
        .refunds
        .cancel(booking_id, actor, &request.reason, request.expected_version)
        .await?;
    Ok(Json(outcome))
}

/// Whether escrow may be released, with the reasons
#[utoipa::path(
    get,
    path = "/bookings/{id}/release-eligibility",
    tag = "bookings",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Booking ID")
    ),
    responses(
        (status = 200, description = "Release eligibility", body = ReleaseEligibility),
        (status = 404, description = "Booking not found")
    )
)]
pub async fn release_eligibility(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<ReleaseEligibility>> {
    let booking = state.services.bookings.get(booking_id).await?;
    require_visible(&booking, actor)?;
    Ok(Json(state.services.inspections.release_eligibility(booking_id).await?))
}

/// Owner allows escrow release before the end date
#[utoipa::path(
    post,
    path = "/bookings/{id}/release-override",
    tag = "bookings",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Booking ID")
    ),
    responses(
        (status = 201, description = "Override recorded", body = ReleaseOverride),
        (status = 403, description = "Only the owner can allow early release")
    )
)]
pub async fn grant_release_override(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(booking_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<ReleaseOverride>)> {
    let release_override = state
        .services
        .inspections
        .grant_release_override(booking_id, actor)
        .await?;
    Ok((StatusCode::CREATED, Json(release_override)))
}
