//! Pickup and return inspection endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Inspection, InspectionPayload},
    AppState,
};

use super::{bookings::require_visible, AuthenticatedActor};

/// List inspections of a booking
#[utoipa::path(
    get,
    path = "/bookings/{id}/inspections",
    tag = "inspections",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Booking ID")
    ),
    responses(
        (status = 200, description = "Inspections in recording order", body = Vec<Inspection>),
        (status = 404, description = "Booking not found")
    )
)]
pub async fn list_inspections(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<Vec<Inspection>>> {
    let booking = state.services.bookings.get(booking_id).await?;
    require_visible(&booking, actor)?;
    Ok(Json(state.services.inspections.list(booking_id).await?))
}

/// Record a pickup or return inspection
#[utoipa::path(
    post,
    path = "/bookings/{id}/inspections",
    tag = "inspections",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Booking ID")
    ),
    request_body = InspectionPayload,
    responses(
        (status = 201, description = "Inspection recorded", body = Inspection),
        (status = 403, description = "Not a party to the booking"),
        (status = 409, description = "Inspection of this type already recorded"),
        (status = 422, description = "Return recorded before pickup, or booking not in rental")
    )
)]
pub async fn record_inspection(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(booking_id): Path<Uuid>,
    Json(payload): Json<InspectionPayload>,
) -> AppResult<(StatusCode, Json<Inspection>)> {
    let inspection = state
        .services
        .inspections
        .record_inspection(booking_id, actor, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(inspection)))
}
