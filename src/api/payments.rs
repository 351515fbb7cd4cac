//! Payment and escrow endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        payment::{OpenedEscrow, RefundRequest},
        Actor, DisputeDecision, OpenEscrow, Payment,
    },
    AppState,
};

use super::{bookings::require_visible, AuthenticatedActor};

fn require_payment_party(payment: &Payment, actor: Actor) -> AppResult<()> {
    if actor.is_admin() || actor.user_id == payment.renter_id || actor.user_id == payment.owner_id {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "Payment {} belongs to other users",
            payment.id
        )))
    }
}

/// Open escrow for an approved booking
#[utoipa::path(
    post,
    path = "/bookings/{id}/payment",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Booking ID")
    ),
    request_body = OpenEscrow,
    responses(
        (status = 201, description = "Escrow opened", body = OpenedEscrow),
        (status = 409, description = "Booking already has a payment"),
        (status = 422, description = "Booking is not approved"),
        (status = 502, description = "Payment processor failure")
    )
)]
pub async fn open_escrow(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<OpenEscrow>,
) -> AppResult<(StatusCode, Json<OpenedEscrow>)> {
    let opened = state.services.escrow.open(booking_id, actor, request).await?;
    Ok((StatusCode::CREATED, Json(opened)))
}

/// Get the payment of a booking
#[utoipa::path(
    get,
    path = "/bookings/{id}/payment",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Booking ID")
    ),
    responses(
        (status = 200, description = "Payment", body = Payment),
        (status = 404, description = "Booking has no payment")
    )
)]
pub async fn get_booking_payment(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<Payment>> {
    let booking = state.services.bookings.get(booking_id).await?;
    require_visible(&booking, actor)?;

    state
        .services
        .escrow
        .get_for_booking(booking_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Booking {} has no payment", booking_id)))
}

/// Get a payment
#[utoipa::path(
    get,
    path = "/payments/{id}",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment", body = Payment),
        (status = 404, description = "Payment not found")
    )
)]
pub async fn get_payment(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Json<Payment>> {
    let payment = state.services.escrow.get(payment_id).await?;
    require_payment_party(&payment, actor)?;
    Ok(Json(payment))
}

/// Confirm a payment with the processor
#[utoipa::path(
    post,
    path = "/payments/{id}/confirm",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment status after confirmation", body = Payment),
        (status = 502, description = "Payment declined or processor unavailable")
    )
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Json<Payment>> {
    Ok(Json(state.services.escrow.confirm(payment_id, actor).await?))
}

/// Release escrow to the owner
#[utoipa::path(
    post,
    path = "/payments/{id}/release",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Escrow released", body = Payment),
        (status = 422, description = "Release not allowed yet")
    )
)]
pub async fn release_escrow(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Json<Payment>> {
    Ok(Json(state.services.escrow.release(payment_id, actor).await?))
}

/// Refund part of a payment (admin)
#[utoipa::path(
    post,
    path = "/payments/{id}/refunds",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Payment ID")
    ),
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Refund issued", body = Payment),
        (status = 403, description = "Admin rights required"),
        (status = 422, description = "Amount exceeds what can be refunded"),
        (status = 502, description = "Processor refund failed")
    )
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> AppResult<Json<Payment>> {
    actor.require_admin()?;
    let payment = state
        .services
        .escrow
        .refund(payment_id, request.amount, &request.reason)
        .await?;
    Ok(Json(payment))
}

/// Settle a disputed payment (admin)
#[utoipa::path(
    post,
    path = "/payments/{id}/resolution",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Payment ID")
    ),
    request_body = DisputeDecision,
    responses(
        (status = 200, description = "Dispute settled", body = Payment),
        (status = 403, description = "Admin rights required"),
        (status = 422, description = "Payment is not disputed")
    )
)]
pub async fn resolve_dispute(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(payment_id): Path<Uuid>,
    Json(decision): Json<DisputeDecision>,
) -> AppResult<Json<Payment>> {
    let payment = state
        .services
        .refunds
        .resolve_dispute(payment_id, actor, decision)
        .await?;
    Ok(Json(payment))
}
