//! API handlers for the Rentwise REST endpoints

pub mod bookings;
pub mod claims;
pub mod feed;
pub mod health;
pub mod inspections;
pub mod openapi;
pub mod payments;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    routing::{get, post},
    Router,
};

use crate::{
    error::AppError,
    models::{Actor, ActorClaims, ActorRole},
    AppState,
};

/// Extractor for the calling actor, taken from the JWT bearer token
pub struct AuthenticatedActor(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Authentication("Invalid authorization header format".to_string()))?;

        let claims = ActorClaims::from_token(token, &state.config.auth.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;

        // The scheduler never calls in over HTTP
        if claims.role == ActorRole::System {
            return Err(AppError::Authentication("System tokens are not accepted".to_string()));
        }

        Ok(AuthenticatedActor(claims.actor()))
    }
}

/// API v1 routes, without the version prefix
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Bookings
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/transitions", post(bookings::transition_booking))
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/bookings/:id/release-eligibility", get(bookings::release_eligibility))
        .route("/bookings/:id/release-override", post(bookings::grant_release_override))
        // Payments
        .route(
            "/bookings/:id/payment",
            get(payments::get_booking_payment).post(payments::open_escrow),
        )
        .route("/payments/:id", get(payments::get_payment))
        .route("/payments/:id/confirm", post(payments::confirm_payment))
        .route("/payments/:id/release", post(payments::release_escrow))
        .route("/payments/:id/refunds", post(payments::refund_payment))
        .route("/payments/:id/resolution", post(payments::resolve_dispute))
        // Inspections
        .route(
            "/bookings/:id/inspections",
            get(inspections::list_inspections).post(inspections::record_inspection),
        )
        // Claims
        .route("/claims/:id/process", post(claims::process_claim))
        // Live updates
        .route("/feed", get(feed::stream_feed))
        .with_state(state)
}
