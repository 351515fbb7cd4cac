//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{bookings, claims, feed, health, inspections, payments};

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Rentwise API",
        version = "0.4.0",
        description = "Booking lifecycle and escrow settlement for peer-to-peer equipment rental",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Bookings
        bookings::create_booking,
        bookings::get_booking,
        bookings::transition_booking,
        bookings::cancel_booking,
        bookings::release_eligibility,
        bookings::grant_release_override,
        // Payments
        payments::open_escrow,
        payments::get_booking_payment,
        payments::get_payment,
        payments::confirm_payment,
        payments::release_escrow,
        payments::refund_payment,
        payments::resolve_dispute,
        // Inspections
        inspections::list_inspections,
        inspections::record_inspection,
        // Claims
        claims::process_claim,
        // Feed
        feed::stream_feed,
    ),
    components(
        schemas(
            // Bookings
            crate::models::BookingRequest,
            crate::models::CreateBooking,
            crate::models::CancelBooking,
            crate::models::TransitionRequest,
            crate::models::BookingStatus,
            crate::models::ActorRole,
            crate::models::DateRange,
            crate::services::refunds::CancellationOutcome,
            crate::services::inspections::ReleaseEligibility,
            // Payments
            crate::models::Payment,
            crate::models::FeeBreakdown,
            crate::models::OpenEscrow,
            crate::models::payment::OpenedEscrow,
            crate::models::payment::RefundRequest,
            crate::models::DisputeDecision,
            crate::models::PaymentStatus,
            crate::models::EscrowStatus,
            // Inspections
            crate::models::Inspection,
            crate::models::InspectionPayload,
            crate::models::ChecklistItem,
            crate::models::InspectionType,
            crate::models::ReleaseOverride,
            // Claims
            claims::ClaimProcessed,
            crate::models::ClaimReaction,
            // Feed
            crate::models::BookingUpdate,
            crate::models::UpdateKind,
            crate::models::ChangeEvent,
            // Health
            health::HealthResponse,
            health::ReadinessResponse,
            // Errors
            crate::error::ErrorResponse,
            crate::error::RetryGuidance,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "bookings", description = "Booking lifecycle"),
        (name = "payments", description = "Escrow and refunds"),
        (name = "inspections", description = "Pickup and return inspections"),
        (name = "claims", description = "Damage claim hooks"),
        (name = "feed", description = "Live booking updates")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
