//! Damage claim hooks

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{error::AppResult, models::ClaimReaction, AppState};

use super::AuthenticatedActor;

#[derive(Serialize, ToSchema)]
pub struct ClaimProcessed {
    pub claim_id: Uuid,
    pub reaction: ClaimReaction,
}

/// Apply a damage claim's current status to the booking's escrow (admin)
#[utoipa::path(
    post,
    path = "/claims/{id}/process",
    tag = "claims",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Damage claim ID")
    ),
    responses(
        (status = 200, description = "Claim processed", body = ClaimProcessed),
        (status = 403, description = "Admin rights required"),
        (status = 404, description = "Claim not found")
    )
)]
pub async fn process_claim(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(claim_id): Path<Uuid>,
) -> AppResult<Json<ClaimProcessed>> {
    actor.require_admin()?;
    let reaction = state.services.disputes.on_claim(claim_id).await?;
    Ok(Json(ClaimProcessed { claim_id, reaction }))
}
