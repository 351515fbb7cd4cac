//! Actors and bearer-token claims

use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::enums::ActorRole;
use crate::error::AppError;

/// Identity and role of whoever requests an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(user_id: Uuid, role: ActorRole) -> Self {
        Self { user_id, role }
    }

    pub fn renter(user_id: Uuid) -> Self {
        Self::new(user_id, ActorRole::Renter)
    }

    pub fn owner(user_id: Uuid) -> Self {
        Self::new(user_id, ActorRole::Owner)
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self::new(user_id, ActorRole::Admin)
    }

    /// The scheduler acting on time-based transitions
    pub fn system() -> Self {
        Self::new(Uuid::nil(), ActorRole::System)
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Unauthorized("Admin rights required".to_string()))
        }
    }
}

/// JWT claims carried by API clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorClaims {
    pub sub: String,
    pub user_id: Uuid,
    pub role: ActorRole,
    pub exp: i64,
    pub iat: i64,
}

impl ActorClaims {
    pub fn new(actor: Actor, ttl_hours: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: actor.user_id.to_string(),
            user_id: actor.user_id,
            role: actor.role,
            exp: now + ttl_hours * 3600,
            iat: now,
        }
    }

    /// Create a new JWT token
    pub fn create_token(&self, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{encode, EncodingKey, Header};
        encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Parse JWT token
    pub fn from_token(token: &str, secret: &str) -> Result<Self, jsonwebtoken::errors::Error> {
        use jsonwebtoken::{decode, DecodingKey, Validation};
        let token_data = decode::<Self>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id, self.role)
    }
}
