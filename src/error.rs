//! Error types for the Rentwise engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Stable error codes returned to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidTransition,
    StaleState,
    NotEligible,
    ExceedsAvailable,
    DuplicateInspection,
    OutOfOrder,
    ProcessorFailure,
    DataCorruption,
    Unauthorized,
    NotAuthenticated,
    NotFound,
    BadValue,
    Conflict,
    DbFailure,
    Failure,
}

/// What a caller may do after receiving an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RetryGuidance {
    /// Validation or authorization failure, retrying the same request fails again
    DoNotRetry,
    /// The record moved on; refetch it and decide again
    RefetchAndRetry,
    /// Nothing happened, the same request can be sent again
    SafeToRetry,
    /// The processor may have acted; retry only with the same idempotency key
    CheckBeforeRetry,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Stale {entity} {id}: expected version {expected}, found {actual}")]
    StaleState {
        entity: &'static str,
        id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Refund of {requested} exceeds available amount {available}")]
    ExceedsAvailable {
        requested: Decimal,
        available: Decimal,
    },

    #[error("A {inspection_type} inspection already exists for booking {booking_id}")]
    DuplicateInspection {
        booking_id: Uuid,
        inspection_type: String,
    },

    #[error("Out of order: {0}")]
    OutOfOrder(String),

    #[error("Payment processor failure: {message}")]
    ProcessorFailure {
        message: String,
        /// Whether the processor may have partially acted on the request
        may_have_acted: bool,
    },

    #[error("Data corruption: {0}")]
    DataCorruption(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_transition(
        from: impl ToString,
        to: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        AppError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            AppError::StaleState { .. } => ErrorCode::StaleState,
            AppError::NotEligible(_) => ErrorCode::NotEligible,
            AppError::ExceedsAvailable { .. } => ErrorCode::ExceedsAvailable,
            AppError::DuplicateInspection { .. } => ErrorCode::DuplicateInspection,
            AppError::OutOfOrder(_) => ErrorCode::OutOfOrder,
            AppError::ProcessorFailure { .. } => ErrorCode::ProcessorFailure,
            AppError::DataCorruption(_) => ErrorCode::DataCorruption,
            AppError::Unauthorized(_) => ErrorCode::Unauthorized,
            AppError::Authentication(_) => ErrorCode::NotAuthenticated,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Validation(_) => ErrorCode::BadValue,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::Database(_) => ErrorCode::DbFailure,
            AppError::Internal(_) => ErrorCode::Failure,
        }
    }

    /// Retry guidance for the caller. Validation errors are never retried
    /// automatically; corruption halts the operation.
    pub fn retry_guidance(&self) -> RetryGuidance {
        match self {
            AppError::StaleState { .. } => RetryGuidance::RefetchAndRetry,
            AppError::ProcessorFailure { may_have_acted: true, .. } => {
                RetryGuidance::CheckBeforeRetry
            }
            AppError::ProcessorFailure { may_have_acted: false, .. } => RetryGuidance::SafeToRetry,
            AppError::Database(_) => RetryGuidance::SafeToRetry,
            _ => RetryGuidance::DoNotRetry,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self.retry_guidance(), RetryGuidance::DoNotRetry)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, AppError::StaleState { .. })
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    #[schema(value_type = String)]
    pub code: ErrorCode,
    pub message: String,
    pub retry: RetryGuidance,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidTransition { .. }
            | AppError::NotEligible(_)
            | AppError::ExceedsAvailable { .. }
            | AppError::OutOfOrder(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::StaleState { .. }
            | AppError::DuplicateInspection { .. }
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ProcessorFailure { .. } => StatusCode::BAD_GATEWAY,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::DataCorruption(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::DataCorruption(msg) => {
                tracing::error!(alert = true, "Data corruption: {}", msg);
                self.to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            code: self.code(),
            message,
            retry: self.retry_guidance(),
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_state_is_refetch_and_retry() {
        let err = AppError::StaleState {
            entity: "booking",
            id: Uuid::new_v4(),
            expected: 1,
            actual: 2,
        };
        assert_eq!(err.retry_guidance(), RetryGuidance::RefetchAndRetry);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_processor_failure_guidance_depends_on_side_effects() {
        let untouched = AppError::ProcessorFailure {
            message: "connection refused".into(),
            may_have_acted: false,
        };
        let ambiguous = AppError::ProcessorFailure {
            message: "timeout".into(),
            may_have_acted: true,
        };
        assert_eq!(untouched.retry_guidance(), RetryGuidance::SafeToRetry);
        assert_eq!(ambiguous.retry_guidance(), RetryGuidance::CheckBeforeRetry);
    }

    #[test]
    fn test_validation_errors_are_not_retryable() {
        assert!(!AppError::NotEligible("no inspections".into()).is_retryable());
        assert!(!AppError::OutOfOrder("return before pickup".into()).is_retryable());
        assert!(!AppError::DataCorruption("status 'archived'".into()).is_retryable());
        assert!(!AppError::invalid_transition("pending", "completed", "no edge").is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        let resp = AppError::Unauthorized("not the owner".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = AppError::DuplicateInspection {
            booking_id: Uuid::new_v4(),
            inspection_type: "pickup".into(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
