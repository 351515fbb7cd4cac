//! Status enums shared by the engine and the stores
//!
//! Stored values are plain text. Any value outside these sets is treated as
//! data corruption rather than mapped to a fallback.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// Generates `as_str`, `Display` and a strict `FromStr` for a text-backed enum.
macro_rules! text_enum {
    ($name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(AppError::DataCorruption(format!(
                        "unknown {} value '{}'",
                        $label, other
                    ))),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// BookingStatus
// ---------------------------------------------------------------------------

/// Booking request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Approved,
    Declined,
    Cancelled,
    Active,
    Completed,
}

text_enum!(BookingStatus, "booking status" {
    Pending => "pending",
    Approved => "approved",
    Declined => "declined",
    Cancelled => "cancelled",
    Active => "active",
    Completed => "completed",
});

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Declined | BookingStatus::Cancelled | BookingStatus::Completed
        )
    }
}

// ---------------------------------------------------------------------------
// PaymentStatus
// ---------------------------------------------------------------------------

/// Status of the charge at the payment processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Refunded,
    Cancelled,
}

text_enum!(PaymentStatus, "payment status" {
    Pending => "pending",
    Processing => "processing",
    Succeeded => "succeeded",
    Failed => "failed",
    Refunded => "refunded",
    Cancelled => "cancelled",
});

impl PaymentStatus {
    /// Money has actually been captured from the renter
    pub fn is_captured(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded | PaymentStatus::Refunded)
    }
}

// ---------------------------------------------------------------------------
// EscrowStatus
// ---------------------------------------------------------------------------

/// Status of the funds held by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Held,
    Released,
    Refunded,
    Disputed,
}

text_enum!(EscrowStatus, "escrow status" {
    Held => "held",
    Released => "released",
    Refunded => "refunded",
    Disputed => "disputed",
});

// ---------------------------------------------------------------------------
// InspectionType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InspectionType {
    Pickup,
    Return,
}

text_enum!(InspectionType, "inspection type" {
    Pickup => "pickup",
    Return => "return",
});

// ---------------------------------------------------------------------------
// ClaimStatus
// ---------------------------------------------------------------------------

/// Damage claim status (claims are managed outside the engine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Disputed,
    Escalated,
    Resolved,
}

text_enum!(ClaimStatus, "claim status" {
    Pending => "pending",
    Disputed => "disputed",
    Escalated => "escalated",
    Resolved => "resolved",
});

impl ClaimStatus {
    /// A claim in this state freezes the escrow
    pub fn freezes_escrow(&self) -> bool {
        matches!(self, ClaimStatus::Disputed | ClaimStatus::Escalated)
    }
}

// ---------------------------------------------------------------------------
// ActorRole
// ---------------------------------------------------------------------------

/// Role an actor plays when requesting an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Renter,
    Owner,
    Admin,
    /// Background jobs acting on time-based transitions
    System,
}

text_enum!(ActorRole, "actor role" {
    Renter => "renter",
    Owner => "owner",
    Admin => "admin",
    System => "system",
});
