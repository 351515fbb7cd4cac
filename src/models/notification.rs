//! Notification types emitted to the notification collaborator

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    BookingConfirmed,
    BookingCancelled,
    BookingCompleted,
    PaymentReceived,
    PaymentProcessed,
    RefundIssued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Booking,
    Payment,
}

/// Entity a notification points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RelatedEntity {
    Booking(Uuid),
    Payment(Uuid),
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::BookingConfirmed => "booking_confirmed",
            NotificationType::BookingCancelled => "booking_cancelled",
            NotificationType::BookingCompleted => "booking_completed",
            NotificationType::PaymentReceived => "payment_received",
            NotificationType::PaymentProcessed => "payment_processed",
            NotificationType::RefundIssued => "refund_issued",
        }
    }

    pub fn category(&self) -> NotificationCategory {
        match self {
            NotificationType::BookingConfirmed
            | NotificationType::BookingCancelled
            | NotificationType::BookingCompleted => NotificationCategory::Booking,
            NotificationType::PaymentReceived
            | NotificationType::PaymentProcessed
            | NotificationType::RefundIssued => NotificationCategory::Payment,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            NotificationType::BookingConfirmed => "Booking confirmed",
            NotificationType::BookingCancelled => "Booking cancelled",
            NotificationType::BookingCompleted => "Rental completed",
            NotificationType::PaymentReceived => "Payment received",
            NotificationType::PaymentProcessed => "Payment processed",
            NotificationType::RefundIssued => "Refund issued",
        }
    }

    /// Deep link opened when the user taps the notification
    pub fn action_path(&self, related: RelatedEntity) -> String {
        let booking_path = |id: Uuid| format!("/bookings/{}", id);
        match (self, related) {
            (_, RelatedEntity::Booking(id)) => booking_path(id),
            (NotificationType::RefundIssued, RelatedEntity::Payment(id)) => {
                format!("/payments/{}/refund", id)
            }
            (_, RelatedEntity::Payment(id)) => format!("/payments/{}", id),
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
