//! Data models for Rentwise

pub mod actor;
pub mod booking;
pub mod claim;
pub mod enums;
pub mod inspection;
pub mod notification;
pub mod payment;
pub mod update;

// Re-export commonly used types
pub use actor::{Actor, ActorClaims};
pub use booking::{BookingRequest, CancelBooking, CreateBooking, DateRange, TransitionRequest};
pub use claim::{ClaimReaction, DamageClaim};
pub use enums::{
    ActorRole, BookingStatus, ClaimStatus, EscrowStatus, InspectionType, PaymentStatus,
};
pub use inspection::{ChecklistItem, Inspection, InspectionPayload, ReleaseOverride};
pub use notification::{NotificationType, RelatedEntity};
pub use payment::{DisputeDecision, FeeBreakdown, OpenEscrow, Payment};
pub use update::{BookingUpdate, ChangeEvent, RawChange, UpdateKind};
