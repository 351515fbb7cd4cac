//! Payment and escrow record

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::enums::{EscrowStatus, PaymentStatus};
use crate::error::AppError;

/// Amounts of a payment, computed once when escrow is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FeeBreakdown {
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub service_fee: Decimal,
    #[schema(value_type = String)]
    pub tax: Decimal,
    #[schema(value_type = String)]
    pub insurance_amount: Decimal,
    #[schema(value_type = String)]
    pub deposit_amount: Decimal,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    #[schema(value_type = String)]
    pub escrow_amount: Decimal,
    #[schema(value_type = String)]
    pub owner_payout_amount: Decimal,
}

impl FeeBreakdown {
    /// Both conservation equations hold
    pub fn is_balanced(&self) -> bool {
        self.subtotal + self.service_fee + self.tax + self.insurance_amount == self.total_amount
            && self.escrow_amount + self.owner_payout_amount == self.total_amount
    }
}

/// Payment linked 1:1 to a booking request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub booking_request_id: Uuid,
    pub renter_id: Uuid,
    pub owner_id: Uuid,
    #[serde(flatten)]
    pub amounts: FeeBreakdown,
    pub payment_status: PaymentStatus,
    pub escrow_status: EscrowStatus,
    #[schema(value_type = Option<String>)]
    pub refund_amount: Option<Decimal>,
    pub refund_reason: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Payment {
    pub fn refunded_so_far(&self) -> Decimal {
        self.refund_amount.unwrap_or(Decimal::ZERO)
    }

    /// Amount that can still be refunded
    pub fn refundable(&self) -> Decimal {
        self.amounts.total_amount - self.refunded_so_far()
    }

    /// Verify the record's financial invariants. A violation means the stored
    /// row was altered outside the ledger.
    pub fn check_invariants(&self) -> Result<(), AppError> {
        if !self.amounts.is_balanced() {
            return Err(AppError::DataCorruption(format!(
                "payment {} amounts do not balance",
                self.id
            )));
        }
        if self.refunded_so_far() > self.amounts.total_amount {
            return Err(AppError::DataCorruption(format!(
                "payment {} refunded {} out of {}",
                self.id,
                self.refunded_so_far(),
                self.amounts.total_amount
            )));
        }
        if self.escrow_status == EscrowStatus::Refunded
            && self.payment_status != PaymentStatus::Refunded
        {
            return Err(AppError::DataCorruption(format!(
                "payment {} escrow refunded while payment is {}",
                self.id, self.payment_status
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub booking_request_id: Uuid,
    pub renter_id: Uuid,
    pub owner_id: Uuid,
    pub subtotal: Decimal,
    pub service_fee: Decimal,
    pub tax: Decimal,
    pub insurance_amount: Decimal,
    pub deposit_amount: Decimal,
    pub total_amount: Decimal,
    pub escrow_amount: Decimal,
    pub owner_payout_amount: Decimal,
    pub payment_status: String,
    pub escrow_status: String,
    pub refund_amount: Option<Decimal>,
    pub refund_reason: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = AppError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let payment = Payment {
            payment_status: row.payment_status.parse()?,
            escrow_status: row.escrow_status.parse()?,
            id: row.id,
            booking_request_id: row.booking_request_id,
            renter_id: row.renter_id,
            owner_id: row.owner_id,
            amounts: FeeBreakdown {
                subtotal: row.subtotal,
                service_fee: row.service_fee,
                tax: row.tax,
                insurance_amount: row.insurance_amount,
                deposit_amount: row.deposit_amount,
                total_amount: row.total_amount,
                escrow_amount: row.escrow_amount,
                owner_payout_amount: row.owner_payout_amount,
            },
            refund_amount: row.refund_amount,
            refund_reason: row.refund_reason,
            stripe_payment_intent_id: row.stripe_payment_intent_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        };
        payment.check_invariants()?;
        Ok(payment)
    }
}

/// Open escrow request
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct OpenEscrow {
    #[serde(default)]
    pub include_insurance: bool,
}

/// Result of opening escrow, carrying what the payment UI needs
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OpenedEscrow {
    pub payment: Payment,
    pub client_secret: String,
}

/// Refund request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RefundRequest {
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub reason: String,
}

/// Outcome of an admin dispute resolution
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DisputeDecision {
    /// Release escrow to the owner
    Release,
    /// Refund the renter, optionally cancelling the booking
    Refund {
        #[schema(value_type = String)]
        amount: Decimal,
        reason: String,
        #[serde(default)]
        cancel_booking: bool,
    },
}
