//! Refund orchestrator
//!
//! Cancellation touches two records owned by different components: the
//! ledger moves the money, the state machine moves the booking. Money moves
//! first; a booking left behind is repaired by completing the cancellation.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    bookings::BookingStateMachine,
    clock::Clock,
    escrow::{round2, EscrowLedger},
};
use crate::{
    config::{RefundPolicyConfig, RefundTier},
    error::{AppError, AppResult},
    models::{
        Actor, ActorRole, BookingRequest, BookingStatus, DisputeDecision, EscrowStatus, Payment,
        PaymentStatus,
    },
};

/// Prefix of `refund_reason` for refunds issued by a cancellation
pub const CANCELLATION_REFUND_PREFIX: &str = "cancellation";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CancellationOutcome {
    pub booking: BookingRequest,
    pub payment: Option<Payment>,
    #[schema(value_type = String)]
    pub refund_fraction: Decimal,
    #[schema(value_type = String)]
    pub refund_amount: Decimal,
}

/// Refund fraction for a cancellation `days_before_start` days ahead.
/// Tiers are checked from the longest notice down; the first one whose
/// threshold is met applies.
pub fn fraction_for(schedule: &[RefundTier], days_before_start: i64) -> Decimal {
    let mut tiers: Vec<&RefundTier> = schedule.iter().collect();
    tiers.sort_by(|a, b| b.min_days_before_start.cmp(&a.min_days_before_start));
    tiers
        .into_iter()
        .find(|t| days_before_start >= t.min_days_before_start)
        .map(|t| t.fraction)
        .unwrap_or(Decimal::ZERO)
}

fn is_cancellation_refund(payment: &Payment) -> bool {
    payment.escrow_status == EscrowStatus::Refunded
        && payment
            .refund_reason
            .as_deref()
            .map(|r| r.starts_with(CANCELLATION_REFUND_PREFIX))
            .unwrap_or(false)
}

#[derive(Clone)]
pub struct RefundOrchestrator {
    bookings: BookingStateMachine,
    ledger: EscrowLedger,
    clock: Arc<dyn Clock>,
    policy: RefundPolicyConfig,
}

impl RefundOrchestrator {
    pub fn new(
        bookings: BookingStateMachine,
        ledger: EscrowLedger,
        clock: Arc<dyn Clock>,
        policy: RefundPolicyConfig,
    ) -> Self {
        Self {
            bookings,
            ledger,
            clock,
            policy,
        }
    }

    pub fn refund_fraction(&self, days_before_start: i64) -> Decimal {
        fraction_for(&self.policy.schedule, days_before_start)
    }

    fn fraction_for_actor(&self, booking: &BookingRequest, actor: Actor) -> Decimal {
        match actor.role {
            ActorRole::Renter => {
                self.refund_fraction(booking.days_until_start(self.clock.today()))
            }
            ActorRole::Owner if self.policy.owner_cancellation_full_refund => Decimal::ONE,
            ActorRole::Owner => self.refund_fraction(booking.days_until_start(self.clock.today())),
            ActorRole::Admin | ActorRole::System => Decimal::ONE,
        }
    }

    /// Cancel a booking and refund the renter according to policy
    pub async fn cancel(
        &self,
        booking_id: Uuid,
        actor: Actor,
        reason: &str,
        expected_version: i64,
    ) -> AppResult<CancellationOutcome> {
        let booking = self.bookings.get(booking_id).await?;
        if booking.version != expected_version {
            return Err(AppError::StaleState {
                entity: "booking",
                id: booking_id,
                expected: expected_version,
                actual: booking.version,
            });
        }
        self.bookings
            .validate_transition(&booking, actor, BookingStatus::Cancelled)
            .await?;

        let fraction = self.fraction_for_actor(&booking, actor);
        let mut payment = self.ledger.get_for_booking(booking_id).await?;
        if let Some(current) = &payment {
            if current.escrow_status == EscrowStatus::Disputed {
                return Err(AppError::NotEligible(
                    "escrow is frozen by a dispute, an admin resolves it first".to_string(),
                ));
            }
        }
        let mut refund_amount = Decimal::ZERO;
        let mut forfeit = None;

        if let Some(current) = payment.take() {
            payment = Some(match current.payment_status {
                PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Failed => {
                    self.ledger.cancel_unpaid(current.id).await?
                }
                status if status.is_captured() && current.escrow_status != EscrowStatus::Released => {
                    refund_amount =
                        round2(current.amounts.total_amount * fraction).min(current.refundable());
                    if refund_amount > Decimal::ZERO {
                        self.ledger
                            .refund(
                                current.id,
                                refund_amount,
                                &format!("{}: {}", CANCELLATION_REFUND_PREFIX, reason),
                            )
                            .await?
                    } else {
                        // Owner keeps the held funds once the booking is cancelled
                        if current.escrow_status == EscrowStatus::Held
                            && status == PaymentStatus::Succeeded
                        {
                            forfeit = Some(current.id);
                        }
                        current
                    }
                }
                _ => current,
            });
        }

        let booking = match self
            .bookings
            .request_transition(booking_id, actor, BookingStatus::Cancelled, expected_version)
            .await
        {
            Ok(booking) => booking,
            Err(e) if refund_amount > Decimal::ZERO => {
                tracing::warn!(
                    booking_id = %booking_id,
                    "Refund issued but cancellation failed ({}), repairing",
                    e
                );
                self.repair(booking_id).await?
            }
            Err(e) => return Err(e),
        };

        if let Some(payment_id) = forfeit {
            // A failure here is finished by reconcile
            match self.ledger.forfeit_to_owner(payment_id).await {
                Ok(kept) => payment = Some(kept),
                Err(e) => tracing::warn!(
                    booking_id = %booking_id,
                    "Cancelled without refund but escrow still held: {}",
                    e
                ),
            }
        }

        tracing::info!(
            booking_id = %booking_id,
            actor = %actor.role,
            fraction = %fraction,
            refund = %refund_amount,
            "Booking cancelled"
        );
        Ok(CancellationOutcome {
            booking,
            payment,
            refund_fraction: fraction,
            refund_amount,
        })
    }

    /// Complete a cancellation whose refund already went through
    async fn repair(&self, booking_id: Uuid) -> AppResult<BookingRequest> {
        let attempts = self.policy.repair_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.bookings.complete_cancellation(booking_id).await {
                Ok(booking) => return Ok(booking),
                Err(e) if e.is_stale() => {
                    tracing::debug!(booking_id = %booking_id, attempt, "Repair raced, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        let err = last_error
            .unwrap_or_else(|| AppError::Internal("cancellation repair did not run".to_string()));
        tracing::error!(
            booking_id = %booking_id,
            "Cancellation still incomplete after {} attempts: {}",
            attempts,
            err
        );
        Err(err)
    }

    /// Bring a booking in line with its payment: a cancellation refund on a
    /// booking that is not cancelled completes the cancellation, and a
    /// cancelled booking still holding captured funds hands them to the owner.
    pub async fn reconcile(&self, booking_id: Uuid) -> AppResult<BookingRequest> {
        let booking = self.bookings.get(booking_id).await?;
        if booking.status == BookingStatus::Cancelled {
            if let Some(payment) = self.ledger.get_for_booking(booking_id).await? {
                if payment.escrow_status == EscrowStatus::Held
                    && payment.payment_status == PaymentStatus::Succeeded
                {
                    self.ledger.forfeit_to_owner(payment.id).await?;
                }
            }
            return Ok(booking);
        }
        if booking.status.is_terminal() {
            return Ok(booking);
        }
        match self.ledger.get_for_booking(booking_id).await? {
            Some(payment) if is_cancellation_refund(&payment) => {
                tracing::warn!(
                    booking_id = %booking_id,
                    status = %booking.status,
                    "Booking refunded for cancellation but not cancelled"
                );
                self.repair(booking_id).await
            }
            _ => Ok(booking),
        }
    }

    /// Settle a disputed payment (admin only)
    pub async fn resolve_dispute(
        &self,
        payment_id: Uuid,
        actor: Actor,
        decision: DisputeDecision,
    ) -> AppResult<Payment> {
        actor.require_admin()?;
        let payment = self.ledger.get(payment_id).await?;
        if payment.escrow_status != EscrowStatus::Disputed {
            return Err(AppError::NotEligible(format!(
                "escrow is {}, not disputed",
                payment.escrow_status
            )));
        }

        match decision {
            DisputeDecision::Release => {
                let released = self.ledger.release(payment_id, actor).await?;
                tracing::info!(payment_id = %payment_id, "Dispute resolved in owner's favor");
                Ok(released)
            }
            DisputeDecision::Refund {
                amount,
                reason,
                cancel_booking,
            } => {
                let reason = if cancel_booking {
                    format!("{}: {}", CANCELLATION_REFUND_PREFIX, reason)
                } else {
                    reason
                };
                let refunded = self
                    .ledger
                    .refund_disputed(payment_id, amount, &reason)
                    .await?;

                if cancel_booking {
                    let booking = self.bookings.get(refunded.booking_request_id).await?;
                    if !booking.status.is_terminal() {
                        match self
                            .bookings
                            .request_transition(
                                booking.id,
                                actor,
                                BookingStatus::Cancelled,
                                booking.version,
                            )
                            .await
                        {
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(
                                    booking_id = %booking.id,
                                    "Cancelling after dispute refund failed ({}), repairing",
                                    e
                                );
                                self.repair(booking.id).await?;
                            }
                        }
                    }
                }
                tracing::info!(
                    payment_id = %payment_id,
                    amount = %amount,
                    cancel_booking,
                    "Dispute resolved with refund"
                );
                Ok(refunded)
            }
        }
    }
}
