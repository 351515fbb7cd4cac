//! Escrow ledger
//!
//! Owns the payment record of a booking: the fee split computed once when
//! escrow opens, the charge status at the processor, and where the held
//! funds went (owner, renter, or frozen by a dispute).

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use super::{
    change_feed::ChangeFeedMultiplexer,
    inspections::InspectionGate,
    notifications::{notify_all, Notifier},
    processor::{refund_idempotency_key, PaymentMetadata, PaymentOutcome, PaymentProcessor},
};
use crate::{
    config::FeeConfig,
    error::{AppError, AppResult},
    models::{
        payment::OpenedEscrow, Actor, ActorRole, BookingStatus, BookingUpdate, ChangeEvent,
        EscrowStatus, FeeBreakdown, NotificationType, OpenEscrow, Payment, PaymentStatus,
        RelatedEntity,
    },
    repository::Repository,
};

/// Attempts to record a refund the processor already executed
const RECORD_REFUND_ATTEMPTS: usize = 3;

pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Split a booking total into its components.
///
/// The total already contains fee, tax and insurance; the subtotal is derived
/// from it and tax absorbs rounding so the parts always sum to the total.
pub fn split_total(
    total: Decimal,
    include_insurance: bool,
    fees: &FeeConfig,
) -> AppResult<FeeBreakdown> {
    let insurance_amount = if include_insurance {
        fees.insurance_flat
    } else {
        Decimal::ZERO
    };
    if total <= insurance_amount {
        return Err(AppError::Validation(format!(
            "total {} does not cover insurance {}",
            total, insurance_amount
        )));
    }

    let base = total - insurance_amount;
    let subtotal = round2(base / (Decimal::ONE + fees.service_fee_rate + fees.tax_rate));
    let mut service_fee = round2(subtotal * fees.service_fee_rate);
    let mut tax = base - subtotal - service_fee;
    if tax < Decimal::ZERO {
        // Only reachable with a zero tax rate and a cent of rounding
        service_fee += tax;
        tax = Decimal::ZERO;
    }

    let commission = round2(subtotal * fees.owner_commission_rate);
    let owner_payout_amount = subtotal - commission;

    let breakdown = FeeBreakdown {
        subtotal,
        service_fee,
        tax,
        insurance_amount,
        deposit_amount: fees.deposit_flat,
        total_amount: total,
        escrow_amount: total - owner_payout_amount,
        owner_payout_amount,
    };
    debug_assert!(breakdown.is_balanced());
    Ok(breakdown)
}

#[derive(Clone)]
pub struct EscrowLedger {
    repository: Repository,
    processor: Arc<dyn PaymentProcessor>,
    gate: InspectionGate,
    notifier: Arc<dyn Notifier>,
    feed: ChangeFeedMultiplexer,
    fees: FeeConfig,
}

impl EscrowLedger {
    pub fn new(
        repository: Repository,
        processor: Arc<dyn PaymentProcessor>,
        gate: InspectionGate,
        notifier: Arc<dyn Notifier>,
        feed: ChangeFeedMultiplexer,
        fees: FeeConfig,
    ) -> Self {
        Self {
            repository,
            processor,
            gate,
            notifier,
            feed,
            fees,
        }
    }

    pub async fn get(&self, payment_id: Uuid) -> AppResult<Payment> {
        self.repository.payments.get(payment_id).await
    }

    pub async fn get_for_booking(&self, booking_id: Uuid) -> AppResult<Option<Payment>> {
        self.repository.payments.find_by_booking(booking_id).await
    }

    /// Open escrow for an approved booking and create the processor intent
    pub async fn open(
        &self,
        booking_id: Uuid,
        actor: Actor,
        request: OpenEscrow,
    ) -> AppResult<OpenedEscrow> {
        let booking = self.repository.bookings.get(booking_id).await?;
        if actor.role != ActorRole::Renter || actor.user_id != booking.renter_id {
            return Err(AppError::Unauthorized(
                "Only the booking's renter can pay for it".to_string(),
            ));
        }
        if booking.status != BookingStatus::Approved {
            return Err(AppError::NotEligible(format!(
                "escrow can only be opened for an approved booking, booking is {}",
                booking.status
            )));
        }
        if self
            .repository
            .payments
            .find_by_booking(booking_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "Booking {} already has a payment",
                booking_id
            )));
        }

        let amounts = split_total(booking.total_amount, request.include_insurance, &self.fees)?;
        let payment_id = Uuid::new_v4();
        let intent = self
            .processor
            .create_payment_intent(
                amounts.total_amount,
                PaymentMetadata {
                    booking_id,
                    payment_id,
                    renter_id: booking.renter_id,
                    owner_id: booking.owner_id,
                    currency: self.fees.currency.clone(),
                },
            )
            .await?;

        let now = Utc::now();
        let payment = Payment {
            id: payment_id,
            booking_request_id: booking_id,
            renter_id: booking.renter_id,
            owner_id: booking.owner_id,
            amounts,
            payment_status: PaymentStatus::Pending,
            escrow_status: EscrowStatus::Held,
            refund_amount: None,
            refund_reason: None,
            stripe_payment_intent_id: Some(intent.payment_intent_id.clone()),
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let payment = match self.repository.payments.insert(&payment).await {
            Ok(payment) => payment,
            Err(e) => {
                tracing::warn!(
                    booking_id = %booking_id,
                    payment_intent_id = %intent.payment_intent_id,
                    "Payment intent created but not recorded: {}",
                    e
                );
                return Err(e);
            }
        };

        tracing::info!(
            booking_id = %booking_id,
            payment_id = %payment.id,
            total = %payment.amounts.total_amount,
            escrow = %payment.amounts.escrow_amount,
            owner_payout = %payment.amounts.owner_payout_amount,
            "Escrow opened"
        );
        self.feed
            .publish(BookingUpdate::payment(&payment, ChangeEvent::Insert));

        Ok(OpenedEscrow {
            payment,
            client_secret: intent.client_secret,
        })
    }

    /// Ask the processor for the charge outcome and record it
    pub async fn confirm(&self, payment_id: Uuid, actor: Actor) -> AppResult<Payment> {
        let payment = self.repository.payments.get(payment_id).await?;
        let allowed = match actor.role {
            ActorRole::Renter => actor.user_id == payment.renter_id,
            ActorRole::Admin | ActorRole::System => true,
            ActorRole::Owner => false,
        };
        if !allowed {
            return Err(AppError::Unauthorized(
                "Only the paying renter can confirm this payment".to_string(),
            ));
        }

        match payment.payment_status {
            PaymentStatus::Succeeded => return Ok(payment),
            PaymentStatus::Pending | PaymentStatus::Processing => {}
            other => {
                return Err(AppError::invalid_transition(
                    other,
                    PaymentStatus::Succeeded,
                    "payment is no longer awaiting confirmation",
                ))
            }
        }

        let intent_id = payment.stripe_payment_intent_id.clone().ok_or_else(|| {
            AppError::DataCorruption(format!("payment {} has no payment intent", payment.id))
        })?;

        let outcome = self.processor.confirm_payment(&intent_id).await?;
        let mut next = payment.clone();
        next.payment_status = match &outcome {
            PaymentOutcome::Succeeded => PaymentStatus::Succeeded,
            PaymentOutcome::Processing => PaymentStatus::Processing,
            PaymentOutcome::Declined { .. } => PaymentStatus::Failed,
        };
        if next.payment_status == payment.payment_status {
            return Ok(payment);
        }

        let updated = self.repository.payments.update(&next, payment.version).await?;
        self.feed
            .publish(BookingUpdate::payment(&updated, ChangeEvent::Update));

        match outcome {
            PaymentOutcome::Succeeded => {
                tracing::info!(payment_id = %payment_id, "Payment succeeded");
                let related = RelatedEntity::Payment(updated.id);
                notify_all(
                    self.notifier.as_ref(),
                    &[updated.owner_id],
                    NotificationType::PaymentReceived,
                    related,
                )
                .await;
                notify_all(
                    self.notifier.as_ref(),
                    &[updated.renter_id],
                    NotificationType::PaymentProcessed,
                    related,
                )
                .await;
                Ok(updated)
            }
            PaymentOutcome::Processing => {
                tracing::info!(payment_id = %payment_id, "Payment still processing");
                Ok(updated)
            }
            PaymentOutcome::Declined { reason } => {
                tracing::warn!(payment_id = %payment_id, "Payment declined: {}", reason);
                Err(AppError::ProcessorFailure {
                    message: reason,
                    may_have_acted: false,
                })
            }
        }
    }

    /// Release held funds to the owner once the inspection gate allows it
    pub async fn release(&self, payment_id: Uuid, actor: Actor) -> AppResult<Payment> {
        let payment = self.repository.payments.get(payment_id).await?;
        let is_party = actor.user_id == payment.owner_id || actor.user_id == payment.renter_id;
        if !(actor.is_admin() || actor.role == ActorRole::System || is_party) {
            return Err(AppError::Unauthorized(
                "Not allowed to release this escrow".to_string(),
            ));
        }

        match payment.escrow_status {
            EscrowStatus::Released => return Ok(payment),
            EscrowStatus::Refunded => {
                return Err(AppError::NotEligible("escrow was refunded".to_string()))
            }
            EscrowStatus::Disputed if !actor.is_admin() => {
                return Err(AppError::NotEligible(
                    "escrow is disputed and can only be released by an admin".to_string(),
                ))
            }
            EscrowStatus::Disputed | EscrowStatus::Held => {}
        }
        if payment.payment_status != PaymentStatus::Succeeded {
            return Err(AppError::NotEligible(format!(
                "payment is {}, nothing to release",
                payment.payment_status
            )));
        }
        if !self.gate.can_release(payment.booking_request_id).await? {
            return Err(AppError::NotEligible(
                "inspections or rental dates do not allow release yet".to_string(),
            ));
        }

        let mut next = payment.clone();
        next.escrow_status = EscrowStatus::Released;
        let updated = match self.repository.payments.update(&next, payment.version).await {
            Ok(updated) => updated,
            Err(e) if e.is_stale() => {
                // Lost to a concurrent release: same outcome
                let current = self.repository.payments.get(payment_id).await?;
                if current.escrow_status == EscrowStatus::Released {
                    return Ok(current);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            payment_id = %payment_id,
            owner_payout = %updated.amounts.owner_payout_amount,
            "Escrow released"
        );
        self.feed
            .publish(BookingUpdate::payment(&updated, ChangeEvent::Update));
        Ok(updated)
    }

    /// Refund part or all of a captured payment to the renter.
    /// Disputed escrow stays frozen; see [`EscrowLedger::refund_disputed`].
    pub async fn refund(
        &self,
        payment_id: Uuid,
        amount: Decimal,
        reason: &str,
    ) -> AppResult<Payment> {
        self.refund_with(payment_id, amount, reason, false).await
    }

    /// Refund out of disputed escrow as the resolution of the dispute
    pub(crate) async fn refund_disputed(
        &self,
        payment_id: Uuid,
        amount: Decimal,
        reason: &str,
    ) -> AppResult<Payment> {
        self.refund_with(payment_id, amount, reason, true).await
    }

    async fn refund_with(
        &self,
        payment_id: Uuid,
        amount: Decimal,
        reason: &str,
        resolves_dispute: bool,
    ) -> AppResult<Payment> {
        if amount <= Decimal::ZERO || amount.scale() > 2 {
            return Err(AppError::Validation(format!(
                "refund amount {} must be positive with at most two decimals",
                amount
            )));
        }

        let payment = self.repository.payments.get(payment_id).await?;
        match payment.escrow_status {
            EscrowStatus::Released => {
                return Err(AppError::NotEligible(
                    "escrow was already released to the owner".to_string(),
                ))
            }
            EscrowStatus::Disputed if !resolves_dispute => {
                return Err(AppError::NotEligible(
                    "escrow is frozen by a dispute, resolve it first".to_string(),
                ))
            }
            EscrowStatus::Held | EscrowStatus::Disputed | EscrowStatus::Refunded => {}
        }
        if !payment.payment_status.is_captured() {
            return Err(AppError::NotEligible(format!(
                "payment is {}, nothing was captured",
                payment.payment_status
            )));
        }
        let available = payment.refundable();
        if amount > available {
            return Err(AppError::ExceedsAvailable {
                requested: amount,
                available,
            });
        }

        let intent_id = payment.stripe_payment_intent_id.clone().ok_or_else(|| {
            AppError::DataCorruption(format!("payment {} has no payment intent", payment.id))
        })?;
        let key = refund_idempotency_key(payment.id, payment.refunded_so_far(), amount);
        let receipt = self
            .processor
            .refund_payment_intent(&intent_id, amount, &key)
            .await?;

        let updated = self.record_refund(payment, amount, reason).await?;
        tracing::info!(
            payment_id = %payment_id,
            refund_id = %receipt.refund_id,
            amount = %amount,
            refunded_total = %updated.refunded_so_far(),
            "Refund issued"
        );
        self.feed
            .publish(BookingUpdate::payment(&updated, ChangeEvent::Update));
        notify_all(
            self.notifier.as_ref(),
            &[updated.renter_id],
            NotificationType::RefundIssued,
            RelatedEntity::Payment(updated.id),
        )
        .await;
        Ok(updated)
    }

    /// Persist a refund the processor already executed. A concurrent write
    /// does not undo the money movement, so the record is re-read and the
    /// refund applied again on the fresh version.
    async fn record_refund(
        &self,
        mut payment: Payment,
        amount: Decimal,
        reason: &str,
    ) -> AppResult<Payment> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut next = payment.clone();
            next.payment_status = PaymentStatus::Refunded;
            next.escrow_status = EscrowStatus::Refunded;
            next.refund_amount = Some(payment.refunded_so_far() + amount);
            next.refund_reason = Some(reason.to_string());

            match self.repository.payments.update(&next, payment.version).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_stale() && attempt < RECORD_REFUND_ATTEMPTS => {
                    tracing::warn!(
                        payment_id = %payment.id,
                        attempt,
                        "Refund record lost a race, retrying on fresh state"
                    );
                    payment = self.repository.payments.get(payment.id).await?;
                }
                Err(e) => {
                    tracing::error!(
                        alert = true,
                        payment_id = %payment.id,
                        amount = %amount,
                        "Processor refunded but the ledger could not record it: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Freeze held funds while a damage claim is open
    pub async fn mark_disputed(&self, payment_id: Uuid) -> AppResult<Payment> {
        let payment = self.repository.payments.get(payment_id).await?;
        match payment.escrow_status {
            EscrowStatus::Disputed => return Ok(payment),
            EscrowStatus::Held => {}
            other => {
                return Err(AppError::invalid_transition(
                    other,
                    EscrowStatus::Disputed,
                    "only held escrow can be disputed",
                ))
            }
        }

        let mut next = payment.clone();
        next.escrow_status = EscrowStatus::Disputed;
        let updated = self.repository.payments.update(&next, payment.version).await?;
        tracing::info!(payment_id = %payment_id, "Escrow frozen by dispute");
        self.feed
            .publish(BookingUpdate::payment(&updated, ChangeEvent::Update));
        Ok(updated)
    }

    /// Hand held funds to the owner after a cancellation that refunded
    /// nothing. The rental never happens, so the inspection gate is skipped.
    pub(crate) async fn forfeit_to_owner(&self, payment_id: Uuid) -> AppResult<Payment> {
        let payment = self.repository.payments.get(payment_id).await?;
        match payment.escrow_status {
            EscrowStatus::Released => return Ok(payment),
            EscrowStatus::Held => {}
            other => {
                return Err(AppError::invalid_transition(
                    other,
                    EscrowStatus::Released,
                    "only held escrow can be kept by the owner",
                ))
            }
        }
        if payment.payment_status != PaymentStatus::Succeeded {
            return Err(AppError::NotEligible(format!(
                "payment is {}, nothing to keep",
                payment.payment_status
            )));
        }
        let booking = self
            .repository
            .bookings
            .get(payment.booking_request_id)
            .await?;
        if booking.status != BookingStatus::Cancelled {
            return Err(AppError::NotEligible(format!(
                "booking is {}, only cancelled bookings forfeit escrow",
                booking.status
            )));
        }

        let mut next = payment.clone();
        next.escrow_status = EscrowStatus::Released;
        let updated = match self.repository.payments.update(&next, payment.version).await {
            Ok(updated) => updated,
            Err(e) if e.is_stale() => {
                let current = self.repository.payments.get(payment_id).await?;
                if current.escrow_status == EscrowStatus::Released {
                    return Ok(current);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            payment_id = %payment_id,
            booking_id = %booking.id,
            kept = %updated.amounts.total_amount,
            "Cancellation refunded nothing, escrow released to owner"
        );
        self.feed
            .publish(BookingUpdate::payment(&updated, ChangeEvent::Update));
        notify_all(
            self.notifier.as_ref(),
            &[updated.owner_id],
            NotificationType::PaymentReceived,
            RelatedEntity::Payment(updated.id),
        )
        .await;
        Ok(updated)
    }

    /// Mark a payment that never captured as cancelled
    pub async fn cancel_unpaid(&self, payment_id: Uuid) -> AppResult<Payment> {
        let payment = self.repository.payments.get(payment_id).await?;
        if !matches!(
            payment.payment_status,
            PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Failed
        ) {
            return Ok(payment);
        }

        let mut next = payment.clone();
        next.payment_status = PaymentStatus::Cancelled;
        let updated = self.repository.payments.update(&next, payment.version).await?;
        tracing::info!(payment_id = %payment_id, "Unpaid payment cancelled");
        self.feed
            .publish(BookingUpdate::payment(&updated, ChangeEvent::Update));
        Ok(updated)
    }
}
