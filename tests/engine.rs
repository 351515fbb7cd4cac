//! End-to-end engine tests against the in-memory store

mod common;

use std::sync::{Arc, Mutex};

use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use chrono::Utc;
use common::{date, dec, test_config, Harness};
use rentwise_server::{
    config::RefundTier,
    error::AppError,
    models::{
        BookingStatus, BookingUpdate, ClaimReaction, ClaimStatus, DamageClaim, DisputeDecision,
        EscrowStatus, InspectionType, NotificationType, PaymentStatus, UpdateKind,
    },
    services::{change_feed::FeedStatus, processor::PaymentOutcome},
};

#[tokio::test]
async fn test_approve_when_available() {
    let h = Harness::new();
    let booking = h.request(3, 2, "120.00").await;

    let approved = assert_ok!(
        h.services
            .bookings
            .request_transition(booking.id, h.owner, BookingStatus::Approved, booking.version)
            .await
    );
    assert_eq!(approved.status, BookingStatus::Approved);
    assert_eq!(approved.version, booking.version + 1);
    assert!(h.notifier.received(h.renter.user_id, NotificationType::BookingConfirmed));
}

#[tokio::test]
async fn test_approve_when_unavailable_leaves_booking_pending() {
    let h = Harness::new();
    let booking = h.request(3, 2, "120.00").await;
    h.availability.set_available(false);

    let err = assert_err!(
        h.services
            .bookings
            .request_transition(booking.id, h.owner, BookingStatus::Approved, booking.version)
            .await
    );
    assert!(matches!(err, AppError::InvalidTransition { .. }));

    let current = h.booking(booking.id).await;
    assert_eq!(current.status, BookingStatus::Pending);
    assert_eq!(current.version, booking.version);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_moves_outside_the_table_are_rejected() {
    let h = Harness::new();
    let booking = h.request(3, 2, "120.00").await;
    let sm = &h.services.bookings;

    // No edge from pending to active or completed
    for target in [BookingStatus::Active, BookingStatus::Completed, BookingStatus::Pending] {
        let err = sm
            .request_transition(booking.id, h.owner, target, booking.version)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }), "{:?}", target);
    }

    // Edge exists, role does not hold it
    let err = sm
        .request_transition(booking.id, h.renter, BookingStatus::Approved, booking.version)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));

    // Right role, wrong person
    let stranger = rentwise_server::models::Actor::owner(Uuid::new_v4());
    let err = sm
        .request_transition(booking.id, stranger, BookingStatus::Approved, booking.version)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    let current = h.booking(booking.id).await;
    assert_eq!(current, booking);
}

#[tokio::test]
async fn test_terminal_states_accept_no_moves() {
    let h = Harness::new();
    let booking = h.request(3, 2, "120.00").await;
    let declined = h
        .services
        .bookings
        .request_transition(booking.id, h.owner, BookingStatus::Declined, booking.version)
        .await
        .unwrap();

    for (actor, target) in [
        (h.owner, BookingStatus::Approved),
        (h.renter, BookingStatus::Cancelled),
        (h.admin, BookingStatus::Cancelled),
    ] {
        let err = h
            .services
            .bookings
            .request_transition(booking.id, actor, target, declined.version)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }
}

#[tokio::test]
async fn test_concurrent_decisions_have_one_winner() {
    let h = Harness::new();
    let booking = h.request(3, 2, "120.00").await;
    let sm = &h.services.bookings;

    let (approve, decline) = tokio::join!(
        sm.request_transition(booking.id, h.owner, BookingStatus::Approved, booking.version),
        sm.request_transition(booking.id, h.owner, BookingStatus::Declined, booking.version),
    );

    let winners = [approve.is_ok(), decline.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(winners, 1);
    let loser = if approve.is_ok() { decline.unwrap_err() } else { approve.unwrap_err() };
    assert!(loser.is_stale());

    let current = h.booking(booking.id).await;
    assert_eq!(current.version, booking.version + 1);
}

#[tokio::test]
async fn test_open_escrow_splits_total() {
    let h = Harness::new();
    let booking = h.approved(3, 2, "120.00").await;

    let opened = h
        .services
        .escrow
        .open(booking.id, h.renter, Default::default())
        .await
        .unwrap();
    let amounts = opened.payment.amounts;
    assert_eq!(amounts.subtotal, dec("100.00"));
    assert_eq!(amounts.service_fee, dec("12.00"));
    assert_eq!(amounts.tax, dec("8.00"));
    assert_eq!(amounts.total_amount, dec("120.00"));
    assert_eq!(amounts.owner_payout_amount, dec("95.00"));
    assert_eq!(amounts.escrow_amount, dec("25.00"));
    assert!(amounts.is_balanced());
    assert_eq!(opened.payment.payment_status, PaymentStatus::Pending);
    assert_eq!(opened.payment.escrow_status, EscrowStatus::Held);
    assert!(!opened.client_secret.is_empty());

    // One payment per booking
    let err = h
        .services
        .escrow
        .open(booking.id, h.renter, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(h.processor.intents_created(), 1);
}

#[tokio::test]
async fn test_escrow_requires_approval() {
    let h = Harness::new();
    let booking = h.request(3, 2, "120.00").await;
    let err = h
        .services
        .escrow
        .open(booking.id, h.renter, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotEligible(_)));
}

#[tokio::test]
async fn test_confirm_notifies_both_parties() {
    let h = Harness::new();
    let (_, payment) = h.paid(3, 2, "120.00").await;
    assert_eq!(payment.payment_status, PaymentStatus::Succeeded);
    assert!(h.notifier.received(h.owner.user_id, NotificationType::PaymentReceived));
    assert!(h.notifier.received(h.renter.user_id, NotificationType::PaymentProcessed));

    // Confirming again changes nothing
    let again = h.services.escrow.confirm(payment.id, h.renter).await.unwrap();
    assert_eq!(again.version, payment.version);
}

#[tokio::test]
async fn test_declined_charge_marks_payment_failed() {
    let h = Harness::new();
    let booking = h.approved(3, 2, "120.00").await;
    let opened = h
        .services
        .escrow
        .open(booking.id, h.renter, Default::default())
        .await
        .unwrap();
    h.processor.set_outcome(PaymentOutcome::Declined {
        reason: "card_declined".to_string(),
    });

    let err = h
        .services
        .escrow
        .confirm(opened.payment.id, h.renter)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ProcessorFailure { may_have_acted: false, .. }));
    let payment = h.services.escrow.get(opened.payment.id).await.unwrap();
    assert_eq!(payment.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn test_rental_lifecycle_and_release() {
    let h = Harness::new();
    let (booking, payment) = h.paid(2, 3, "120.00").await;
    let sweeper = &h.services.sweeper;

    // Nothing due before the start date
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.activated, 0);

    h.clock.set_date(date("2026-06-03"));
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.activated, 1);
    assert_eq!(h.booking(booking.id).await.status, BookingStatus::Active);

    h.inspect(booking.id, InspectionType::Pickup).await;
    let err = h.services.escrow.release(payment.id, h.owner).await.unwrap_err();
    assert!(matches!(err, AppError::NotEligible(_)));

    h.inspect(booking.id, InspectionType::Return).await;
    // Both inspections but the rental has not ended
    assert!(!h.services.inspections.can_release(booking.id).await.unwrap());

    h.clock.set_date(date("2026-06-06"));
    let report = sweeper.run_once().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.booking(booking.id).await.status, BookingStatus::Completed);
    assert!(h.notifier.received(h.owner.user_id, NotificationType::BookingCompleted));
    assert!(h.services.inspections.can_release(booking.id).await.unwrap());

    let released = h.services.escrow.release(payment.id, h.owner).await.unwrap();
    assert_eq!(released.escrow_status, EscrowStatus::Released);

    // Second release is a no-op
    let again = h.services.escrow.release(payment.id, h.renter).await.unwrap();
    assert_eq!(again.version, released.version);
    assert!(h.processor.refunds().is_empty());

    let err = h
        .services
        .escrow
        .refund(payment.id, dec("10.00"), "late")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotEligible(_)));
}

#[tokio::test]
async fn test_owner_override_allows_early_release() {
    let h = Harness::new();
    let (booking, payment) = h.paid(0, 5, "120.00").await;
    h.services.sweeper.run_once().await.unwrap();
    h.inspect(booking.id, InspectionType::Pickup).await;
    h.inspect(booking.id, InspectionType::Return).await;

    let err = h
        .services
        .inspections
        .grant_release_override(booking.id, h.renter)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    h.services
        .inspections
        .grant_release_override(booking.id, h.owner)
        .await
        .unwrap();
    let released = h.services.escrow.release(payment.id, h.owner).await.unwrap();
    assert_eq!(released.escrow_status, EscrowStatus::Released);
}

#[tokio::test]
async fn test_sweeper_skips_unpaid_bookings() {
    let h = Harness::new();
    let booking = h.approved(0, 2, "80.00").await;
    let report = h.services.sweeper.run_once().await.unwrap();
    assert_eq!(report.activated, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.booking(booking.id).await.status, BookingStatus::Approved);
}

#[tokio::test]
async fn test_refunds_never_exceed_the_total() {
    let h = Harness::new();
    let (_, payment) = h.paid(5, 2, "120.00").await;
    let ledger = &h.services.escrow;

    let first = ledger.refund(payment.id, dec("20.00"), "missing strap").await.unwrap();
    assert_eq!(first.refund_amount, Some(dec("20.00")));
    assert_eq!(first.payment_status, PaymentStatus::Refunded);
    assert_eq!(first.escrow_status, EscrowStatus::Refunded);
    assert!(first.check_invariants().is_ok());

    let err = ledger
        .refund(payment.id, dec("100.01"), "too much")
        .await
        .unwrap_err();
    match err {
        AppError::ExceedsAvailable { requested, available } => {
            assert_eq!(requested, dec("100.01"));
            assert_eq!(available, dec("100.00"));
        }
        other => panic!("unexpected error {:?}", other),
    }

    let rest = ledger.refund(payment.id, dec("100.00"), "rest").await.unwrap();
    assert_eq!(rest.refund_amount, Some(dec("120.00")));
    assert!(rest.check_invariants().is_ok());

    let err = ledger.refund(payment.id, dec("0.01"), "again").await.unwrap_err();
    assert!(matches!(err, AppError::ExceedsAvailable { .. }));
    let err = ledger.refund(payment.id, dec("-5"), "negative").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let calls = h.processor.refunds();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0].idempotency_key, calls[1].idempotency_key);

    // Refunded escrow never goes to the owner
    let err = ledger.release(payment.id, h.admin).await.unwrap_err();
    assert!(matches!(err, AppError::NotEligible(_)));
}

#[tokio::test]
async fn test_renter_cancels_one_day_out_for_half_refund() {
    let h = Harness::new();
    let (booking, payment) = h.paid(1, 2, "120.00").await;

    let outcome = h
        .services
        .refunds
        .cancel(booking.id, h.renter, "plans changed", booking.version)
        .await
        .unwrap();
    assert_eq!(outcome.refund_fraction, dec("0.5"));
    assert_eq!(outcome.refund_amount, dec("60.00"));
    assert_eq!(outcome.booking.status, BookingStatus::Cancelled);

    let payment = h.services.escrow.get(payment.id).await.unwrap();
    assert_eq!(payment.refund_amount, Some(dec("60.00")));
    assert_eq!(payment.escrow_status, EscrowStatus::Refunded);
    assert!(payment
        .refund_reason
        .as_deref()
        .unwrap()
        .starts_with("cancellation"));

    assert_eq!(h.processor.refunds().len(), 1);
    assert!(h.notifier.received(h.owner.user_id, NotificationType::BookingCancelled));
    assert!(h.notifier.received(h.renter.user_id, NotificationType::RefundIssued));
}

#[tokio::test]
async fn test_early_renter_cancellation_refunds_everything() {
    let h = Harness::new();
    let (booking, _) = h.paid(8, 2, "120.00").await;
    let outcome = h
        .services
        .refunds
        .cancel(booking.id, h.renter, "found another", booking.version)
        .await
        .unwrap();
    assert_eq!(outcome.refund_amount, dec("120.00"));
}

#[tokio::test]
async fn test_owner_cancellation_refunds_everything() {
    let h = Harness::new();
    let (booking, _) = h.paid(1, 2, "120.00").await;
    let outcome = h
        .services
        .refunds
        .cancel(booking.id, h.owner, "equipment broke", booking.version)
        .await
        .unwrap();
    assert_eq!(outcome.refund_fraction, dec("1"));
    assert_eq!(outcome.refund_amount, dec("120.00"));
    assert!(h.notifier.received(h.renter.user_id, NotificationType::BookingCancelled));
}

#[tokio::test]
async fn test_cancel_unpaid_booking_cancels_payment() {
    let h = Harness::new();
    let booking = h.approved(3, 2, "120.00").await;
    h.services
        .escrow
        .open(booking.id, h.renter, Default::default())
        .await
        .unwrap();

    let outcome = h
        .services
        .refunds
        .cancel(booking.id, h.renter, "changed my mind", booking.version)
        .await
        .unwrap();
    assert_eq!(outcome.refund_amount, dec("0"));
    assert_eq!(
        outcome.payment.map(|p| p.payment_status),
        Some(PaymentStatus::Cancelled)
    );
    assert!(h.processor.refunds().is_empty());
}

#[tokio::test]
async fn test_cancel_after_start_is_rejected_without_refund() {
    let h = Harness::new();
    let (booking, _) = h.paid(0, 3, "120.00").await;
    let err = h
        .services
        .refunds
        .cancel(booking.id, h.renter, "too late", booking.version)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
    assert!(h.processor.refunds().is_empty());
}

#[tokio::test]
async fn test_failed_refund_leaves_booking_and_payment_untouched() {
    let h = Harness::new();
    let (booking, payment) = h.paid(8, 2, "120.00").await;
    h.processor.set_refund_error("card network unavailable");

    let err = h
        .services
        .refunds
        .cancel(booking.id, h.renter, "found another", booking.version)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::ProcessorFailure {
            may_have_acted: false,
            ..
        }
    ));

    let current = h.booking(booking.id).await;
    assert_eq!(current.status, BookingStatus::Approved);
    assert_eq!(current.version, booking.version);

    let after = h.services.escrow.get(payment.id).await.unwrap();
    assert_eq!(after.refund_amount, None);
    assert_eq!(after.payment_status, PaymentStatus::Succeeded);
    assert_eq!(after.escrow_status, EscrowStatus::Held);
    assert_eq!(after.version, payment.version);
    assert!(h.processor.refunds().is_empty());
}

fn tier(days: i64, fraction: &str) -> RefundTier {
    RefundTier {
        min_days_before_start: days,
        fraction: dec(fraction),
    }
}

#[tokio::test]
async fn test_cancellation_without_refund_releases_escrow_to_owner() {
    let mut config = test_config();
    config.refunds.schedule = vec![tier(7, "1"), tier(3, "0.5"), tier(0, "0")];
    let h = Harness::with_config(config);
    let (booking, payment) = h.paid(2, 2, "120.00").await;

    let outcome = h
        .services
        .refunds
        .cancel(booking.id, h.renter, "no longer needed", booking.version)
        .await
        .unwrap();
    assert_eq!(outcome.refund_fraction, dec("0"));
    assert_eq!(outcome.refund_amount, dec("0"));
    assert_eq!(outcome.booking.status, BookingStatus::Cancelled);
    assert_eq!(
        outcome.payment.map(|p| p.escrow_status),
        Some(EscrowStatus::Released)
    );

    let after = h.services.escrow.get(payment.id).await.unwrap();
    assert_eq!(after.escrow_status, EscrowStatus::Released);
    assert_eq!(after.payment_status, PaymentStatus::Succeeded);
    assert_eq!(after.refund_amount, None);
    assert!(h.processor.refunds().is_empty());

    // Settled escrow cannot be refunded afterwards
    let err = h
        .services
        .escrow
        .refund(payment.id, dec("10.00"), "late change of heart")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotEligible(_)));
}

#[tokio::test]
async fn test_cancel_is_blocked_while_escrow_is_disputed() {
    let h = Harness::new();
    let (booking, payment) = h.paid(10, 2, "120.00").await;
    let escalated = claim(booking.id, h.owner.user_id, ClaimStatus::Escalated);
    h.store.put_claim(escalated.clone()).await;
    assert_eq!(
        h.services.disputes.on_claim(escalated.id).await.unwrap(),
        ClaimReaction::EscrowFrozen
    );
    let frozen = h.services.escrow.get(payment.id).await.unwrap();

    let err = h
        .services
        .refunds
        .cancel(booking.id, h.renter, "going elsewhere", booking.version)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotEligible(_)));

    // Direct refunds wait for the dispute resolution too
    assert_err!(
        h.services
            .escrow
            .refund(payment.id, dec("50.00"), "goodwill")
            .await
    );

    let current = h.booking(booking.id).await;
    assert_eq!(current.status, BookingStatus::Approved);
    assert_eq!(current.version, booking.version);
    let after = h.services.escrow.get(payment.id).await.unwrap();
    assert_eq!(after.escrow_status, EscrowStatus::Disputed);
    assert_eq!(after.version, frozen.version);
    assert!(h.processor.refunds().is_empty());
}

#[tokio::test]
async fn test_reconcile_finishes_interrupted_cancellation() {
    let h = Harness::new();
    let (booking, payment) = h.paid(5, 2, "120.00").await;

    // Money moved but the booking write never happened
    h.services
        .escrow
        .refund(payment.id, dec("120.00"), "cancellation: renter moved away")
        .await
        .unwrap();
    assert_eq!(h.booking(booking.id).await.status, BookingStatus::Approved);

    let repaired = h.services.refunds.reconcile(booking.id).await.unwrap();
    assert_eq!(repaired.status, BookingStatus::Cancelled);

    let again = h.services.refunds.reconcile(booking.id).await.unwrap();
    assert_eq!(again.version, repaired.version);
}

#[tokio::test]
async fn test_reconcile_ignores_other_refunds() {
    let h = Harness::new();
    let (booking, payment) = h.paid(5, 2, "120.00").await;
    h.services
        .escrow
        .refund(payment.id, dec("10.00"), "goodwill")
        .await
        .unwrap();
    let current = h.services.refunds.reconcile(booking.id).await.unwrap();
    assert_eq!(current.status, BookingStatus::Approved);
}

fn claim(booking_id: Uuid, filed_by: Uuid, status: ClaimStatus) -> DamageClaim {
    DamageClaim {
        id: Uuid::new_v4(),
        booking_id,
        filed_by,
        damage_description: "Cracked housing".to_string(),
        estimated_cost: dec("45.00"),
        evidence_photos: vec![],
        status,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_dispute_freezes_and_admin_refunds() {
    let h = Harness::new();
    let (booking, payment) = h.paid(2, 2, "120.00").await;

    let pending = claim(booking.id, h.owner.user_id, ClaimStatus::Pending);
    h.store.put_claim(pending.clone()).await;
    assert_eq!(
        h.services.disputes.on_claim(pending.id).await.unwrap(),
        ClaimReaction::NoAction
    );

    let disputed = claim(booking.id, h.owner.user_id, ClaimStatus::Disputed);
    h.store.put_claim(disputed.clone()).await;
    assert_eq!(
        h.services.disputes.on_claim(disputed.id).await.unwrap(),
        ClaimReaction::EscrowFrozen
    );
    let frozen = h.services.escrow.get(payment.id).await.unwrap();
    assert_eq!(frozen.escrow_status, EscrowStatus::Disputed);

    // Processing the same claim again is harmless
    assert_eq!(
        h.services.disputes.on_claim(disputed.id).await.unwrap(),
        ClaimReaction::EscrowFrozen
    );

    let err = h.services.escrow.release(payment.id, h.owner).await.unwrap_err();
    assert!(matches!(err, AppError::NotEligible(_)));

    let decision = DisputeDecision::Refund {
        amount: dec("120.00"),
        reason: "damaged on arrival".to_string(),
        cancel_booking: true,
    };
    let err = h
        .services
        .refunds
        .resolve_dispute(payment.id, h.owner, decision.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    let refunded = h
        .services
        .refunds
        .resolve_dispute(payment.id, h.admin, decision)
        .await
        .unwrap();
    assert_eq!(refunded.escrow_status, EscrowStatus::Refunded);
    assert_eq!(refunded.refund_amount, Some(dec("120.00")));
    assert_eq!(h.booking(booking.id).await.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn test_claim_on_unpaid_booking() {
    let h = Harness::new();
    let booking = h.approved(2, 2, "120.00").await;
    let c = claim(booking.id, h.owner.user_id, ClaimStatus::Escalated);
    h.store.put_claim(c.clone()).await;
    assert_eq!(
        h.services.disputes.on_claim(c.id).await.unwrap(),
        ClaimReaction::NoPayment
    );
}

#[tokio::test]
async fn test_feed_delivers_to_interested_subscribers_only() {
    let h = Harness::new();
    let watched = h.request(3, 2, "120.00").await;
    let other = h.request(4, 2, "90.00").await;

    let seen: Arc<Mutex<Vec<BookingUpdate>>> = Arc::default();
    let sink = seen.clone();
    let handle = h
        .services
        .feed
        .subscribe([watched.id], move |u: &BookingUpdate| {
            sink.lock().unwrap().push(u.clone())
        })
        .await;
    assert_eq!(handle.status(), FeedStatus::Subscribed);

    h.services
        .bookings
        .request_transition(other.id, h.owner, BookingStatus::Approved, other.version)
        .await
        .unwrap();
    assert!(seen.lock().unwrap().is_empty());

    h.services
        .bookings
        .request_transition(watched.id, h.owner, BookingStatus::Approved, watched.version)
        .await
        .unwrap();
    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, UpdateKind::Booking);
        assert_eq!(seen[0].booking_id, watched.id);
        assert_eq!(seen[0].version, watched.version + 1);
    }

    assert_eq!(h.services.feed.channel_count(), 1);
    drop(handle);
    assert_eq!(h.services.feed.channel_count(), 0);
}
