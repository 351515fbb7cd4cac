//! Business logic services

pub mod availability;
pub mod bookings;
pub mod change_feed;
pub mod clock;
pub mod disputes;
pub mod escrow;
pub mod inspections;
pub mod notifications;
pub mod pg_listener;
pub mod processor;
pub mod refunds;
pub mod sweeper;

use std::{sync::Arc, time::Duration};

use crate::{config::AppConfig, repository::Repository};

use self::{
    availability::AvailabilityProvider, change_feed::ChangeSource, clock::Clock,
    notifications::Notifier, processor::PaymentProcessor,
};

/// External systems the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub processor: Arc<dyn PaymentProcessor>,
    pub availability: Arc<dyn AvailabilityProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub change_source: Arc<dyn ChangeSource>,
}

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub bookings: bookings::BookingStateMachine,
    pub escrow: escrow::EscrowLedger,
    pub inspections: inspections::InspectionGate,
    pub refunds: refunds::RefundOrchestrator,
    pub disputes: disputes::DisputeCoordinator,
    pub sweeper: sweeper::LifecycleSweeper,
    pub feed: change_feed::ChangeFeedMultiplexer,
}

impl Services {
    /// Wire every component against the given repository and collaborators
    pub fn new(repository: Repository, collaborators: Collaborators, config: &AppConfig) -> Self {
        let Collaborators {
            processor,
            availability,
            notifier,
            clock,
            change_source,
        } = collaborators;

        let feed = change_feed::ChangeFeedMultiplexer::new(
            change_source,
            Duration::from_millis(config.realtime.subscribe_timeout_ms),
        );
        let bookings = bookings::BookingStateMachine::new(
            repository.clone(),
            availability,
            notifier.clone(),
            clock.clone(),
            feed.clone(),
            config.booking.clone(),
        );
        let inspections =
            inspections::InspectionGate::new(repository.clone(), clock.clone(), feed.clone());
        let escrow = escrow::EscrowLedger::new(
            repository.clone(),
            processor,
            inspections.clone(),
            notifier,
            feed.clone(),
            config.fees.clone(),
        );
        let refunds = refunds::RefundOrchestrator::new(
            bookings.clone(),
            escrow.clone(),
            clock.clone(),
            config.refunds.clone(),
        );
        let disputes = disputes::DisputeCoordinator::new(repository.clone(), escrow.clone());
        let sweeper = sweeper::LifecycleSweeper::new(repository, bookings.clone(), clock);

        Self {
            bookings,
            escrow,
            inspections,
            refunds,
            disputes,
            sweeper,
            feed,
        }
    }
}
