//! Background job driving time-based transitions

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;

use super::{bookings::BookingStateMachine, clock::Clock};
use crate::{
    error::{AppError, AppResult},
    models::{Actor, BookingRequest, BookingStatus},
    repository::Repository,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub activated: usize,
    pub completed: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct LifecycleSweeper {
    repository: Repository,
    bookings: BookingStateMachine,
    clock: Arc<dyn Clock>,
}

impl LifecycleSweeper {
    pub fn new(repository: Repository, bookings: BookingStateMachine, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            bookings,
            clock,
        }
    }

    /// Run one pass over due bookings
    pub async fn run_once(&self) -> AppResult<SweepReport> {
        let today = self.clock.today();
        let mut report = SweepReport::default();

        for booking in self.repository.bookings.list_due_for_activation(today).await? {
            if self.advance(&booking, BookingStatus::Active).await {
                report.activated += 1;
            } else {
                report.skipped += 1;
            }
        }
        for booking in self.repository.bookings.list_due_for_completion(today).await? {
            if self.advance(&booking, BookingStatus::Completed).await {
                report.completed += 1;
            } else {
                report.skipped += 1;
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                activated = report.activated,
                completed = report.completed,
                skipped = report.skipped,
                "Lifecycle sweep finished"
            );
        }
        Ok(report)
    }

    async fn advance(&self, booking: &BookingRequest, target: BookingStatus) -> bool {
        match self
            .bookings
            .request_transition(booking.id, Actor::system(), target, booking.version)
            .await
        {
            Ok(_) => true,
            Err(AppError::InvalidTransition { reason, .. }) => {
                tracing::debug!(booking_id = %booking.id, to = %target, "Not yet: {}", reason);
                false
            }
            Err(e) if e.is_stale() => {
                tracing::debug!(booking_id = %booking.id, "Changed during sweep, skipped");
                false
            }
            Err(e) => {
                tracing::warn!(booking_id = %booking.id, to = %target, "Sweep transition failed: {}", e);
                false
            }
        }
    }

    /// Spawn the periodic sweep
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::error!("Lifecycle sweep failed: {}", e);
                }
            }
        })
    }
}
