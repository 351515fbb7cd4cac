//! Shared fixtures for the engine and API tests

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use uuid::Uuid;

use rentwise_server::{
    config::{
        AppConfig, AuthConfig, BookingPolicyConfig, DatabaseConfig, FeeConfig, LoggingConfig,
        ProcessorConfig, RealtimeConfig, RefundPolicyConfig, ServerConfig,
    },
    error::{AppError, AppResult},
    models::{
        Actor, BookingRequest, BookingStatus, ChecklistItem, CreateBooking, DateRange,
        InspectionPayload, InspectionType, NotificationType, Payment, RelatedEntity,
    },
    repository::{MemoryStore, Repository},
    services::{
        availability::AvailabilityProvider,
        change_feed::{ChangeSource, ChannelKey, FeedSink, NullChangeSource},
        clock::{Clock, FixedClock},
        notifications::Notifier,
        processor::{PaymentIntent, PaymentMetadata, PaymentOutcome, PaymentProcessor, RefundReceipt},
        Collaborators, Services,
    },
    AppState,
};

pub const JWT_SECRET: &str = "test-secret";

pub fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Refund call as seen by the processor
#[derive(Debug, Clone, PartialEq)]
pub struct RefundCall {
    pub payment_intent_id: String,
    pub amount: Decimal,
    pub idempotency_key: String,
}

/// Processor that accepts everything and records refunds, unless told
/// to reject refunds
pub struct FakeProcessor {
    outcome: Mutex<PaymentOutcome>,
    intents: AtomicUsize,
    refunds: Mutex<Vec<RefundCall>>,
    refund_failure: Mutex<Option<String>>,
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(PaymentOutcome::Succeeded),
            intents: AtomicUsize::new(0),
            refunds: Mutex::new(Vec::new()),
            refund_failure: Mutex::new(None),
        }
    }

    /// Every following refund fails before the processor moves money
    pub fn set_refund_error(&self, message: &str) {
        *self.refund_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_outcome(&self, outcome: PaymentOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn refunds(&self) -> Vec<RefundCall> {
        self.refunds.lock().unwrap().clone()
    }

    pub fn intents_created(&self) -> usize {
        self.intents.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_payment_intent(
        &self,
        _amount: Decimal,
        metadata: PaymentMetadata,
    ) -> AppResult<PaymentIntent> {
        self.intents.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentIntent {
            payment_intent_id: format!("pi_{}", metadata.payment_id.simple()),
            client_secret: format!("secret_{}", metadata.payment_id.simple()),
        })
    }

    async fn confirm_payment(&self, _payment_intent_id: &str) -> AppResult<PaymentOutcome> {
        Ok(self.outcome.lock().unwrap().clone())
    }

    async fn refund_payment_intent(
        &self,
        payment_intent_id: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> AppResult<RefundReceipt> {
        if let Some(message) = self.refund_failure.lock().unwrap().clone() {
            return Err(AppError::ProcessorFailure {
                message,
                may_have_acted: false,
            });
        }
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push(RefundCall {
            payment_intent_id: payment_intent_id.to_string(),
            amount,
            idempotency_key: idempotency_key.to_string(),
        });
        Ok(RefundReceipt {
            refund_id: format!("re_{}", refunds.len()),
            status: "succeeded".to_string(),
        })
    }
}

/// Every equipment belongs to one owner; availability is switchable
pub struct FakeAvailability {
    owner_id: Uuid,
    available: AtomicBool,
}

impl FakeAvailability {
    pub fn new(owner_id: Uuid) -> Self {
        Self {
            owner_id,
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl AvailabilityProvider for FakeAvailability {
    async fn check_availability(
        &self,
        _equipment_id: Uuid,
        _range: DateRange,
        _exclude_booking: Option<Uuid>,
    ) -> AppResult<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn equipment_owner(&self, _equipment_id: Uuid) -> AppResult<Uuid> {
        Ok(self.owner_id)
    }
}

/// Change stream that never comes up
pub struct FailingChangeSource;

#[async_trait]
impl ChangeSource for FailingChangeSource {
    async fn attach(&self, _key: &ChannelKey, _sink: FeedSink) -> AppResult<()> {
        Err(AppError::Internal("listener unavailable".to_string()))
    }

    fn detach(&self, _key: &ChannelKey) {}
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, NotificationType)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(Uuid, NotificationType)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn received(&self, user_id: Uuid, kind: NotificationType) -> bool {
        self.sent().contains(&(user_id, kind))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn emit(
        &self,
        user_id: Uuid,
        kind: NotificationType,
        _related: RelatedEntity,
    ) -> AppResult<()> {
        self.sent.lock().unwrap().push((user_id, kind));
        Ok(())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig::default(),
        database: DatabaseConfig::default(),
        auth: AuthConfig {
            jwt_secret: JWT_SECRET.to_string(),
        },
        logging: LoggingConfig::default(),
        fees: FeeConfig::default(),
        refunds: RefundPolicyConfig::default(),
        booking: BookingPolicyConfig {
            waive_return_inspection: false,
            sweep_interval_secs: 0,
        },
        processor: ProcessorConfig::default(),
        realtime: RealtimeConfig {
            enabled: false,
            subscribe_timeout_ms: 500,
            sse_buffer: 16,
        },
    }
}

/// Engine wired against in-memory collaborators, today is 2026-06-01
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub services: Services,
    pub config: AppConfig,
    pub processor: Arc<FakeProcessor>,
    pub availability: Arc<FakeAvailability>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FixedClock>,
    pub owner: Actor,
    pub renter: Actor,
    pub admin: Actor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_config(), Arc::new(NullChangeSource))
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self::with(config, Arc::new(NullChangeSource))
    }

    pub fn with(config: AppConfig, change_source: Arc<dyn ChangeSource>) -> Self {
        let owner = Actor::owner(Uuid::new_v4());
        let renter = Actor::renter(Uuid::new_v4());
        let admin = Actor::admin(Uuid::new_v4());

        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(FakeProcessor::new());
        let availability = Arc::new(FakeAvailability::new(owner.user_id));
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(FixedClock::on(date("2026-06-01")));

        let services = Services::new(
            Repository::in_memory(store.clone()),
            Collaborators {
                processor: processor.clone(),
                availability: availability.clone(),
                notifier: notifier.clone(),
                clock: clock.clone(),
                change_source,
            },
            &config,
        );

        Self {
            store,
            services,
            config,
            processor,
            availability,
            notifier,
            clock,
            owner,
            renter,
            admin,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            config: Arc::new(self.config.clone()),
            services: Arc::new(self.services.clone()),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Pending booking of `days` days starting `lead_days` from today
    pub async fn request(&self, lead_days: i64, days: i64, total: &str) -> BookingRequest {
        let start = self.today() + Duration::days(lead_days);
        self.services
            .bookings
            .create(
                self.renter,
                CreateBooking {
                    equipment_id: Uuid::new_v4(),
                    start_date: start,
                    end_date: start + Duration::days(days - 1),
                    total_amount: dec(total),
                    message: None,
                },
            )
            .await
            .unwrap()
    }

    pub async fn approved(&self, lead_days: i64, days: i64, total: &str) -> BookingRequest {
        let booking = self.request(lead_days, days, total).await;
        self.services
            .bookings
            .request_transition(booking.id, self.owner, BookingStatus::Approved, booking.version)
            .await
            .unwrap()
    }

    /// Approved booking with a captured payment held in escrow
    pub async fn paid(&self, lead_days: i64, days: i64, total: &str) -> (BookingRequest, Payment) {
        let booking = self.approved(lead_days, days, total).await;
        let opened = self
            .services
            .escrow
            .open(booking.id, self.renter, Default::default())
            .await
            .unwrap();
        let payment = self
            .services
            .escrow
            .confirm(opened.payment.id, self.renter)
            .await
            .unwrap();
        (booking, payment)
    }

    pub async fn inspect(&self, booking_id: Uuid, kind: InspectionType) {
        self.services
            .inspections
            .record_inspection(
                booking_id,
                self.owner,
                InspectionPayload {
                    inspection_type: kind,
                    photos: vec![format!("https://cdn.example.com/{}.jpg", kind)],
                    checklist_items: vec![ChecklistItem {
                        label: "Powers on".to_string(),
                        ok: true,
                        note: None,
                    }],
                },
            )
            .await
            .unwrap();
    }

    pub async fn booking(&self, id: Uuid) -> BookingRequest {
        self.services.bookings.get(id).await.unwrap()
    }
}
