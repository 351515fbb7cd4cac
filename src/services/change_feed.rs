//! Change feed multiplexer
//!
//! Subscribers register interest in a set of booking IDs. Every distinct set
//! maps to one channel (keyed by a hash of the sorted IDs) shared by all
//! subscribers asking for the same set. Updates reach a subscriber only when
//! its channel's set contains the update's booking.
//!
//! Delivery is at-least-once: a record may be delivered again after a
//! reconnect, so subscribers should treat an update as a signal to refetch.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, RwLock, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{BookingUpdate, ChangeEvent, RawChange, UpdateKind},
};

pub type UpdateCallback = Arc<dyn Fn(&BookingUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Idle,
    Subscribing,
    Subscribed,
    Error,
}

/// Stable identifier of a channel, derived from the sorted ID set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn for_ids(ids: &BTreeSet<Uuid>) -> Self {
        let mut hasher = Sha256::new();
        for id in ids {
            hasher.update(id.as_bytes());
        }
        Self(format!("bookings-{}", hex::encode(&hasher.finalize()[..12])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle given to a change source to push events back into the feed.
/// Holds no strong reference, so a dropped feed stops accepting events.
#[derive(Clone)]
pub struct FeedSink {
    inner: Weak<Inner>,
}

impl FeedSink {
    pub fn ingest(&self, raw: RawChange) -> usize {
        match self.inner.upgrade() {
            Some(inner) => ChangeFeedMultiplexer { inner }.ingest(raw),
            None => 0,
        }
    }

    /// Report a broken stream; every live channel moves to `Error`
    pub fn fail(&self, reason: &str) {
        if let Some(inner) = self.inner.upgrade() {
            ChangeFeedMultiplexer { inner }.fail_all(reason);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

/// External event stream feeding the multiplexer
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Make sure events for this channel are flowing
    async fn attach(&self, key: &ChannelKey, sink: FeedSink) -> AppResult<()>;

    /// The channel has no subscribers left
    fn detach(&self, key: &ChannelKey);
}

/// Source for deployments without an external stream; only local publishes
/// reach subscribers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullChangeSource;

#[async_trait]
impl ChangeSource for NullChangeSource {
    async fn attach(&self, _key: &ChannelKey, _sink: FeedSink) -> AppResult<()> {
        Ok(())
    }

    fn detach(&self, _key: &ChannelKey) {}
}

struct Subscriber {
    callback: RwLock<UpdateCallback>,
    closed: AtomicBool,
}

impl Subscriber {
    fn deliver(&self, update: &BookingUpdate) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        // Resolve the latest closure at call time
        let callback = self
            .callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        callback(update);
        true
    }
}

struct Channel {
    members: HashSet<Uuid>,
    subscribers: Vec<Arc<Subscriber>>,
    status: FeedStatus,
    last_error: Option<String>,
    /// Attach attempt this channel is waiting on
    generation: u64,
    status_tx: watch::Sender<FeedStatus>,
}

impl Channel {
    fn set_status(&mut self, status: FeedStatus) {
        self.status = status;
        self.status_tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }
}

#[derive(Default)]
struct Registry {
    channels: HashMap<ChannelKey, Channel>,
    /// Last dispatched version per record, with the booking it belongs to
    last_versions: HashMap<(UpdateKind, Uuid), (Uuid, i64)>,
}

struct Inner {
    registry: Mutex<Registry>,
    source: Arc<dyn ChangeSource>,
    attach_timeout: Duration,
    next_generation: AtomicU64,
}

#[derive(Clone)]
pub struct ChangeFeedMultiplexer {
    inner: Arc<Inner>,
}

impl ChangeFeedMultiplexer {
    pub fn new(source: Arc<dyn ChangeSource>, attach_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                source,
                attach_timeout,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Feed that only carries local publishes
    pub fn local() -> Self {
        Self::new(Arc::new(NullChangeSource), Duration::from_secs(5))
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn subscribe<F>(
        &self,
        ids: impl IntoIterator<Item = Uuid>,
        on_update: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&BookingUpdate) + Send + Sync + 'static,
    {
        let subscriber = Arc::new(Subscriber {
            callback: RwLock::new(Arc::new(on_update)),
            closed: AtomicBool::new(false),
        });
        let key = self.join(ids.into_iter().collect(), subscriber.clone());
        let handle = SubscriptionHandle {
            feed: self.clone(),
            subscriber,
            key,
        };
        self.ensure_attached(&handle.key).await;
        handle
    }

    /// Deliver an update produced by this process
    pub fn publish(&self, update: BookingUpdate) -> usize {
        self.dispatch(update)
    }

    /// Deliver a change received from the external store
    pub fn ingest(&self, raw: RawChange) -> usize {
        match BookingUpdate::from_raw(raw) {
            Ok(update) => self.dispatch(update),
            Err(e) => {
                tracing::error!(alert = true, "Dropping change event: {}", e);
                0
            }
        }
    }

    /// Mark every live channel as failed; callers decide when to resubscribe
    pub fn fail_all(&self, reason: &str) {
        let mut registry = self.registry();
        for (key, channel) in registry.channels.iter_mut() {
            if matches!(channel.status, FeedStatus::Subscribed | FeedStatus::Subscribing) {
                tracing::warn!(channel = %key, "Change feed failed: {}", reason);
                channel.last_error = Some(reason.to_string());
                channel.set_status(FeedStatus::Error);
            }
        }
    }

    pub fn channel_count(&self) -> usize {
        self.registry().channels.len()
    }

    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.registry()
            .channels
            .get(key)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    fn join(&self, ids: BTreeSet<Uuid>, subscriber: Arc<Subscriber>) -> ChannelKey {
        let key = ChannelKey::for_ids(&ids);
        let mut registry = self.registry();
        let channel = registry
            .channels
            .entry(key.clone())
            .or_insert_with(|| Channel {
                members: ids.into_iter().collect(),
                subscribers: Vec::new(),
                status: FeedStatus::Idle,
                last_error: None,
                generation: 0,
                status_tx: watch::channel(FeedStatus::Idle).0,
            });
        channel.subscribers.push(subscriber);
        key
    }

    fn leave(&self, subscriber: &Arc<Subscriber>, key: &ChannelKey) {
        let emptied = {
            let mut registry = self.registry();
            let emptied = match registry.channels.get_mut(key) {
                Some(channel) => {
                    channel.subscribers.retain(|s| !Arc::ptr_eq(s, subscriber));
                    channel.subscribers.is_empty()
                }
                None => false,
            };
            if emptied {
                registry.channels.remove(key);
                let Registry {
                    channels,
                    last_versions,
                } = &mut *registry;
                last_versions.retain(|_, (booking_id, _)| {
                    channels.values().any(|c| c.members.contains(booking_id))
                });
            }
            emptied
        };

        if emptied {
            tracing::debug!(channel = %key, "Channel closed");
            self.inner.source.detach(key);
        }
    }

    /// Attach the channel unless it is already live or attaching
    async fn ensure_attached(&self, key: &ChannelKey) -> FeedStatus {
        let generation = {
            let mut registry = self.registry();
            let Some(channel) = registry.channels.get_mut(key) else {
                return FeedStatus::Idle;
            };
            if matches!(channel.status, FeedStatus::Subscribed | FeedStatus::Subscribing) {
                return channel.status;
            }
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
            channel.last_error = None;
            channel.set_status(FeedStatus::Subscribing);
            channel.generation = generation;
            generation
        };

        let sink = FeedSink {
            inner: Arc::downgrade(&self.inner),
        };
        let attach = self.inner.source.attach(key, sink);
        let result = match tokio::time::timeout(self.inner.attach_timeout, attach).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "attach timed out after {} ms",
                self.inner.attach_timeout.as_millis()
            )),
        };

        let mut registry = self.registry();
        let Some(channel) = registry.channels.get_mut(key) else {
            tracing::debug!(channel = %key, "Attach finished after close, ignored");
            return FeedStatus::Idle;
        };
        if channel.generation != generation {
            tracing::debug!(channel = %key, "Superseded attach result ignored");
            return channel.status;
        }

        match result {
            Ok(()) => {
                tracing::debug!(channel = %key, members = channel.members.len(), "Channel subscribed");
                channel.set_status(FeedStatus::Subscribed);
            }
            Err(reason) => {
                tracing::warn!(channel = %key, "Channel attach failed: {}", reason);
                channel.last_error = Some(reason);
                channel.set_status(FeedStatus::Error);
            }
        }
        channel.status
    }

    fn dispatch(&self, update: BookingUpdate) -> usize {
        let targets: Vec<Arc<Subscriber>> = {
            let mut registry = self.registry();
            let targets: Vec<_> = registry
                .channels
                .values()
                .filter(|c| c.members.contains(&update.booking_id))
                .flat_map(|c| c.subscribers.iter().cloned())
                .collect();
            if targets.is_empty() {
                return 0;
            }

            let record = (update.kind, update.record_id);
            if update.event != ChangeEvent::Delete {
                if let Some((_, seen)) = registry.last_versions.get(&record) {
                    if update.version <= *seen {
                        tracing::trace!(
                            record_id = %update.record_id,
                            version = update.version,
                            "Duplicate update dropped"
                        );
                        return 0;
                    }
                }
            }
            registry
                .last_versions
                .insert(record, (update.booking_id, update.version));
            targets
        };

        // Subscribers may join or leave while callbacks run
        targets.iter().filter(|s| s.deliver(&update)).count()
    }
}

/// A live subscription; dropping it closes the subscription
pub struct SubscriptionHandle {
    feed: ChangeFeedMultiplexer,
    subscriber: Arc<Subscriber>,
    key: ChannelKey,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn status(&self) -> FeedStatus {
        if self.is_closed() {
            return FeedStatus::Idle;
        }
        self.feed
            .registry()
            .channels
            .get(&self.key)
            .map(|c| c.status)
            .unwrap_or(FeedStatus::Idle)
    }

    pub fn last_error(&self) -> Option<String> {
        self.feed
            .registry()
            .channels
            .get(&self.key)
            .and_then(|c| c.last_error.clone())
    }

    /// Status updates of the current channel. The receiver starts at the
    /// current status and ends when the channel closes; after `set_ids`,
    /// call again to follow the new channel.
    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.feed
            .registry()
            .channels
            .get(&self.key)
            .filter(|_| !self.is_closed())
            .map(|c| c.status_tx.subscribe())
            .unwrap_or_else(|| watch::channel(FeedStatus::Idle).1)
    }

    /// Replace the callback; the next dispatch uses the new closure
    pub fn set_callback<F>(&self, on_update: F)
    where
        F: Fn(&BookingUpdate) + Send + Sync + 'static,
    {
        *self
            .subscriber
            .callback
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Arc::new(on_update);
    }

    /// Move to the channel for a new ID set
    pub async fn set_ids(&mut self, ids: impl IntoIterator<Item = Uuid>) -> FeedStatus {
        if self.is_closed() {
            return FeedStatus::Idle;
        }
        let ids: BTreeSet<Uuid> = ids.into_iter().collect();
        if ChannelKey::for_ids(&ids) == self.key {
            return self.status();
        }
        self.feed.leave(&self.subscriber, &self.key);
        self.key = self.feed.join(ids, self.subscriber.clone());
        self.feed.ensure_attached(&self.key).await
    }

    /// Retry attaching after an error
    pub async fn resubscribe(&self) -> FeedStatus {
        if self.is_closed() {
            return FeedStatus::Idle;
        }
        self.feed.ensure_attached(&self.key).await
    }

    pub fn close(&self) {
        if !self.subscriber.closed.swap(true, Ordering::AcqRel) {
            self.feed.leave(&self.subscriber, &self.key);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.subscriber.closed.load(Ordering::Acquire)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn update_for(booking_id: Uuid, version: i64) -> BookingUpdate {
        BookingUpdate {
            kind: UpdateKind::Booking,
            event: ChangeEvent::Update,
            booking_id,
            record_id: booking_id,
            version,
            occurred_at: chrono::Utc::now(),
            record: None,
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&BookingUpdate) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &BookingUpdate| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    struct FailingSource;

    #[async_trait]
    impl ChangeSource for FailingSource {
        async fn attach(&self, _key: &ChannelKey, _sink: FeedSink) -> AppResult<()> {
            Err(AppError::Internal("listener unavailable".to_string()))
        }

        fn detach(&self, _key: &ChannelKey) {}
    }

    /// Attach waits until released, to observe in-flight results
    struct GatedSource {
        gate: Notify,
    }

    #[async_trait]
    impl ChangeSource for GatedSource {
        async fn attach(&self, _key: &ChannelKey, _sink: FeedSink) -> AppResult<()> {
            self.gate.notified().await;
            Ok(())
        }

        fn detach(&self, _key: &ChannelKey) {}
    }

    #[test]
    fn test_channel_key_ignores_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let one: BTreeSet<_> = [a, b].into_iter().collect();
        let two: BTreeSet<_> = [b, a, b].into_iter().collect();
        assert_eq!(ChannelKey::for_ids(&one), ChannelKey::for_ids(&two));
    }

    #[tokio::test]
    async fn test_dispatch_only_to_member_channels() {
        let feed = ChangeFeedMultiplexer::local();
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();

        let (with_x, on_x) = counter();
        let (without_x, on_y) = counter();
        let _h1 = feed.subscribe([x, y], on_x).await;
        let _h2 = feed.subscribe([y], on_y).await;

        assert_eq!(feed.publish(update_for(x, 2)), 1);
        assert_eq!(with_x.load(Ordering::SeqCst), 1);
        assert_eq!(without_x.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_identical_sets_share_one_channel() {
        let feed = ChangeFeedMultiplexer::local();
        let x = Uuid::new_v4();

        let h1 = feed.subscribe([x], |_| {}).await;
        let h2 = feed.subscribe([x], |_| {}).await;
        assert_eq!(feed.channel_count(), 1);
        assert_eq!(feed.subscriber_count(h1.key()), 2);
        assert_eq!(h2.status(), FeedStatus::Subscribed);

        drop(h1);
        assert_eq!(feed.channel_count(), 1);
        drop(h2);
        assert_eq!(feed.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_echo_of_published_version_is_dropped() {
        let feed = ChangeFeedMultiplexer::local();
        let x = Uuid::new_v4();
        let (count, on_update) = counter();
        let _h = feed.subscribe([x], on_update).await;

        feed.publish(update_for(x, 3));
        let echo = RawChange {
            event: "update".to_string(),
            table: "booking_requests".to_string(),
            row: json!({ "id": x.to_string(), "status": "approved", "version": 3 }),
        };
        assert_eq!(feed.ingest(echo), 0);
        assert_eq!(feed.publish(update_for(x, 4)), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_event_is_dropped() {
        let feed = ChangeFeedMultiplexer::local();
        let x = Uuid::new_v4();
        let (count, on_update) = counter();
        let _h = feed.subscribe([x], on_update).await;

        let raw = RawChange {
            event: "update".to_string(),
            table: "booking_requests".to_string(),
            row: json!({ "id": x.to_string(), "status": "archived", "version": 5 }),
        };
        assert_eq!(feed.ingest(raw), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_latest_callback_is_used() {
        let feed = ChangeFeedMultiplexer::local();
        let x = Uuid::new_v4();
        let (old, on_old) = counter();
        let (new, on_new) = counter();

        let handle = feed.subscribe([x], on_old).await;
        handle.set_callback(on_new);
        feed.publish(update_for(x, 2));

        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(new.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_handle_receives_nothing() {
        let feed = ChangeFeedMultiplexer::local();
        let x = Uuid::new_v4();
        let (count, on_update) = counter();

        let handle = feed.subscribe([x], on_update).await;
        handle.close();
        assert_eq!(handle.status(), FeedStatus::Idle);
        assert_eq!(feed.publish(update_for(x, 2)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_ids_moves_between_channels() {
        let feed = ChangeFeedMultiplexer::local();
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        let (count, on_update) = counter();

        let mut handle = feed.subscribe([x], on_update).await;
        assert_eq!(handle.set_ids([y]).await, FeedStatus::Subscribed);
        assert_eq!(feed.channel_count(), 1);

        feed.publish(update_for(x, 2));
        feed.publish(update_for(y, 2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attach_failure_sets_error_without_retry() {
        let feed = ChangeFeedMultiplexer::new(Arc::new(FailingSource), Duration::from_secs(1));
        let handle = feed.subscribe([Uuid::new_v4()], |_| {}).await;

        assert_eq!(handle.status(), FeedStatus::Error);
        assert!(handle.last_error().unwrap().contains("listener unavailable"));
        assert_eq!(handle.resubscribe().await, FeedStatus::Error);
    }

    #[tokio::test]
    async fn test_attach_timeout_sets_error() {
        let source = Arc::new(GatedSource {
            gate: Notify::new(),
        });
        let feed = ChangeFeedMultiplexer::new(source, Duration::from_millis(20));
        let handle = feed.subscribe([Uuid::new_v4()], |_| {}).await;
        assert_eq!(handle.status(), FeedStatus::Error);
    }

    #[tokio::test]
    async fn test_attach_result_after_close_is_ignored() {
        let source = Arc::new(GatedSource {
            gate: Notify::new(),
        });
        let feed = ChangeFeedMultiplexer::new(source.clone(), Duration::from_secs(5));
        let x = Uuid::new_v4();

        let pending = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.subscribe([x], |_| {}).await })
        };
        tokio::task::yield_now().await;
        source.gate.notify_one();
        let handle = pending.await.unwrap();
        handle.close();

        // A later attach for the same set starts a fresh generation
        let again = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.subscribe([x], |_| {}).await })
        };
        tokio::task::yield_now().await;
        source.gate.notify_one();
        let again = again.await.unwrap();
        assert_eq!(again.status(), FeedStatus::Subscribed);
        assert_eq!(handle.status(), FeedStatus::Idle);
    }

    #[tokio::test]
    async fn test_stream_failure_marks_channels() {
        let feed = ChangeFeedMultiplexer::local();
        let handle = feed.subscribe([Uuid::new_v4()], |_| {}).await;
        feed.fail_all("connection reset");
        assert_eq!(handle.status(), FeedStatus::Error);
        assert_eq!(handle.resubscribe().await, FeedStatus::Subscribed);
    }

    #[tokio::test]
    async fn test_status_watchers_see_failures_and_recovery() {
        let feed = ChangeFeedMultiplexer::local();
        let handle = feed.subscribe([Uuid::new_v4()], |_| {}).await;
        let mut status = handle.watch_status();
        assert_eq!(*status.borrow_and_update(), FeedStatus::Subscribed);

        feed.fail_all("connection reset");
        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), FeedStatus::Error);

        handle.resubscribe().await;
        assert_eq!(*status.borrow_and_update(), FeedStatus::Subscribed);

        handle.close();
        assert!(status.changed().await.is_err());
    }

    #[tokio::test]
    async fn test_status_watch_starts_at_attach_error() {
        let feed = ChangeFeedMultiplexer::new(Arc::new(FailingSource), Duration::from_secs(1));
        let handle = feed.subscribe([Uuid::new_v4()], |_| {}).await;
        assert_eq!(*handle.watch_status().borrow(), FeedStatus::Error);
    }
}
