//! PostgreSQL change source
//!
//! Row triggers publish `{event, table, row}` payloads with `pg_notify`,
//! where `row` holds only the routing keys of the changed record. A single
//! `PgListener` connection carries every channel of the feed.

use std::{
    collections::HashSet,
    sync::Mutex,
};

use async_trait::async_trait;
use sqlx::{postgres::PgListener, Pool, Postgres};
use tokio::task::JoinHandle;

use super::change_feed::{ChangeSource, ChannelKey, FeedSink};
use crate::{error::AppResult, models::RawChange};

/// NOTIFY channels written by the migration triggers
pub const NOTIFY_CHANNELS: [&str; 3] = ["booking_changes", "payment_changes", "inspection_changes"];

pub struct PgChangeSource {
    pool: Pool<Postgres>,
    attached: Mutex<HashSet<ChannelKey>>,
    listener: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PgChangeSource {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            attached: Mutex::new(HashSet::new()),
            listener: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl ChangeSource for PgChangeSource {
    async fn attach(&self, key: &ChannelKey, sink: FeedSink) -> AppResult<()> {
        let mut task = self.listener.lock().await;
        let running = task.as_ref().map(|t| !t.is_finished()).unwrap_or(false);

        if !running {
            let mut listener = PgListener::connect_with(&self.pool).await?;
            listener.listen_all(NOTIFY_CHANNELS).await?;
            tracing::info!(channels = ?NOTIFY_CHANNELS, "Change listener connected");
            *task = Some(tokio::spawn(pump(listener, sink)));
        }

        self.attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone());
        Ok(())
    }

    fn detach(&self, key: &ChannelKey) {
        let mut attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        attached.remove(key);
        if !attached.is_empty() {
            return;
        }
        // An attach in progress keeps the connection
        if let Ok(mut task) = self.listener.try_lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                tracing::debug!("Change listener stopped, no channels left");
            }
        }
    }
}

/// Forward notifications until the connection drops. Losing the connection
/// may lose events, so it is reported as a failure instead of reconnecting.
async fn pump(mut listener: PgListener, sink: FeedSink) {
    loop {
        match listener.try_recv().await {
            Ok(Some(notification)) => {
                match serde_json::from_str::<RawChange>(notification.payload()) {
                    Ok(raw) => {
                        sink.ingest(raw);
                    }
                    Err(e) => tracing::error!(
                        alert = true,
                        channel = notification.channel(),
                        "Malformed change payload: {}",
                        e
                    ),
                }
            }
            Ok(None) => {
                tracing::warn!("Change listener connection lost");
                sink.fail("change stream disconnected");
                break;
            }
            Err(e) => {
                tracing::error!("Change listener error: {}", e);
                sink.fail(&e.to_string());
                break;
            }
        }

        if sink.is_closed() {
            break;
        }
    }
}
