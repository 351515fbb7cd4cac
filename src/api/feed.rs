//! Server-sent change feed

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::{
    wrappers::{ReceiverStream, WatchStream},
    Stream, StreamExt,
};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::BookingUpdate,
    services::change_feed::FeedStatus,
    AppState,
};

use super::{bookings::require_visible, AuthenticatedActor};

const MAX_FEED_IDS: usize = 200;

#[derive(Debug, Deserialize, IntoParams)]
pub struct FeedQuery {
    /// Comma-separated booking IDs
    pub ids: String,
}

/// Payload of the `status` event sent on open and on every status change
#[derive(Debug, Serialize)]
struct StatusPayload {
    status: FeedStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

enum FeedItem {
    Status(FeedStatus),
    Update(BookingUpdate),
}

fn parse_ids(raw: &str) -> AppResult<Vec<Uuid>> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Uuid>()
                .map_err(|_| AppError::Validation(format!("'{}' is not a booking id", s)))
        })
        .collect::<AppResult<Vec<_>>>()?;

    if ids.is_empty() || ids.len() > MAX_FEED_IDS {
        return Err(AppError::Validation(format!(
            "between 1 and {} booking ids are required",
            MAX_FEED_IDS
        )));
    }
    Ok(ids)
}

/// Stream updates for a set of bookings. Each `booking_update` event means
/// the booking or one of its records changed; clients refetch on receipt.
/// A `status` event reports the subscription state, first on open and then
/// on every change, so a client learns when updates stopped flowing.
#[utoipa::path(
    get,
    path = "/feed",
    tag = "feed",
    security(("bearer_auth" = [])),
    params(FeedQuery),
    responses(
        (status = 200, description = "text/event-stream of booking updates", body = BookingUpdate),
        (status = 400, description = "Invalid id list"),
        (status = 403, description = "Not a party to one of the bookings")
    )
)]
pub async fn stream_feed(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<FeedQuery>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let ids = parse_ids(&query.ids)?;
    for id in &ids {
        let booking = state.services.bookings.get(*id).await?;
        require_visible(&booking, actor)?;
    }

    let (tx, rx) = mpsc::channel::<BookingUpdate>(state.config.realtime.sse_buffer.max(1));
    let handle = state
        .services
        .feed
        .subscribe(ids, move |update: &BookingUpdate| {
            if tx.try_send(update.clone()).is_err() {
                tracing::debug!(booking_id = %update.booking_id, "SSE client lagging, update dropped");
            }
        })
        .await;
    tracing::debug!(user_id = %actor.user_id, channel = %handle.key(), status = ?handle.status(), "Feed opened");

    let statuses = WatchStream::new(handle.watch_status()).map(FeedItem::Status);
    let updates = ReceiverStream::new(rx).map(FeedItem::Update);

    // The stream owns the subscription; it closes when the client goes away
    let stream = statuses.merge(updates).filter_map(move |item| {
        let event = match item {
            FeedItem::Status(status) => {
                let payload = StatusPayload {
                    status,
                    last_error: handle.last_error(),
                };
                if status == FeedStatus::Error {
                    tracing::debug!(channel = %handle.key(), "Telling SSE client the feed failed");
                }
                Event::default()
                    .event("status")
                    .data(serde_json::to_string(&payload).ok()?)
            }
            FeedItem::Update(update) => Event::default()
                .event("booking_update")
                .data(serde_json::to_string(&update).ok()?),
        };
        Some(Ok(event))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let ids = parse_ids(&format!("{}, {},", a, b)).unwrap();
        assert_eq!(ids, vec![a, b]);
        assert!(parse_ids("").is_err());
        assert!(parse_ids("not-a-uuid").is_err());
    }

    #[test]
    fn test_status_payload_omits_missing_error() {
        let ok = StatusPayload {
            status: FeedStatus::Subscribed,
            last_error: None,
        };
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"status":"subscribed"}"#);

        let failed = StatusPayload {
            status: FeedStatus::Error,
            last_error: Some("attach timed out after 500 ms".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({ "status": "error", "last_error": "attach timed out after 500 ms" })
        );
    }
}
