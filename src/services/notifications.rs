//! Notification collaborator
//!
//! Notifications are best effort: a failed emit is logged and never fails the
//! operation that triggered it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{NotificationType, RelatedEntity},
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(
        &self,
        user_id: Uuid,
        kind: NotificationType,
        related: RelatedEntity,
    ) -> AppResult<()>;
}

/// Writes notifications to the log; used when no delivery channel is wired
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn emit(
        &self,
        user_id: Uuid,
        kind: NotificationType,
        related: RelatedEntity,
    ) -> AppResult<()> {
        tracing::info!(
            user_id = %user_id,
            kind = %kind,
            category = ?kind.category(),
            title = kind.title(),
            action = %kind.action_path(related),
            "Notification"
        );
        Ok(())
    }
}

/// Emit to every recipient, logging failures
pub async fn notify_all(
    notifier: &dyn Notifier,
    recipients: &[Uuid],
    kind: NotificationType,
    related: RelatedEntity,
) {
    for user_id in recipients {
        if let Err(e) = notifier.emit(*user_id, kind, related).await {
            tracing::warn!(user_id = %user_id, kind = %kind, "Failed to emit notification: {}", e);
        }
    }
}
