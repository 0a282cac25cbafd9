use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::channels::{ChannelRegistry, SenderError};
use crate::db::models::{
    CHANNEL_STATUS_ENABLED, Channel, Message, MessageStatus, SAVE_MESSAGES_ALLOWED, UNSAVED_LINK,
    User,
};
use crate::db::services::{channel_service, message_service, user_service};
use crate::dispatch::queue::{AsyncQueue, QueueFull};

const SYNC_COPY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("channel is disabled")]
    ChannelDisabled,
    #[error("asynchronous delivery requires message persistence permission")]
    AsyncRequiresPersistence,
    #[error("failed to save message: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error(transparent)]
    QueueFull(#[from] QueueFull),
    #[error(transparent)]
    Send(#[from] SenderError),
}

/// The single decision point for whether and how a message is persisted and
/// delivered.
pub struct DispatchService {
    pool: SqlitePool,
    registry: Arc<ChannelRegistry>,
    queue: AsyncQueue,
    http: Client,
    server_address: String,
    persistence_enabled: bool,
}

impl DispatchService {
    pub fn new(
        pool: SqlitePool,
        registry: Arc<ChannelRegistry>,
        queue: AsyncQueue,
        server_address: String,
        persistence_enabled: bool,
    ) -> Self {
        Self {
            pool,
            registry,
            queue,
            http: Client::new(),
            server_address,
            persistence_enabled,
        }
    }

    /// Persists (when permitted) and delivers one message. On return the
    /// message's persisted status is final for this request: `Sent`/`Failed`
    /// for synchronous sends, `AsyncPending` for accepted async sends.
    pub async fn save_and_send(
        &self,
        user: &User,
        message: &mut Message,
        channel: &Channel,
    ) -> Result<(), DispatchError> {
        if channel.status != CHANNEL_STATUS_ENABLED {
            return Err(DispatchError::ChannelDisabled);
        }
        message.link = Uuid::new_v4().simple().to_string();
        if message.url.is_empty() {
            message.url = format!("{}/message/{}", self.server_address, message.link);
        }

        let persist =
            self.persistence_enabled || user.save_messages == SAVE_MESSAGES_ALLOWED;
        if !persist {
            // Permission is evaluated once, here; async mode has nothing to
            // queue against without a persisted row.
            if message.async_send {
                return Err(DispatchError::AsyncRequiresPersistence);
            }
            message.link = UNSAVED_LINK.to_string();
            self.spawn_sync_to_user(message, user);
            self.registry.send(message, user, channel).await?;
            return Ok(());
        }

        message_service::insert_message(&self.pool, message, user.id).await?;
        self.spawn_sync_to_user(message, user);

        // Every control path from here funnels through finalize so the row
        // never stays at Pending once this call completes.
        let send_result = if message.async_send {
            Ok(())
        } else {
            self.registry.send(message, user, channel).await
        };
        self.finalize(message, &send_result).await?;
        send_result.map_err(DispatchError::from)
    }

    async fn finalize(
        &self,
        message: &Message,
        send_result: &Result<(), SenderError>,
    ) -> Result<(), DispatchError> {
        let status = if message.async_send {
            MessageStatus::AsyncPending
        } else if send_result.is_ok() {
            MessageStatus::Sent
        } else {
            MessageStatus::Failed
        };
        // A failed status write must not reverse a send that already
        // happened; log and move on.
        if let Err(e) = message_service::update_status(&self.pool, message.id, status).await {
            error!(id = message.id, "failed to update message status: {e}");
        }
        if message.async_send {
            self.queue.enqueue(message.id).await?;
        }
        Ok(())
    }

    /// Re-dispatches an existing message as a fresh row, through the same
    /// pipeline as a new request.
    pub async fn resend(&self, user_id: i64, message_id: i64) -> Result<String, DispatchError> {
        let mut message = message_service::get_message_by_ids(&self.pool, message_id, user_id).await?;
        message.id = 0;
        let user = user_service::get_user_by_id(&self.pool, user_id).await?;
        let channel =
            channel_service::get_channel_by_name(&self.pool, &message.channel, user_id).await?;
        self.save_and_send(&user, &mut message, &channel).await?;
        Ok(message.link)
    }

    /// Reconciliation sweep: re-enqueues every `AsyncPending` row. Queued ids
    /// are lost on restart, so the owning process calls this explicitly when
    /// it wants recovery; it is not run automatically.
    pub async fn requeue_pending_async(&self) -> Result<usize, DispatchError> {
        let ids = message_service::get_async_pending_ids(&self.pool).await?;
        let mut requeued = 0;
        for id in ids {
            match self.queue.enqueue(id).await {
                Ok(()) => requeued += 1,
                Err(e) => {
                    warn!(id, "requeue stopped: {e}");
                    break;
                }
            }
        }
        info!(requeued, "requeued async-pending messages");
        Ok(requeued)
    }

    /// Best-effort copy to the user's companion surface. Runs detached; its
    /// outcome never affects the primary result.
    fn spawn_sync_to_user(&self, message: &Message, user: &User) {
        let Some(endpoint) = user.sync_endpoint.clone().filter(|e| !e.is_empty()) else {
            return;
        };
        let http = self.http.clone();
        let payload = serde_json::json!({
            "title": message.title,
            "description": message.description,
            "content": message.content,
            "url": message.url,
            "link": message.link,
        });
        tokio::spawn(async move {
            match http
                .post(&endpoint)
                .timeout(SYNC_COPY_TIMEOUT)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    warn!(status = %response.status(), "sync copy rejected by companion surface");
                }
                Err(e) => warn!("failed to push sync copy: {e}"),
            }
        });
    }
}
