use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::channels::ChannelRegistry;
use crate::db::models::MessageStatus;
use crate::db::services::{channel_service, message_service, user_service};

#[derive(Debug, thiserror::Error)]
#[error("async dispatch queue is full")]
pub struct QueueFull;

/// Producer half of the in-process queue of message ids awaiting background
/// delivery. Ids live in memory only; a restart loses whatever is queued
/// (recoverable through the orchestrator's requeue sweep).
#[derive(Clone)]
pub struct AsyncQueue {
    tx: mpsc::Sender<i64>,
    enqueue_timeout: Duration,
}

pub fn async_queue(capacity: usize, enqueue_timeout: Duration) -> (AsyncQueue, mpsc::Receiver<i64>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AsyncQueue { tx, enqueue_timeout }, rx)
}

impl AsyncQueue {
    /// Bounded enqueue: rather than stalling the inbound request on a full
    /// queue, gives up after the configured timeout.
    pub async fn enqueue(&self, message_id: i64) -> Result<(), QueueFull> {
        self.tx
            .send_timeout(message_id, self.enqueue_timeout)
            .await
            .map_err(|_| QueueFull)
    }
}

/// Spawns the background delivery workers consuming the queue.
pub fn spawn_workers(
    count: usize,
    rx: mpsc::Receiver<i64>,
    pool: SqlitePool,
    registry: Arc<ChannelRegistry>,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count.max(1))
        .map(|worker| {
            let rx = rx.clone();
            let pool = pool.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                loop {
                    let id = { rx.lock().await.recv().await };
                    match id {
                        Some(id) => deliver(&pool, &registry, id).await,
                        None => {
                            info!(worker, "async dispatch queue closed, worker exiting");
                            break;
                        }
                    }
                }
            })
        })
        .collect()
}

/// Performs one queued delivery and finalizes the message's status. Any
/// failure, including configuration rows that disappeared since the enqueue,
/// ends in `Failed`; the outcome is only observable via status queries.
async fn deliver(pool: &SqlitePool, registry: &ChannelRegistry, id: i64) {
    let message = match message_service::get_message_by_id(pool, id).await {
        Ok(message) => message,
        Err(e) => {
            error!(id, "failed to load queued message: {e}");
            return;
        }
    };
    let status = match load_and_send(pool, registry, &message).await {
        Ok(()) => MessageStatus::Sent,
        Err(e) => {
            warn!(id, link = %message.link, "async delivery failed: {e}");
            MessageStatus::Failed
        }
    };
    if let Err(e) = message_service::update_status(pool, id, status).await {
        error!(id, "failed to finalize message status: {e}");
    }
}

#[derive(Debug, thiserror::Error)]
enum DeliverError {
    #[error("configuration lookup failed: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Send(#[from] crate::channels::SenderError),
}

async fn load_and_send(
    pool: &SqlitePool,
    registry: &ChannelRegistry,
    message: &crate::db::models::Message,
) -> Result<(), DeliverError> {
    let user = user_service::get_user_by_id(pool, message.user_id).await?;
    let channel =
        channel_service::get_channel_by_name(pool, &message.channel, message.user_id).await?;
    registry.send(message, &user, &channel).await?;
    Ok(())
}
