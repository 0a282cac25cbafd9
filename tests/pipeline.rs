use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;

use pushgate::channels::{ChannelRegistry, Sender, SenderError};
use pushgate::db::models::{
    CHANNEL_STATUS_DISABLED, CHANNEL_STATUS_ENABLED, Channel, Message, MessageStatus,
    SAVE_MESSAGES_ALLOWED, UNSAVED_LINK, USER_STATUS_ENABLED, User,
};
use pushgate::db;
use pushgate::db::services::{channel_service, message_service, user_service};
use pushgate::dispatch::queue;
use pushgate::dispatch::service::{DispatchError, DispatchService};

#[derive(Default)]
struct MockSender {
    fail: AtomicBool,
    calls: AtomicUsize,
}

#[async_trait]
impl Sender for MockSender {
    async fn send(
        &self,
        _message: &Message,
        _user: &User,
        _channel: &Channel,
    ) -> Result<(), SenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(SenderError::Api { code: 1, message: "forced failure".to_string() })
        } else {
            Ok(())
        }
    }
}

struct TestEnv {
    pool: SqlitePool,
    registry: Arc<ChannelRegistry>,
    sender: Arc<MockSender>,
    dispatch: DispatchService,
    rx: Option<tokio::sync::mpsc::Receiver<i64>>,
    user: User,
    channel: Channel,
}

async fn env_with(save_allowed: bool, queue_capacity: usize) -> TestEnv {
    let pool = db::connect("sqlite::memory:").await.unwrap();
    db::init_schema(&pool).await.unwrap();

    let sender = Arc::new(MockSender::default());
    let mut registry = ChannelRegistry::new();
    registry.register("mock", sender.clone());
    let registry = Arc::new(registry);

    let (async_queue, rx) = queue::async_queue(queue_capacity, Duration::from_millis(100));
    let dispatch = DispatchService::new(
        pool.clone(),
        registry.clone(),
        async_queue,
        "http://localhost:3000".to_string(),
        false,
    );

    let user = user_service::create_user(
        &pool,
        &User {
            id: 0,
            username: "alice".to_string(),
            token: String::new(),
            channel: "mock".to_string(),
            save_messages: if save_allowed { SAVE_MESSAGES_ALLOWED } else { 0 },
            sync_endpoint: None,
            status: USER_STATUS_ENABLED,
        },
    )
    .await
    .unwrap();
    let channel = channel_service::create_channel(
        &pool,
        &Channel {
            id: 0,
            user_id: user.id,
            name: "mock".to_string(),
            channel_type: "mock".to_string(),
            app_id: String::new(),
            account_id: String::new(),
            secret: String::new(),
            other: String::new(),
            token: None,
            status: CHANNEL_STATUS_ENABLED,
        },
    )
    .await
    .unwrap();

    TestEnv { pool, registry, sender, dispatch, rx: Some(rx), user, channel }
}

fn new_message(async_send: bool) -> Message {
    Message {
        title: "deploy".to_string(),
        content: "done".to_string(),
        channel: "mock".to_string(),
        async_send,
        ..Default::default()
    }
}

async fn message_rows(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn wait_for_terminal_status(pool: &SqlitePool, link: &str) -> MessageStatus {
    for _ in 0..100 {
        let status = message_service::get_status_by_link(pool, link).await.unwrap();
        if status == MessageStatus::Sent || status == MessageStatus::Failed {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    message_service::get_status_by_link(pool, link).await.unwrap()
}

#[tokio::test]
async fn synchronous_send_finalizes_as_sent() {
    let env = env_with(true, 8).await;
    let mut message = new_message(false);

    env.dispatch
        .save_and_send(&env.user, &mut message, &env.channel)
        .await
        .unwrap();

    assert_eq!(env.sender.calls.load(Ordering::SeqCst), 1);
    assert_eq!(message.link.len(), 32);
    let status = message_service::get_status_by_link(&env.pool, &message.link)
        .await
        .unwrap();
    assert_eq!(status, MessageStatus::Sent);
}

#[tokio::test]
async fn forced_channel_failure_finalizes_as_failed_never_sent() {
    let env = env_with(true, 8).await;
    env.sender.fail.store(true, Ordering::SeqCst);
    let mut message = new_message(false);

    let err = env
        .dispatch
        .save_and_send(&env.user, &mut message, &env.channel)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Send(_)));

    let status = message_service::get_status_by_link(&env.pool, &message.link)
        .await
        .unwrap();
    assert_eq!(status, MessageStatus::Failed);
}

#[tokio::test]
async fn unsaved_send_uses_sentinel_link_and_writes_no_row() {
    let env = env_with(false, 8).await;
    let mut message = new_message(false);

    env.dispatch
        .save_and_send(&env.user, &mut message, &env.channel)
        .await
        .unwrap();

    assert_eq!(message.link, UNSAVED_LINK);
    assert_eq!(message_rows(&env.pool).await, 0);
    assert_eq!(env.sender.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn async_without_persistence_permission_is_rejected_before_insert() {
    let env = env_with(false, 8).await;
    let mut message = new_message(true);

    let err = env
        .dispatch
        .save_and_send(&env.user, &mut message, &env.channel)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::AsyncRequiresPersistence));
    assert_eq!(message_rows(&env.pool).await, 0);
    assert_eq!(env.sender.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disabled_channel_is_rejected_without_creating_state() {
    let env = env_with(true, 8).await;
    let mut disabled = env.channel.clone();
    disabled.status = CHANNEL_STATUS_DISABLED;
    let mut message = new_message(false);

    let err = env
        .dispatch
        .save_and_send(&env.user, &mut message, &disabled)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ChannelDisabled));
    assert_eq!(message_rows(&env.pool).await, 0);
}

#[tokio::test]
async fn async_send_is_accepted_then_delivered_by_a_worker() {
    let mut env = env_with(true, 8).await;
    let mut message = new_message(true);

    env.dispatch
        .save_and_send(&env.user, &mut message, &env.channel)
        .await
        .unwrap();

    // Accepted immediately; delivery has not been attempted yet.
    let status = message_service::get_status_by_link(&env.pool, &message.link)
        .await
        .unwrap();
    assert_eq!(status, MessageStatus::AsyncPending);
    assert_eq!(env.sender.calls.load(Ordering::SeqCst), 0);

    queue::spawn_workers(1, env.rx.take().unwrap(), env.pool.clone(), env.registry.clone());
    let status = wait_for_terminal_status(&env.pool, &message.link).await;
    assert_eq!(status, MessageStatus::Sent);
    assert_eq!(env.sender.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn async_worker_failure_is_recorded_as_failed() {
    let mut env = env_with(true, 8).await;
    env.sender.fail.store(true, Ordering::SeqCst);
    let mut message = new_message(true);

    env.dispatch
        .save_and_send(&env.user, &mut message, &env.channel)
        .await
        .unwrap();

    queue::spawn_workers(1, env.rx.take().unwrap(), env.pool.clone(), env.registry.clone());
    let status = wait_for_terminal_status(&env.pool, &message.link).await;
    assert_eq!(status, MessageStatus::Failed);
}

#[tokio::test]
async fn full_queue_rejects_instead_of_stalling() {
    let env = env_with(true, 1).await;

    let mut first = new_message(true);
    env.dispatch
        .save_and_send(&env.user, &mut first, &env.channel)
        .await
        .unwrap();

    let mut second = new_message(true);
    let err = env
        .dispatch
        .save_and_send(&env.user, &mut second, &env.channel)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::QueueFull(_)));

    // The rejected message keeps its interim state and stays recoverable.
    let status = message_service::get_status_by_link(&env.pool, &second.link)
        .await
        .unwrap();
    assert_eq!(status, MessageStatus::AsyncPending);
}

#[tokio::test]
async fn requeue_sweep_recovers_async_pending_rows() {
    let mut env = env_with(true, 8).await;
    let mut message = new_message(true);
    env.dispatch
        .save_and_send(&env.user, &mut message, &env.channel)
        .await
        .unwrap();

    // Drain the queue to simulate a restart that lost the queued id.
    let mut rx = env.rx.take().unwrap();
    assert_eq!(rx.recv().await, Some(message.id));

    let requeued = env.dispatch.requeue_pending_async().await.unwrap();
    assert_eq!(requeued, 1);

    queue::spawn_workers(1, rx, env.pool.clone(), env.registry.clone());
    let status = wait_for_terminal_status(&env.pool, &message.link).await;
    assert_eq!(status, MessageStatus::Sent);
}

#[tokio::test]
async fn resend_dispatches_a_fresh_row() {
    let env = env_with(true, 8).await;
    let mut message = new_message(false);
    env.dispatch
        .save_and_send(&env.user, &mut message, &env.channel)
        .await
        .unwrap();

    let link = env.dispatch.resend(env.user.id, message.id).await.unwrap();
    assert_ne!(link, message.link);
    assert_eq!(message_rows(&env.pool).await, 2);
    assert_eq!(env.sender.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn resend_is_scoped_to_the_owning_user() {
    let env = env_with(true, 8).await;
    let mut message = new_message(false);
    env.dispatch
        .save_and_send(&env.user, &mut message, &env.channel)
        .await
        .unwrap();

    let err = env.dispatch.resend(env.user.id + 1, message.id).await.unwrap_err();
    assert!(matches!(err, DispatchError::Persistence(_)));
    assert_eq!(message_rows(&env.pool).await, 1);
}
