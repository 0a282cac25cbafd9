use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::types::Json;

use crate::db::models::{Message, MessageStatus, MessageSummary, UNSAVED_LINK};

pub const ITEMS_PER_PAGE: i64 = 10;

/// Persists a new message row with status `Pending`, assigning its timestamp
/// and id. The caller must have generated a collision-resistant link.
pub async fn insert_message(
    pool: &SqlitePool,
    message: &mut Message,
    user_id: i64,
) -> sqlx::Result<()> {
    message.user_id = user_id;
    message.timestamp = Utc::now().timestamp();
    message.status = MessageStatus::Pending;
    let result = sqlx::query(
        r#"
        INSERT INTO messages
            (user_id, title, description, content, url, btntxt, channel,
             timestamp, link, "to", status, render_mode, articles)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(message.user_id)
    .bind(&message.title)
    .bind(&message.description)
    .bind(&message.content)
    .bind(&message.url)
    .bind(&message.btntxt)
    .bind(&message.channel)
    .bind(message.timestamp)
    .bind(&message.link)
    .bind(&message.to)
    .bind(message.status)
    .bind(&message.render_mode)
    .bind(Json(&message.articles.0))
    .execute(pool)
    .await?;
    message.id = result.last_insert_rowid();
    Ok(())
}

/// Single-column status transition, atomic per row. Terminal states are
/// never overwritten; returns whether a row actually changed.
pub async fn update_status(
    pool: &SqlitePool,
    id: i64,
    status: MessageStatus,
) -> sqlx::Result<bool> {
    let result = sqlx::query("UPDATE messages SET status = ? WHERE id = ? AND status NOT IN (?, ?)")
        .bind(status)
        .bind(id)
        .bind(MessageStatus::Sent)
        .bind(MessageStatus::Failed)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_message_by_id(pool: &SqlitePool, id: i64) -> sqlx::Result<Message> {
    sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Both id and owning user id must match, so one user cannot read another
/// user's messages by id.
pub async fn get_message_by_ids(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
) -> sqlx::Result<Message> {
    sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .fetch_one(pool)
        .await
}

pub async fn get_message_by_link(pool: &SqlitePool, link: &str) -> sqlx::Result<Message> {
    if link.is_empty() || link == UNSAVED_LINK {
        return Err(sqlx::Error::RowNotFound);
    }
    sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE link = ?")
        .bind(link)
        .fetch_one(pool)
        .await
}

/// Resolves a link to its status; `Unknown` when the link is the unsaved
/// sentinel or matches no row.
pub async fn get_status_by_link(pool: &SqlitePool, link: &str) -> sqlx::Result<MessageStatus> {
    if link.is_empty() || link == UNSAVED_LINK {
        return Ok(MessageStatus::Unknown);
    }
    let row: Option<(MessageStatus,)> =
        sqlx::query_as("SELECT status FROM messages WHERE link = ?")
            .bind(link)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|r| r.0).unwrap_or(MessageStatus::Unknown))
}

pub async fn get_messages_by_user_id(
    pool: &SqlitePool,
    user_id: i64,
    offset: i64,
    limit: i64,
) -> sqlx::Result<Vec<MessageSummary>> {
    sqlx::query_as::<_, MessageSummary>(
        r#"
        SELECT id, title, channel, timestamp, link, status FROM messages
        WHERE user_id = ? ORDER BY id DESC LIMIT ? OFFSET ?
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn search_messages(
    pool: &SqlitePool,
    user_id: i64,
    keyword: &str,
) -> sqlx::Result<Vec<MessageSummary>> {
    let id_keyword = keyword.parse::<i64>().unwrap_or(0);
    let prefix = format!("{keyword}%");
    sqlx::query_as::<_, MessageSummary>(
        r#"
        SELECT id, title, channel, timestamp, link, status FROM messages
        WHERE user_id = ?
          AND (id = ? OR title LIKE ? OR description LIKE ? OR content LIKE ?)
        ORDER BY id DESC
        "#,
    )
    .bind(user_id)
    .bind(id_keyword)
    .bind(&prefix)
    .bind(&prefix)
    .bind(&prefix)
    .fetch_all(pool)
    .await
}

/// Message ids still waiting for background delivery; used by the startup
/// reconciliation sweep.
pub async fn get_async_pending_ids(pool: &SqlitePool) -> sqlx::Result<Vec<i64>> {
    sqlx::query_scalar("SELECT id FROM messages WHERE status = ?")
        .bind(MessageStatus::AsyncPending)
        .fetch_all(pool)
        .await
}

pub async fn delete_message_by_id(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
) -> sqlx::Result<()> {
    let result = sqlx::query("DELETE FROM messages WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

pub async fn delete_all_messages(pool: &SqlitePool, user_id: i64) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM messages WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn test_pool() -> SqlitePool {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        db::init_schema(&pool).await.unwrap();
        pool
    }

    fn message(link: &str, title: &str) -> Message {
        Message {
            title: title.to_string(),
            content: "body".to_string(),
            channel: "wecom".to_string(),
            link: link.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn insert_assigns_id_timestamp_and_pending_status() {
        let pool = test_pool().await;
        let mut msg = message("link-1", "hello");
        insert_message(&pool, &mut msg, 7).await.unwrap();

        assert!(msg.id > 0);
        assert!(msg.timestamp > 0);
        assert_eq!(msg.status, MessageStatus::Pending);

        let loaded = get_message_by_link(&pool, "link-1").await.unwrap();
        assert_eq!(loaded.id, msg.id);
        assert_eq!(loaded.user_id, 7);
        assert_eq!(loaded.title, "hello");
        assert_eq!(loaded.status, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_link_is_rejected() {
        let pool = test_pool().await;
        let mut first = message("dup", "a");
        insert_message(&pool, &mut first, 1).await.unwrap();
        let mut second = message("dup", "b");
        assert!(insert_message(&pool, &mut second, 1).await.is_err());
    }

    #[tokio::test]
    async fn status_is_monotonic_once_terminal() {
        let pool = test_pool().await;
        let mut msg = message("mono", "t");
        insert_message(&pool, &mut msg, 1).await.unwrap();

        assert!(update_status(&pool, msg.id, MessageStatus::Sent).await.unwrap());
        // No regression to pending, no flip to failed.
        assert!(!update_status(&pool, msg.id, MessageStatus::Pending).await.unwrap());
        assert!(!update_status(&pool, msg.id, MessageStatus::Failed).await.unwrap());

        let status = get_status_by_link(&pool, "mono").await.unwrap();
        assert_eq!(status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn async_pending_can_still_be_finalized() {
        let pool = test_pool().await;
        let mut msg = message("async", "t");
        insert_message(&pool, &mut msg, 1).await.unwrap();

        assert!(update_status(&pool, msg.id, MessageStatus::AsyncPending).await.unwrap());
        assert!(update_status(&pool, msg.id, MessageStatus::Failed).await.unwrap());
        let status = get_status_by_link(&pool, "async").await.unwrap();
        assert_eq!(status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn status_by_link_is_unknown_for_unsaved_or_missing() {
        let pool = test_pool().await;
        assert_eq!(
            get_status_by_link(&pool, UNSAVED_LINK).await.unwrap(),
            MessageStatus::Unknown
        );
        assert_eq!(
            get_status_by_link(&pool, "").await.unwrap(),
            MessageStatus::Unknown
        );
        assert_eq!(
            get_status_by_link(&pool, "no-such-link").await.unwrap(),
            MessageStatus::Unknown
        );
    }

    #[tokio::test]
    async fn cross_user_access_is_denied() {
        let pool = test_pool().await;
        let mut msg = message("owned", "t");
        insert_message(&pool, &mut msg, 1).await.unwrap();

        assert!(get_message_by_ids(&pool, msg.id, 2).await.is_err());
        assert!(delete_message_by_id(&pool, msg.id, 2).await.is_err());
        // The row must survive the failed delete.
        assert!(get_message_by_ids(&pool, msg.id, 1).await.is_ok());
    }

    #[tokio::test]
    async fn search_is_scoped_to_the_user() {
        let pool = test_pool().await;
        let mut mine = message("mine", "deploy finished");
        insert_message(&pool, &mut mine, 1).await.unwrap();
        let mut theirs = message("theirs", "deploy finished");
        insert_message(&pool, &mut theirs, 2).await.unwrap();

        let found = search_messages(&pool, 1, "deploy").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, mine.id);
    }

    #[tokio::test]
    async fn listing_is_paginated_newest_first() {
        let pool = test_pool().await;
        for i in 0..15 {
            let mut msg = message(&format!("link-{i}"), &format!("title-{i}"));
            insert_message(&pool, &mut msg, 1).await.unwrap();
        }
        let first_page = get_messages_by_user_id(&pool, 1, 0, ITEMS_PER_PAGE).await.unwrap();
        assert_eq!(first_page.len(), 10);
        assert_eq!(first_page[0].title, "title-14");
        let second_page =
            get_messages_by_user_id(&pool, 1, ITEMS_PER_PAGE, ITEMS_PER_PAGE).await.unwrap();
        assert_eq!(second_page.len(), 5);
    }

    #[tokio::test]
    async fn delete_all_only_touches_the_callers_rows() {
        let pool = test_pool().await;
        let mut mine = message("m1", "a");
        insert_message(&pool, &mut mine, 1).await.unwrap();
        let mut theirs = message("t1", "b");
        insert_message(&pool, &mut theirs, 2).await.unwrap();

        assert_eq!(delete_all_messages(&pool, 1).await.unwrap(), 1);
        assert!(get_message_by_link(&pool, "t1").await.is_ok());
    }

    #[tokio::test]
    async fn async_pending_sweep_returns_only_pending_ids() {
        let pool = test_pool().await;
        let mut queued = message("q", "a");
        insert_message(&pool, &mut queued, 1).await.unwrap();
        update_status(&pool, queued.id, MessageStatus::AsyncPending).await.unwrap();
        let mut done = message("d", "b");
        insert_message(&pool, &mut done, 1).await.unwrap();
        update_status(&pool, done.id, MessageStatus::Sent).await.unwrap();

        assert_eq!(get_async_pending_ids(&pool).await.unwrap(), vec![queued.id]);
    }
}
