use sqlx::SqlitePool;

use crate::db::models::Channel;

pub async fn create_channel(pool: &SqlitePool, channel: &Channel) -> sqlx::Result<Channel> {
    let result = sqlx::query(
        r#"
        INSERT INTO channels (user_id, name, type, app_id, account_id, secret, other, token, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(channel.user_id)
    .bind(&channel.name)
    .bind(&channel.channel_type)
    .bind(&channel.app_id)
    .bind(&channel.account_id)
    .bind(&channel.secret)
    .bind(&channel.other)
    .bind(&channel.token)
    .bind(channel.status)
    .execute(pool)
    .await?;
    let mut created = channel.clone();
    created.id = result.last_insert_rowid();
    Ok(created)
}

pub async fn get_channel_by_name(
    pool: &SqlitePool,
    name: &str,
    user_id: i64,
) -> sqlx::Result<Channel> {
    sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE name = ? AND user_id = ?")
        .bind(name)
        .bind(user_id)
        .fetch_one(pool)
        .await
}

/// Counts channel rows that resolve to the same physical credential. A count
/// above one means the credential is shared and concurrent senders may race
/// on its cached token.
pub async fn count_credential_refs(
    pool: &SqlitePool,
    secret: &str,
    app_id: &str,
    channel_type: &str,
) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM channels WHERE secret = ? AND app_id = ? AND type = ?")
        .bind(secret)
        .bind(app_id)
        .bind(channel_type)
        .fetch_one(pool)
        .await
}
