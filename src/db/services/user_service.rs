use sqlx::SqlitePool;

use crate::db::models::User;

/// Creates a new user and returns it with its assigned id.
pub async fn create_user(pool: &SqlitePool, user: &User) -> sqlx::Result<User> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (username, token, channel, save_messages, sync_endpoint, status)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.token)
    .bind(&user.channel)
    .bind(user.save_messages)
    .bind(&user.sync_endpoint)
    .bind(user.status)
    .execute(pool)
    .await?;
    let mut created = user.clone();
    created.id = result.last_insert_rowid();
    Ok(created)
}

pub async fn get_user_by_id(pool: &SqlitePool, user_id: i64) -> sqlx::Result<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

pub async fn get_user_by_username(
    pool: &SqlitePool,
    username: &str,
) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
}

/// Looks a user up by their push auth token. Empty tokens never match.
pub async fn get_user_by_token(pool: &SqlitePool, token: &str) -> sqlx::Result<Option<User>> {
    if token.is_empty() {
        return Ok(None);
    }
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await
}
