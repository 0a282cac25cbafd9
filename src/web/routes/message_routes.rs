use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::db::models::MessageStatus;
use crate::db::services::message_service::{self, ITEMS_PER_PAGE};
use crate::web::{AppState, auth::AuthenticatedUser, error::AppError};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_messages).delete(delete_all_messages))
        .route("/search", get(search_messages))
        .route("/status/{link}", get(get_message_status))
        .route("/resend/{id}", post(resend_message))
        .route("/{id}", get(get_message).delete(delete_message))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Pagination {
    p: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchQuery {
    keyword: String,
}

/// Public status lookup; resolves to `Unknown` rather than failing when the
/// link cannot be found.
async fn get_message_status(
    State(state): State<Arc<AppState>>,
    Path(link): Path<String>,
) -> Json<Value> {
    match message_service::get_status_by_link(&state.pool, &link).await {
        Ok(status) => Json(json!({
            "success": status != MessageStatus::Unknown,
            "message": "",
            "status": status,
        })),
        Err(e) => Json(json!({
            "success": false,
            "message": e.to_string(),
            "status": MessageStatus::Unknown,
        })),
    }
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Value>, AppError> {
    let page = pagination.p.max(0);
    let messages = message_service::get_messages_by_user_id(
        &state.pool,
        user.id,
        page * ITEMS_PER_PAGE,
        ITEMS_PER_PAGE,
    )
    .await?;
    Ok(Json(json!({"success": true, "message": "", "data": messages})))
}

async fn search_messages(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, AppError> {
    let messages = message_service::search_messages(&state.pool, user.id, &query.keyword).await?;
    Ok(Json(json!({"success": true, "message": "", "data": messages})))
}

async fn get_message(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let message = message_service::get_message_by_ids(&state.pool, id, user.id).await?;
    Ok(Json(json!({"success": true, "message": "", "data": message})))
}

async fn resend_message(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Json<Value> {
    match state.dispatch.resend(user.id, id).await {
        Ok(link) => Json(json!({"success": true, "message": "", "link": link})),
        Err(e) => Json(json!({"success": false, "message": e.to_string()})),
    }
}

async fn delete_message(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    message_service::delete_message_by_id(&state.pool, id, user.id).await?;
    Ok(Json(json!({"success": true, "message": ""})))
}

async fn delete_all_messages(
    State(state): State<Arc<AppState>>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Value>, AppError> {
    let deleted = message_service::delete_all_messages(&state.pool, user.id).await?;
    Ok(Json(json!({"success": true, "message": "", "deleted": deleted})))
}
