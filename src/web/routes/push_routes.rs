use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    routing::get,
};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlxJson;

use crate::config::SYSTEM_NAME;
use crate::db::models::{Article, Message, USER_STATUS_ENABLED};
use crate::db::services::{channel_service, user_service};
use crate::web::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/push/{username}", get(push_get).post(push_post))
}

/// Inbound push payload, accepted as query parameters, a form body or a JSON
/// body. Carries ServerChan-compatible aliases alongside the native fields.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MessagePayload {
    title: String,
    description: String,
    content: String,
    url: String,
    btntxt: String,
    channel: String,
    token: String,
    to: String,
    // Compatibility aliases: desp -> content, short -> description,
    // openid -> to.
    desp: String,
    short: String,
    openid: String,
    #[serde(rename = "async")]
    async_send: bool,
    render_mode: String,
    /// A JSON array in request bodies, or a JSON-encoded string in query and
    /// form parameters.
    articles: Option<serde_json::Value>,
}

impl MessagePayload {
    fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.description.is_empty()
            && self.content.is_empty()
            && self.channel.is_empty()
            && self.token.is_empty()
    }

    fn into_message(self) -> Result<Message, String> {
        let articles: Vec<Article> = match self.articles {
            None => Vec::new(),
            Some(serde_json::Value::String(raw)) => {
                if raw.is_empty() {
                    Vec::new()
                } else {
                    serde_json::from_str(&raw).map_err(|e| format!("invalid articles: {e}"))?
                }
            }
            Some(value) => {
                serde_json::from_value(value).map_err(|e| format!("invalid articles: {e}"))?
            }
        };
        let mut message = Message {
            title: self.title,
            description: self.description,
            content: self.content,
            url: self.url,
            btntxt: self.btntxt,
            channel: self.channel,
            token: self.token,
            to: self.to,
            render_mode: self.render_mode,
            async_send: self.async_send,
            articles: SqlxJson(articles),
            ..Default::default()
        };
        if message.description.is_empty() {
            message.description = self.short;
        }
        if message.content.is_empty() {
            message.content = self.desp;
        }
        if message.to.is_empty() {
            message.to = self.openid;
        }
        Ok(message)
    }
}

#[derive(Debug, Serialize)]
struct PushResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<String>,
}

fn failure(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<PushResponse>) {
    (
        status,
        Json(PushResponse { success: false, message: message.into(), link: None }),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenFallback {
    token: String,
}

async fn push_get(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Query(payload): Query<MessagePayload>,
    headers: HeaderMap,
) -> (StatusCode, Json<PushResponse>) {
    handle_push(state, username, payload, headers).await
}

async fn push_post(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Query(fallback): Query<TokenFallback>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<PushResponse>) {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);
    let mut payload: MessagePayload = if is_json {
        match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(_) => {
                return failure(StatusCode::OK, "request body is not valid JSON");
            }
        }
    } else {
        match serde_urlencoded::from_bytes(&body) {
            Ok(payload) => payload,
            Err(_) => {
                return failure(StatusCode::OK, "request body is not a valid form");
            }
        }
    };
    if payload.is_empty() {
        return failure(
            StatusCode::OK,
            "empty request body; set Content-Type to application/json for JSON, otherwise submit a form",
        );
    }
    if payload.token.is_empty() {
        payload.token = fallback.token;
    }
    handle_push(state, username, payload, headers).await
}

/// Message-level auth: a matching user token always passes; a channel-scoped
/// token, when configured, must match otherwise.
fn auth_message(message_token: &str, user_token: &str, channel_token: Option<&str>) -> bool {
    if !user_token.is_empty() && message_token == user_token {
        return true;
    }
    if let Some(channel_token) = channel_token {
        if !channel_token.is_empty() && message_token != channel_token {
            return false;
        }
    }
    true
}

async fn handle_push(
    state: Arc<AppState>,
    username: String,
    mut payload: MessagePayload,
    headers: HeaderMap,
) -> (StatusCode, Json<PushResponse>) {
    let user = match user_service::get_user_by_username(&state.pool, &username).await {
        Ok(Some(user)) => user,
        Ok(None) => return failure(StatusCode::OK, "user does not exist"),
        Err(e) => return failure(StatusCode::OK, e.to_string()),
    };
    if user.status != USER_STATUS_ENABLED {
        return failure(StatusCode::OK, "user is disabled");
    }
    if payload.token.is_empty() {
        if let Some(bearer) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        {
            payload.token = bearer.to_string();
        }
    }

    let mut message = match payload.into_message() {
        Ok(message) => message,
        Err(e) => return failure(StatusCode::OK, e),
    };
    if message.title.is_empty() {
        message.title = SYSTEM_NAME.to_string();
    }
    if message.channel.is_empty() {
        message.channel = user.channel.clone();
        if message.channel.is_empty() {
            return failure(StatusCode::OK, "no channel specified and user has no default channel");
        }
    }
    let channel =
        match channel_service::get_channel_by_name(&state.pool, &message.channel, user.id).await {
            Ok(channel) => channel,
            Err(_) => {
                return failure(
                    StatusCode::OK,
                    format!("invalid channel name: {}", message.channel),
                );
            }
        };
    if !auth_message(&message.token, &user.token, channel.token.as_deref()) {
        if message.token.is_empty() {
            return failure(
                StatusCode::UNAUTHORIZED,
                "an auth token is configured for this user or channel; one must be provided",
            );
        }
        return failure(StatusCode::UNAUTHORIZED, "invalid token");
    }
    if message.render_mode == "code" && !message.content.is_empty() {
        message.content = format!("```\n{}\n```", message.content);
    }

    match state.dispatch.save_and_send(&user, &mut message, &channel).await {
        Ok(()) => (
            StatusCode::OK,
            Json(PushResponse {
                success: true,
                message: String::new(),
                link: Some(message.link),
            }),
        ),
        Err(e) => failure(StatusCode::OK, e.to_string()),
    }
}
