use serde::{Deserialize, Serialize, Serializer};
use sqlx::types::Json;

pub const TYPE_WECOM: &str = "wecom";
pub const TYPE_WEBHOOK: &str = "webhook";

pub const CHANNEL_STATUS_ENABLED: i32 = 1;
pub const CHANNEL_STATUS_DISABLED: i32 = 2;

pub const USER_STATUS_ENABLED: i32 = 1;
pub const USER_STATUS_DISABLED: i32 = 2;

pub const SAVE_MESSAGES_ALLOWED: i32 = 1;

/// Link value carried by messages that were never persisted; it is not a
/// valid lookup key.
pub const UNSAVED_LINK: &str = "unsaved";

/// Delivery state of a message. Transitions are forward-only: once a message
/// is `Sent` or `Failed` it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::Type)]
#[repr(i32)]
pub enum MessageStatus {
    #[default]
    Unknown = 0,
    Pending = 1,
    Sent = 2,
    Failed = 3,
    AsyncPending = 4,
}

// Exposed over the API as a plain integer.
impl Serialize for MessageStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(*self as i32)
    }
}

#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub content: String,
    pub url: String,
    pub btntxt: String,
    pub channel: String,
    pub timestamp: i64,
    pub link: String,
    pub to: String,
    pub status: MessageStatus,
    pub render_mode: String,
    pub articles: Json<Vec<Article>>,
    // Request-scoped fields, never persisted.
    #[sqlx(default)]
    #[serde(skip_serializing)]
    pub token: String,
    #[sqlx(default)]
    #[serde(skip_serializing)]
    pub async_send: bool,
}

/// One entry of a digest/news payload. News-style dialects use the first
/// four fields; rich-news dialects use the rest as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Article {
    pub title: String,
    pub description: String,
    pub url: String,
    pub picurl: String,
    pub thumb_media_id: String,
    pub author: String,
    pub content_source_url: String,
    pub content: String,
    pub digest: String,
}

/// Projection returned by list/search endpoints.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageSummary {
    pub id: i64,
    pub title: String,
    pub channel: String,
    pub timestamp: i64,
    pub link: String,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Channel {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub channel_type: String,
    pub app_id: String,
    pub account_id: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// Type-specific discriminator, e.g. the client-type tag selecting a
    /// message-format dialect for corporate-IM channels.
    pub other: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub status: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Push auth token; compared against the per-message token.
    pub token: String,
    /// Default channel name used when a request names none.
    pub channel: String,
    pub save_messages: i32,
    /// Optional companion surface that receives a best-effort copy of every
    /// accepted message.
    pub sync_endpoint: Option<String>,
    pub status: i32,
}
