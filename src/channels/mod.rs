use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::config::Config;
use crate::db::models::{Channel, Message, TYPE_WEBHOOK, TYPE_WECOM, User};

pub mod senders;
pub mod token_store;

use senders::webhook::WebhookSender;
use senders::wecom::WecomSender;
use token_store::TokenStore;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("invalid channel configuration: {0}")]
    InvalidConfiguration(String),
    #[error("channel API error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unsupported channel type: {0}")]
    UnsupportedChannel(String),
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// One concrete implementation per channel type. A sender performs exactly
/// one outbound delivery call (plus at most one token refresh through the
/// token store) and never touches message state.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(
        &self,
        message: &Message,
        user: &User,
        channel: &Channel,
    ) -> Result<(), SenderError>;
}

/// Lookup table from a channel's declared type name to its sender.
pub struct ChannelRegistry {
    senders: HashMap<String, Arc<dyn Sender>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self { senders: HashMap::new() }
    }

    /// Registry with all built-in channel types.
    pub fn standard(pool: SqlitePool, config: &Config) -> Self {
        let tokens = Arc::new(TokenStore::new(config.wecom_api_base.clone()));
        let mut registry = Self::new();
        registry.register(
            TYPE_WECOM,
            Arc::new(WecomSender::new(
                config.wecom_api_base.clone(),
                tokens,
                pool,
                config.refresh_failure_policy,
            )),
        );
        registry.register(TYPE_WEBHOOK, Arc::new(WebhookSender::new()));
        registry
    }

    pub fn register(&mut self, channel_type: impl Into<String>, sender: Arc<dyn Sender>) {
        self.senders.insert(channel_type.into(), sender);
    }

    pub async fn send(
        &self,
        message: &Message,
        user: &User,
        channel: &Channel,
    ) -> Result<(), SenderError> {
        match self.senders.get(&channel.channel_type) {
            Some(sender) => sender.send(message, user, channel).await,
            None => Err(SenderError::UnsupportedChannel(channel.channel_type.clone())),
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
