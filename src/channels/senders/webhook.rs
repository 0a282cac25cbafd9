use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::channels::{Sender, SenderError};
use crate::db::models::{Channel, Message, User};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Pushes the message as a JSON document to the URL stored in the channel's
/// app identifier. Any non-2xx response is a failure.
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    title: &'a str,
    description: &'a str,
    content: &'a str,
    url: &'a str,
    link: &'a str,
}

#[async_trait]
impl Sender for WebhookSender {
    async fn send(
        &self,
        message: &Message,
        _user: &User,
        channel: &Channel,
    ) -> Result<(), SenderError> {
        if channel.app_id.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "webhook channel has no target URL".to_string(),
            ));
        }
        let payload = WebhookPayload {
            title: &message.title,
            description: &message.description,
            content: &message.content,
            url: &message.url,
            link: &message.link,
        };
        let response = self
            .client
            .post(&channel.app_id)
            .timeout(SEND_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "webhook returned non-success status: {status}. Body: {body}"
            )));
        }
        Ok(())
    }
}
