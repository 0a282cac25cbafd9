use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::channels::token_store::{CorpCredential, TokenStore};
use crate::channels::{Sender, SenderError};
use crate::config::RefreshFailurePolicy;
use crate::db::models::{Channel, Message, User};
use crate::db::services::channel_service;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Error codes the upstream returns for an invalid or expired access token.
const EXPIRED_TOKEN_CODES: [i64; 3] = [40001, 40014, 42001];

/// Corporate-IM sender. The channel's app identifier encodes
/// `corpId|agentId`; the secret is the agent secret, the `other` field the
/// client-type tag that selects the message-format dialect.
pub struct WecomSender {
    http: Client,
    api_base: String,
    tokens: Arc<TokenStore>,
    pool: SqlitePool,
    refresh_failure_policy: RefreshFailurePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    MpNews,
    News,
    TextCard,
    Text,
    Markdown,
}

impl Dialect {
    fn msgtype(self) -> &'static str {
        match self {
            Dialect::MpNews => "mpnews",
            Dialect::News => "news",
            Dialect::TextCard => "textcard",
            Dialect::Text => "text",
            Dialect::Markdown => "markdown",
        }
    }
}

/// Picks the dialect for a message, or `None` when no field combination
/// applies (in which case nothing is sent). A non-"plugin" client forces the
/// markdown dialect whenever body content is present.
fn classify(message: &Message, client_type: &str) -> Option<Dialect> {
    if client_type == "plugin" {
        if let Some(first) = message.articles.first() {
            if !first.content.is_empty() && !first.thumb_media_id.is_empty() {
                return Some(Dialect::MpNews);
            }
            return Some(Dialect::News);
        }
        if !message.title.is_empty() {
            return Some(Dialect::TextCard);
        }
        if !message.content.is_empty() {
            return Some(Dialect::Text);
        }
        None
    } else if !message.content.is_empty() {
        Some(Dialect::Markdown)
    } else {
        None
    }
}

fn parse_app_id(app_id: &str) -> Result<(String, String), SenderError> {
    let parts: Vec<&str> = app_id.split('|').collect();
    if parts.len() != 2 {
        return Err(SenderError::InvalidConfiguration(
            "malformed corp app id, expected corpId|agentId".to_string(),
        ));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

#[derive(Serialize, Default)]
struct SendRequest<'a> {
    msgtype: &'static str,
    touser: &'a str,
    agentid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    textcard: Option<TextCard<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    markdown: Option<TextBody<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    news: Option<News<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mpnews: Option<MpNews<'a>>,
}

#[derive(Serialize)]
struct TextCard<'a> {
    title: &'a str,
    description: &'a str,
    url: &'a str,
    btntxt: &'a str,
}

#[derive(Serialize)]
struct TextBody<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct News<'a> {
    articles: Vec<NewsArticle<'a>>,
}

#[derive(Serialize)]
struct NewsArticle<'a> {
    title: &'a str,
    description: &'a str,
    url: &'a str,
    picurl: &'a str,
}

#[derive(Serialize)]
struct MpNews<'a> {
    articles: Vec<MpNewsArticle<'a>>,
}

#[derive(Serialize)]
struct MpNewsArticle<'a> {
    title: &'a str,
    thumb_media_id: &'a str,
    author: &'a str,
    content_source_url: &'a str,
    content: &'a str,
    digest: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

fn build_request<'a>(
    message: &'a Message,
    agent_id: &'a str,
    to: &'a str,
    dialect: Dialect,
) -> SendRequest<'a> {
    let mut request = SendRequest {
        msgtype: dialect.msgtype(),
        touser: to,
        agentid: agent_id,
        ..Default::default()
    };
    match dialect {
        Dialect::MpNews => {
            request.mpnews = Some(MpNews {
                articles: message
                    .articles
                    .iter()
                    .map(|a| MpNewsArticle {
                        title: &a.title,
                        thumb_media_id: &a.thumb_media_id,
                        author: &a.author,
                        content_source_url: &a.content_source_url,
                        content: &a.content,
                        digest: &a.digest,
                    })
                    .collect(),
            });
        }
        Dialect::News => {
            request.news = Some(News {
                articles: message
                    .articles
                    .iter()
                    .map(|a| NewsArticle {
                        title: &a.title,
                        description: &a.description,
                        url: &a.url,
                        picurl: &a.picurl,
                    })
                    .collect(),
            });
        }
        Dialect::TextCard => {
            request.textcard = Some(TextCard {
                title: &message.title,
                description: &message.description,
                url: &message.url,
                btntxt: &message.btntxt,
            });
        }
        Dialect::Text => {
            request.text = Some(TextBody { content: &message.content });
        }
        Dialect::Markdown => {
            request.markdown = Some(TextBody { content: &message.content });
        }
    }
    request
}

impl WecomSender {
    pub fn new(
        api_base: String,
        tokens: Arc<TokenStore>,
        pool: SqlitePool,
        refresh_failure_policy: RefreshFailurePolicy,
    ) -> Self {
        Self {
            http: Client::new(),
            api_base,
            tokens,
            pool,
            refresh_failure_policy,
        }
    }

    async fn post_message(
        &self,
        token: &str,
        body: &SendRequest<'_>,
    ) -> Result<SendResponse, SenderError> {
        let url = format!(
            "{}/cgi-bin/message/send?access_token={}",
            self.api_base, token
        );
        let response = self
            .http
            .post(&url)
            .timeout(SEND_TIMEOUT)
            .json(body)
            .send()
            .await?;
        Ok(response.json::<SendResponse>().await?)
    }
}

#[async_trait]
impl Sender for WecomSender {
    async fn send(
        &self,
        message: &Message,
        _user: &User,
        channel: &Channel,
    ) -> Result<(), SenderError> {
        let (corp_id, agent_id) = parse_app_id(&channel.app_id)?;
        let to = if message.to.is_empty() {
            channel.account_id.as_str()
        } else {
            message.to.as_str()
        };
        let Some(dialect) = classify(message, &channel.other) else {
            debug!(channel = %channel.name, "no dialect applies, nothing to send");
            return Ok(());
        };
        let body = build_request(message, &agent_id, to, dialect);
        let cred = CorpCredential {
            corp_id,
            agent_id: agent_id.clone(),
            secret: channel.secret.clone(),
        };

        let token = self.tokens.get_token(&cred).await;
        let res = self.post_message(&token, &body).await?;
        if res.errcode == 0 {
            return Ok(());
        }
        if !EXPIRED_TOKEN_CODES.contains(&res.errcode) {
            return Err(SenderError::Api { code: res.errcode, message: res.errmsg });
        }

        // The cached token expired under us. Refresh (coalesced with any
        // concurrent sender holding the same credential) and retry once.
        let shared = channel_service::count_credential_refs(
            &self.pool,
            &channel.secret,
            &channel.app_id,
            &channel.channel_type,
        )
        .await
        .map(|n| n > 1)
        .unwrap_or(false);
        self.tokens.refresh_if_stale(&cred, &token).await;
        let fresh = self.tokens.current_token(&cred).await;
        if fresh == token && self.refresh_failure_policy == RefreshFailurePolicy::Propagate {
            return Err(SenderError::Api { code: res.errcode, message: res.errmsg });
        }
        warn!(shared, channel = %channel.name, "retrying send after access token refresh");
        let retry = self.post_message(&fresh, &body).await?;
        if retry.errcode != 0 {
            return Err(SenderError::Api { code: retry.errcode, message: retry.errmsg });
        }
        Ok(())
    }
}
