use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

const REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// The credential tuple that determines a corporate-IM access token,
/// independent of which channel row requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpCredential {
    pub corp_id: String,
    pub agent_id: String,
    pub secret: String,
}

impl CorpCredential {
    pub fn cache_key(&self) -> String {
        format!("{}{}{}", self.corp_id, self.agent_id, self.secret)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    expires_in: i64,
}

#[derive(Default)]
struct TokenEntry {
    token: RwLock<String>,
    // Serializes refreshes for this credential only; unrelated credentials
    // never contend.
    refresh_lock: Mutex<()>,
}

/// Process-wide cache of access tokens keyed by credential identity.
/// Entries live for the process lifetime; staleness is detected reactively
/// when a send fails, not by timer.
pub struct TokenStore {
    http: reqwest::Client,
    api_base: String,
    entries: DashMap<String, Arc<TokenEntry>>,
}

impl TokenStore {
    pub fn new(api_base: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base,
            entries: DashMap::new(),
        }
    }

    /// Returns the cached token for the credential, refreshing it first when
    /// no token is cached yet. Concurrent first-time lookups for one key
    /// coalesce into a single upstream call. The result may be empty when
    /// the refresh failed; callers observe that through the send failing.
    pub async fn get_token(&self, cred: &CorpCredential) -> String {
        let entry = self.entry(cred);
        {
            let token = entry.token.read().await;
            if !token.is_empty() {
                return token.clone();
            }
        }
        let _guard = entry.refresh_lock.lock().await;
        {
            // Another task may have refreshed while we waited for the lock.
            let token = entry.token.read().await;
            if !token.is_empty() {
                return token.clone();
            }
        }
        self.refresh(&entry, cred).await;
        entry.token.read().await.clone()
    }

    /// Reactive refresh after a send was rejected for an expired token.
    /// Skips the upstream call when some other task already replaced the
    /// token the caller observed, so senders sharing one credential do not
    /// refresh redundantly.
    pub async fn refresh_if_stale(&self, cred: &CorpCredential, observed: &str) {
        let entry = self.entry(cred);
        let _guard = entry.refresh_lock.lock().await;
        if entry.token.read().await.as_str() != observed {
            return;
        }
        self.refresh(&entry, cred).await;
    }

    pub async fn current_token(&self, cred: &CorpCredential) -> String {
        self.entry(cred).token.read().await.clone()
    }

    fn entry(&self, cred: &CorpCredential) -> Arc<TokenEntry> {
        Arc::clone(self.entries.entry(cred.cache_key()).or_default().value())
    }

    async fn refresh(&self, entry: &TokenEntry, cred: &CorpCredential) {
        let url = format!(
            "{}/cgi-bin/gettoken?corpid={}&corpsecret={}",
            self.api_base, cred.corp_id, cred.secret
        );
        let response = match self.http.get(&url).timeout(REFRESH_TIMEOUT).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("failed to refresh access token: {e}");
                return;
            }
        };
        let res: TokenResponse = match response.json().await {
            Ok(res) => res,
            Err(e) => {
                error!("failed to decode token response: {e}");
                return;
            }
        };
        if res.errcode != 0 {
            error!("token refresh rejected: {} {}", res.errcode, res.errmsg);
            return;
        }
        *entry.token.write().await = res.access_token;
        info!(corp_id = %cred.corp_id, "access token refreshed");
    }
}
