use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Name used as the default message title when the caller supplies none.
pub const SYSTEM_NAME: &str = "pushgate";

/// What a sender should do when a reactive token refresh fails for a
/// credential that may be shared by several channel rows: retry the send
/// once with whatever (possibly stale) token remains, or surface the
/// original send error untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshFailurePolicy {
    #[default]
    StaleFallback,
    Propagate,
}

impl FromStr for RefreshFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stale" => Ok(RefreshFailurePolicy::StaleFallback),
            "propagate" => Ok(RefreshFailurePolicy::Propagate),
            other => Err(format!(
                "REFRESH_FAILURE_POLICY must be \"stale\" or \"propagate\", got \"{other}\""
            )),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub listen_addr: String,
    /// Public base URL, used to build default message links.
    pub server_address: String,
    pub database_url: String,
    /// Process-wide persistence switch; individual users may opt in even
    /// when this is off.
    pub message_persistence_enabled: bool,
    pub async_queue_capacity: usize,
    pub enqueue_timeout: Duration,
    pub async_workers: usize,
    /// When set, async-pending rows are re-enqueued once at startup.
    pub requeue_on_start: bool,
    pub wecom_api_base: String,
    pub refresh_failure_policy: RefreshFailurePolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let listen_addr = env_or("LISTEN_ADDR", "0.0.0.0:3000");
        let server_address = env_or("SERVER_ADDRESS", "http://localhost:3000");
        let database_url = env_or("DATABASE_URL", "sqlite://pushgate.db");
        let message_persistence_enabled =
            parse_var("MESSAGE_PERSISTENCE_ENABLED", false)?;
        let async_queue_capacity = parse_var("ASYNC_QUEUE_CAPACITY", 128usize)?;
        let enqueue_timeout_ms = parse_var("ENQUEUE_TIMEOUT_MS", 1000u64)?;
        let async_workers = parse_var("ASYNC_WORKERS", 2usize)?;
        let requeue_on_start = parse_var("REQUEUE_ON_START", false)?;
        let wecom_api_base = env_or("WECOM_API_BASE", "https://qyapi.weixin.qq.com");
        let refresh_failure_policy =
            parse_var("REFRESH_FAILURE_POLICY", RefreshFailurePolicy::default())?;

        Ok(Config {
            listen_addr,
            server_address,
            database_url,
            message_persistence_enabled,
            async_queue_capacity,
            enqueue_timeout: Duration::from_millis(enqueue_timeout_ms),
            async_workers,
            requeue_on_start,
            wecom_api_base,
            refresh_failure_policy,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| format!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}
