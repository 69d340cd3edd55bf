//! Runtime configuration from `ROAM_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use roam_types::UserId;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub user_id: UserId,
    pub store_url: String,
    /// Push gateway. Without one, conversations run in degraded mode.
    pub gateway_url: Option<String>,
    pub auth_token: Option<String>,
    pub cache_path: PathBuf,
    pub bootstrap: RetryPolicy,
    pub send: RetryPolicy,
    pub request_timeout: Duration,
    pub retention_sweep_interval: Duration,
}

impl ChatConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_overriding(|_| None)
    }

    /// Like [`from_env`](Self::from_env), but `overrides` is consulted first
    /// for every key (command-line flags).
    pub fn from_env_overriding<O>(overrides: O) -> Result<Self>
    where
        O: Fn(&str) -> Option<String>,
    {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key: &str| overrides(key).or_else(|| std::env::var(key).ok()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(user_id) = get("ROAM_USER_ID") else {
            bail!("ROAM_USER_ID is not set");
        };
        let store_url = get("ROAM_STORE_URL").unwrap_or_else(|| "http://127.0.0.1:3210".into());
        let cache_path = get("ROAM_CACHE_PATH").unwrap_or_else(|| "roam-cache.db".into());

        let bootstrap = RetryPolicy::new(
            parse_or(&get, "ROAM_BOOTSTRAP_ATTEMPTS", RetryPolicy::BOOTSTRAP.max_attempts)?,
            millis_or(&get, "ROAM_BOOTSTRAP_DELAY_MS", RetryPolicy::BOOTSTRAP.base_delay)?,
        );
        let send = RetryPolicy::new(
            parse_or(&get, "ROAM_SEND_ATTEMPTS", RetryPolicy::MESSAGE_SEND.max_attempts)?,
            millis_or(&get, "ROAM_SEND_DELAY_MS", RetryPolicy::MESSAGE_SEND.base_delay)?,
        );

        Ok(Self {
            user_id: UserId::new(user_id.trim()),
            store_url: store_url.trim_end_matches('/').to_string(),
            gateway_url: get("ROAM_GATEWAY_URL"),
            auth_token: get("ROAM_AUTH_TOKEN"),
            cache_path: cache_path.into(),
            bootstrap,
            send,
            request_timeout: Duration::from_secs(parse_or(&get, "ROAM_REQUEST_TIMEOUT_SECS", 10)?),
            retention_sweep_interval: Duration::from_secs(parse_or(
                &get,
                "ROAM_RETENTION_SWEEP_SECS",
                3600,
            )?),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn millis_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Ok(Duration::from_millis(parse_or(get, key, default_ms)?))
}
