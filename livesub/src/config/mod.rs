//! Process configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::url::path_of;
use crate::websub::{MAX_LEASE_SECONDS, VerifyMode};
use crate::{Error, Result};

/// Callback path used when no callback URL is configured.
pub const DEFAULT_CALLBACK_PATH: &str = "/websub/callback";

pub const DEFAULT_HUB_URL: &str = "https://pubsubhubbub.appspot.com/subscribe";

/// Application configuration.
///
/// Supported env vars:
/// - `LIVESUB_BIND_ADDRESS`, `LIVESUB_PORT`
/// - `LIVESUB_CALLBACK_URL`, `LIVESUB_HUB_URL`, `LIVESUB_VERIFY_MODE`,
///   `LIVESUB_LEASE_SECONDS`
/// - `LIVESUB_RENEW_INTERVAL_SECS`, `LIVESUB_RENEW_WINDOW`,
///   `LIVESUB_RENEW_RETRY_SECS`
/// - `LIVESUB_STORE_PATH`, `LIVESUB_LOG_DIR`, `LIVESUB_ADMIN_TOKEN`
/// - `YOUTUBE_API_KEY`
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub port: u16,
    /// Default callback URL sent to the hub. May be empty.
    pub callback_url: String,
    /// Path the verification and notification routes are mounted on.
    pub callback_path: String,
    pub hub_url: String,
    pub verify_mode: VerifyMode,
    pub lease_seconds: i64,
    pub renew_interval: Duration,
    pub renew_window: f64,
    pub renew_retry: Option<Duration>,
    pub store_path: PathBuf,
    pub log_dir: String,
    pub admin_token: Option<String>,
    pub youtube_api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            callback_url: String::new(),
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            hub_url: DEFAULT_HUB_URL.to_string(),
            verify_mode: VerifyMode::Async,
            lease_seconds: MAX_LEASE_SECONDS,
            renew_interval: Duration::from_secs(60),
            renew_window: 0.05,
            renew_retry: None,
            store_path: PathBuf::from("data/streamers.json"),
            log_dir: "logs".to_string(),
            admin_token: None,
            youtube_api_key: None,
        }
    }
}

impl AppConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variables. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(bind_address) = get("LIVESUB_BIND_ADDRESS") {
            config.bind_address = bind_address;
        }
        if let Some(port) = get("LIVESUB_PORT") {
            config.port = parse_var("LIVESUB_PORT", &port)?;
        }

        if let Some(callback_url) = get("LIVESUB_CALLBACK_URL") {
            let path = path_of(&callback_url).ok_or_else(|| {
                Error::config(format!("LIVESUB_CALLBACK_URL is not an absolute URL: {callback_url}"))
            })?;
            if path.starts_with("/api/") || path == "/health" || path.starts_with("/health/") {
                return Err(Error::config(format!(
                    "LIVESUB_CALLBACK_URL path {path} collides with a built-in route"
                )));
            }
            config.callback_path = if path.is_empty() {
                "/".to_string()
            } else {
                path
            };
            config.callback_url = callback_url;
        }

        if let Some(hub_url) = get("LIVESUB_HUB_URL") {
            config.hub_url = hub_url;
        }
        if let Some(mode) = get("LIVESUB_VERIFY_MODE") {
            config.verify_mode = VerifyMode::from_str(&mode)
                .map_err(|_| Error::config(format!("LIVESUB_VERIFY_MODE must be sync or async, got {mode}")))?;
        }

        if let Some(lease) = get("LIVESUB_LEASE_SECONDS") {
            let lease: i64 = parse_var("LIVESUB_LEASE_SECONDS", &lease)?;
            if lease <= 0 || lease > MAX_LEASE_SECONDS {
                return Err(Error::config(format!(
                    "LIVESUB_LEASE_SECONDS must be between 1 and {MAX_LEASE_SECONDS}"
                )));
            }
            config.lease_seconds = lease;
        }

        if let Some(interval) = get("LIVESUB_RENEW_INTERVAL_SECS") {
            let secs: u64 = parse_var("LIVESUB_RENEW_INTERVAL_SECS", &interval)?;
            if secs == 0 {
                return Err(Error::config("LIVESUB_RENEW_INTERVAL_SECS must be positive"));
            }
            config.renew_interval = Duration::from_secs(secs);
        }
        if let Some(window) = get("LIVESUB_RENEW_WINDOW") {
            config.renew_window = parse_var("LIVESUB_RENEW_WINDOW", &window)?;
        }
        if let Some(retry) = get("LIVESUB_RENEW_RETRY_SECS") {
            let secs: u64 = parse_var("LIVESUB_RENEW_RETRY_SECS", &retry)?;
            config.renew_retry = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(store_path) = get("LIVESUB_STORE_PATH") {
            config.store_path = PathBuf::from(store_path);
        }
        if let Some(log_dir) = get("LIVESUB_LOG_DIR") {
            config.log_dir = log_dir;
        }

        config.admin_token = get("LIVESUB_ADMIN_TOKEN");
        config.youtube_api_key = get("YOUTUBE_API_KEY");

        Ok(config)
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| Error::config(format!("{key}={raw}: {e}")))
}
