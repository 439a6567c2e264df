//! Channel handle resolution.
//!
//! Maps a human handle (`@name`) to a canonical `UC…` channel ID. The only
//! implementation scrapes the public channel page; callers depend on the
//! [`ChannelResolver`] trait so an API-backed resolver can replace it.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::{Error, Result};

/// Maximum number of page bytes inspected.
const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

const DEFAULT_BASE_URL: &str = "https://www.youtube.com";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

static CANONICAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link rel="canonical" href="https://www\.youtube\.com/channel/(UC[\w-]{22})""#)
        .unwrap()
});
static EXTERNAL_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""externalId":"(UC[\w-]{22})""#).unwrap());
static CHANNEL_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"UC[\w-]{22}").unwrap());

/// Resolves a channel handle to a channel ID.
#[async_trait]
pub trait ChannelResolver: Send + Sync {
    async fn resolve(&self, handle: &str) -> Result<String>;
}

/// Prefix `@` unless already present. Returns `None` for a blank handle.
pub fn normalize_handle(handle: &str) -> Option<String> {
    let handle = handle.trim();
    if handle.is_empty() || handle == "@" {
        return None;
    }
    if handle.starts_with('@') {
        Some(handle.to_string())
    } else {
        Some(format!("@{handle}"))
    }
}

/// Find a channel ID in raw channel page HTML.
pub fn find_channel_id(html: &str) -> Option<String> {
    [&*CANONICAL_REGEX, &*EXTERNAL_ID_REGEX]
        .into_iter()
        .find_map(|re| re.captures(html).map(|c| c[1].to_string()))
        .or_else(|| CHANNEL_ID_REGEX.find(html).map(|m| m.as_str().to_string()))
}

/// Resolver scraping the public channel "about" page.
pub struct HtmlChannelResolver {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HtmlChannelResolver {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, DEFAULT_BASE_URL)
    }

    /// Point the resolver at another origin.
    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let mut response = self.client.get(url).timeout(self.timeout).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Resolve(format!("{url} returned {status}")));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let remaining = MAX_PAGE_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
            if body.len() >= MAX_PAGE_BYTES {
                break;
            }
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait]
impl ChannelResolver for HtmlChannelResolver {
    async fn resolve(&self, handle: &str) -> Result<String> {
        let handle = normalize_handle(handle)
            .ok_or_else(|| Error::Resolve("channel handle is empty".to_string()))?;

        let url = format!("{}/{}/about", self.base_url, handle);
        let html = self.fetch_page(&url).await?;

        let channel_id = find_channel_id(&html)
            .ok_or_else(|| Error::Resolve(format!("no channel id found for {handle}")))?;

        debug!(handle = %handle, channel_id = %channel_id, "Resolved channel handle");
        Ok(channel_id)
    }
}
