//! Outbound subscription request parameters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::utils::url::is_https;

/// Maximum lease the hub accepts, in seconds (10 days).
pub const MAX_LEASE_SECONDS: i64 = 864_000;

/// Subscription mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Subscribe,
    Unsubscribe,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Subscribe => "subscribe",
            Mode::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribe" => Ok(Mode::Subscribe),
            "unsubscribe" => Ok(Mode::Unsubscribe),
            other => Err(Error::validation(format!(
                "hub.mode must be subscribe or unsubscribe, got {other:?}"
            ))),
        }
    }
}

/// Verification mode requested from the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    Sync,
    #[default]
    Async,
}

impl VerifyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyMode::Sync => "sync",
            VerifyMode::Async => "async",
        }
    }
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerifyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(VerifyMode::Sync),
            "async" => Ok(VerifyMode::Async),
            other => Err(Error::validation(format!(
                "hub.verify must be sync or async, got {other:?}"
            ))),
        }
    }
}

/// Parameters of one outbound hub call.
///
/// Blank strings and `None` mean "use the operator default"; the hub client
/// fills them in before sending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionRequest {
    pub hub_url: String,
    pub topic: String,
    pub callback: String,
    pub mode: Mode,
    pub verify: Option<VerifyMode>,
    pub verify_token: String,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub lease_seconds: Option<i64>,
    pub channel_id: String,
    /// Channel handle, resolved to a channel ID when no topic or ID is given.
    pub handle: String,
    /// Display name used in diagnostics.
    pub alias: String,
}

impl SubscriptionRequest {
    pub fn new(mode: Mode) -> Self {
        Self {
            hub_url: String::new(),
            topic: String::new(),
            callback: String::new(),
            mode,
            verify: None,
            verify_token: String::new(),
            secret: None,
            lease_seconds: None,
            channel_id: String::new(),
            handle: String::new(),
            alias: String::new(),
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::new(Mode::Subscribe)
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::new(Mode::Unsubscribe)
        }
    }

    /// Check that every required field is present after defaulting.
    pub fn validate(&self) -> crate::Result<()> {
        let required = [
            ("hub url", &self.hub_url),
            ("hub.topic", &self.topic),
            ("hub.callback", &self.callback),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::validation(format!("{name} is required")));
            }
        }
        if self.verify.is_none() {
            return Err(Error::validation("hub.verify is required"));
        }
        if let Some(lease) = self.effective_lease()
            && lease > MAX_LEASE_SECONDS
        {
            return Err(Error::validation(format!(
                "hub.lease_seconds must not exceed {MAX_LEASE_SECONDS}"
            )));
        }
        Ok(())
    }

    /// The lease to announce, if any. Unsubscribe never carries one.
    pub fn effective_lease(&self) -> Option<i64> {
        match self.mode {
            Mode::Subscribe => self.lease_seconds.filter(|s| *s > 0),
            Mode::Unsubscribe => None,
        }
    }

    /// The `application/x-www-form-urlencoded` body sent to the hub.
    pub fn form_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("hub.mode", self.mode.as_str().to_string()),
            ("hub.topic", self.topic.clone()),
            ("hub.callback", self.callback.clone()),
            (
                "hub.verify",
                self.verify.unwrap_or_default().as_str().to_string(),
            ),
            ("hub.verify_token", self.verify_token.clone()),
        ];

        if let Some(lease) = self.effective_lease() {
            pairs.push(("hub.lease_seconds", lease.to_string()));
        }

        // The hub only signs payloads for https callbacks.
        if let Some(secret) = self.secret.as_deref().filter(|s| !s.is_empty())
            && is_https(&self.callback)
        {
            pairs.push(("hub.secret", secret.to_string()));
        }

        pairs
    }
}
