//! Registry of pending verification handshakes.
//!
//! Every outbound subscribe/unsubscribe registers an [`Expectation`] keyed
//! by its verify token before the request leaves the process. The matching
//! hub challenge consumes it exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::request::Mode;

/// Pending expectations older than this are dropped by the expiry sweep.
pub const DEFAULT_EXPECTATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A pending or fulfilled subscription handshake.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expectation {
    pub mode: Mode,
    pub topic: String,
    pub verify_token: String,
    /// Zero for unsubscribe.
    pub lease_seconds: i64,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub channel_id: String,
    pub alias: String,
    /// Last hub response status, for diagnostics.
    pub hub_status: Option<u16>,
    /// Last hub response body, for diagnostics.
    pub hub_body: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Expectation {
    pub fn new(mode: Mode, topic: impl Into<String>, verify_token: impl Into<String>) -> Self {
        Self {
            mode,
            topic: topic.into(),
            verify_token: verify_token.into(),
            lease_seconds: 0,
            secret: None,
            channel_id: String::new(),
            alias: String::new(),
            hub_status: None,
            hub_body: None,
            created_at: Utc::now(),
        }
    }
}

/// In-memory table of outstanding verify tokens.
///
/// One instance lives for the whole server process and is shared by the
/// hub client and the verification handler.
#[derive(Debug, Default)]
pub struct ExpectationRegistry {
    entries: Mutex<HashMap<String, Expectation>>,
}

impl ExpectationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a fresh 128-bit verify token, hex-encoded.
    ///
    /// Falls back to a timestamp-derived value if the OS random source is
    /// unavailable; never fails.
    pub fn generate_token() -> String {
        let mut bytes = [0u8; 16];
        match OsRng.try_fill_bytes(&mut bytes) {
            Ok(()) => hex::encode(bytes),
            Err(error) => {
                warn!(error = %error, "OS random source unavailable; using time-based verify token");
                let nanos = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or_default();
                format!("{nanos:032x}")
            }
        }
    }

    /// Store `exp` under its verify token. Blank tokens are ignored.
    pub fn register(&self, exp: Expectation) {
        if exp.verify_token.is_empty() {
            return;
        }
        self.entries.lock().insert(exp.verify_token.clone(), exp);
    }

    pub fn lookup(&self, token: &str) -> Option<Expectation> {
        self.entries.lock().get(token).cloned()
    }

    /// Atomically read and remove the expectation for `token`.
    pub fn consume(&self, token: &str) -> Option<Expectation> {
        self.entries.lock().remove(token)
    }

    /// Remove `token` if present.
    pub fn cancel(&self, token: &str) {
        self.entries.lock().remove(token);
    }

    /// Merge the latest hub response into the stored entry, if any.
    ///
    /// `alias` and `topic` only overwrite when non-empty.
    pub fn record_result(&self, token: &str, alias: &str, topic: &str, status: u16, body: &str) {
        let mut entries = self.entries.lock();
        let Some(exp) = entries.get_mut(token) else {
            return;
        };
        if !alias.is_empty() {
            exp.alias = alias.to_string();
        }
        if !topic.is_empty() {
            exp.topic = topic.to_string();
        }
        exp.hub_status = Some(status);
        exp.hub_body = Some(body.to_string());
    }

    /// Drop expectations created before `cutoff`. Returns how many were removed.
    pub fn expire_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, exp| exp.created_at >= cutoff);
        before - entries.len()
    }

    /// Periodically drop expectations the hub never verified within `ttl`.
    pub fn start_expiry_sweep(self: &Arc<Self>, ttl: Duration, cancel_token: CancellationToken) {
        let registry = Arc::clone(self);
        let Ok(max_age) = chrono::Duration::from_std(ttl) else {
            warn!(?ttl, "Expectation TTL out of range, expiry sweep disabled");
            return;
        };

        tokio::spawn(async move {
            let sweep_interval = ttl.min(Duration::from_secs(10 * 60));

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Expectation expiry sweep shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(sweep_interval) => {
                        let expired = registry.expire_older_than(Utc::now() - max_age);
                        if expired > 0 {
                            info!(expired, "Dropped unverified expectations");
                        }
                    }
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of all pending expectations, oldest first.
    pub fn snapshot(&self) -> Vec<Expectation> {
        let mut all: Vec<Expectation> = self.entries.lock().values().cloned().collect();
        all.sort_by_key(|e| e.created_at);
        all
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn expectation(token: &str) -> Expectation {
        let mut exp = Expectation::new(Mode::Subscribe, "https://x?channel_id=UC123", token);
        exp.lease_seconds = 864000;
        exp.channel_id = "UC123".into();
        exp
    }

    #[test]
    fn test_generate_token_is_hex_and_unique() {
        let tokens: HashSet<String> = (0..64).map(|_| ExpectationRegistry::generate_token()).collect();
        assert_eq!(tokens.len(), 64);
        for token in &tokens {
            assert_eq!(token.len(), 32);
            assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_expire_older_than_drops_stale_entries() {
        let registry = ExpectationRegistry::new();
        let now = Utc::now();

        let mut stale = expectation("old");
        stale.created_at = now - chrono::Duration::hours(25);
        registry.register(stale);
        registry.register(expectation("fresh"));

        assert_eq!(registry.expire_older_than(now - chrono::Duration::hours(24)), 1);
        assert!(registry.lookup("old").is_none());
        assert!(registry.lookup("fresh").is_some());
        assert_eq!(registry.expire_older_than(now - chrono::Duration::hours(24)), 0);
    }

    #[tokio::test]
    async fn test_expiry_sweep_runs_until_cancelled() {
        let registry = Arc::new(ExpectationRegistry::new());
        let mut stale = expectation("old");
        stale.created_at = Utc::now() - chrono::Duration::hours(2);
        registry.register(stale);

        let cancel = CancellationToken::new();
        registry.start_expiry_sweep(Duration::from_millis(50), cancel.clone());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(registry.is_empty());

        cancel.cancel();
    }

    #[test]
    fn test_register_lookup_consume() {
        let registry = ExpectationRegistry::new();
        let token = ExpectationRegistry::generate_token();
        let exp = expectation(&token);

        registry.register(exp.clone());
        assert_eq!(registry.lookup(&token), Some(exp.clone()));

        assert_eq!(registry.consume(&token), Some(exp));
        assert_eq!(registry.lookup(&token), None);
        assert_eq!(registry.consume(&token), None);
    }

    #[test]
    fn test_blank_token_is_ignored() {
        let registry = ExpectationRegistry::new();
        registry.register(expectation(""));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_missing_is_noop() {
        let registry = ExpectationRegistry::new();
        registry.cancel("nope");
        registry.register(expectation("t1"));
        registry.cancel("t1");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_record_result_merges_non_empty_fields() {
        let registry = ExpectationRegistry::new();
        let mut exp = expectation("t1");
        exp.alias = "original".into();
        registry.register(exp);

        registry.record_result("t1", "", "", 202, "Accepted");
        let stored = registry.lookup("t1").unwrap();
        assert_eq!(stored.alias, "original");
        assert_eq!(stored.topic, "https://x?channel_id=UC123");
        assert_eq!(stored.hub_status, Some(202));
        assert_eq!(stored.hub_body.as_deref(), Some("Accepted"));

        registry.record_result("t1", "renamed", "https://y", 204, "");
        let stored = registry.lookup("t1").unwrap();
        assert_eq!(stored.alias, "renamed");
        assert_eq!(stored.topic, "https://y");

        // Unknown tokens are ignored.
        registry.record_result("missing", "a", "b", 500, "c");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_consume_succeeds_once() {
        let registry = Arc::new(ExpectationRegistry::new());
        registry.register(expectation("race"));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.consume("race").is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
