//! Hub challenge verification.
//!
//! A token moves `pending -> verified` here. Rejected attempts leave the
//! expectation pending so a hub retry with correct parameters still works.

use std::sync::Arc;

use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::expectation::{Expectation, ExpectationRegistry};
use super::request::Mode;
use crate::Error;
use crate::store::StreamerStore;
use crate::utils::url::extract_channel_id;

/// Query parameters of a hub verification request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChallengeQuery {
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
    #[serde(rename = "hub.lease_seconds")]
    pub lease_seconds: Option<String>,
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
}

/// Why a challenge was refused. Always answered with 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeRejection {
    #[error("missing hub.challenge")]
    MissingChallenge,
    #[error("missing hub.verify_token")]
    MissingVerifyToken,
    #[error("unknown hub.verify_token")]
    UnknownVerifyToken,
    #[error("hub.topic mismatch")]
    TopicMismatch,
    #[error("invalid hub.lease_seconds")]
    InvalidLease,
    #[error("hub.lease_seconds mismatch")]
    LeaseMismatch,
    #[error("hub.mode mismatch")]
    ModeMismatch,
}

impl IntoResponse for ChallengeRejection {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// A challenge that passed every check.
#[derive(Debug, Clone)]
pub struct AcceptedChallenge {
    pub challenge: String,
    pub expectation: Expectation,
    /// Lease announced by the hub, if any.
    pub lease_seconds: Option<i64>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Handles GET verification requests on the callback path.
pub struct VerificationHandler {
    registry: Arc<ExpectationRegistry>,
    store: Arc<dyn StreamerStore>,
    callback_path: String,
}

impl VerificationHandler {
    pub fn new(
        registry: Arc<ExpectationRegistry>,
        store: Arc<dyn StreamerStore>,
        callback_path: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            callback_path: callback_path.into(),
        }
    }

    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    /// Handle a request if it is a GET on the callback path.
    ///
    /// Returns `None` when the request is not ours, so the caller can try
    /// other routes.
    pub async fn handle(&self, method: &Method, path: &str, query: &ChallengeQuery) -> Option<Response> {
        if method != Method::GET || path != self.callback_path {
            return None;
        }
        Some(self.verify(query).await)
    }

    /// Validate `query` against the registered expectation without consuming it.
    pub fn check(&self, query: &ChallengeQuery) -> Result<AcceptedChallenge, ChallengeRejection> {
        let challenge = non_empty(&query.challenge).ok_or(ChallengeRejection::MissingChallenge)?;
        let token = non_empty(&query.verify_token).ok_or(ChallengeRejection::MissingVerifyToken)?;
        let expectation = self
            .registry
            .lookup(token)
            .ok_or(ChallengeRejection::UnknownVerifyToken)?;

        if !expectation.topic.is_empty() && query.topic.as_deref().unwrap_or("") != expectation.topic {
            return Err(ChallengeRejection::TopicMismatch);
        }

        let lease_seconds = match non_empty(&query.lease_seconds) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<i64>()
                    .map_err(|_| ChallengeRejection::InvalidLease)?,
            ),
            None => None,
        };
        if let Some(lease) = lease_seconds
            && expectation.lease_seconds > 0
            && expectation.mode != Mode::Unsubscribe
            && lease != expectation.lease_seconds
        {
            return Err(ChallengeRejection::LeaseMismatch);
        }

        if !query
            .mode
            .as_deref()
            .unwrap_or("")
            .eq_ignore_ascii_case(expectation.mode.as_str())
        {
            return Err(ChallengeRejection::ModeMismatch);
        }

        Ok(AcceptedChallenge {
            challenge: challenge.to_string(),
            expectation,
            lease_seconds,
        })
    }

    /// Run the full handshake and build the response.
    pub async fn verify(&self, query: &ChallengeQuery) -> Response {
        let accepted = match self.check(query) {
            Ok(accepted) => accepted,
            Err(rejection) => {
                warn!(
                    reason = %rejection,
                    topic = ?query.topic,
                    mode = ?query.mode,
                    "Rejected hub verification"
                );
                return rejection.into_response();
            }
        };

        // Consuming is the single point of truth for exactly-once: a
        // concurrent duplicate that passed `check` loses here.
        let token = accepted.expectation.verify_token.as_str();
        let Some(expectation) = self.registry.consume(token) else {
            return ChallengeRejection::UnknownVerifyToken.into_response();
        };

        if expectation.mode == Mode::Subscribe
            && let Some(lease) = accepted.lease_seconds
        {
            self.record_lease(&expectation, lease).await;
        }

        info!(
            mode = %expectation.mode,
            topic = %expectation.topic,
            channel_id = %expectation.channel_id,
            alias = %expectation.alias,
            lease_seconds = ?accepted.lease_seconds,
            hub_status = ?expectation.hub_status,
            "Hub verification succeeded"
        );

        challenge_response(accepted.challenge)
    }

    async fn record_lease(&self, expectation: &Expectation, lease_seconds: i64) {
        let channel_id = if expectation.channel_id.is_empty() {
            extract_channel_id(&expectation.topic)
        } else {
            expectation.channel_id.clone()
        };
        if channel_id.is_empty() {
            debug!(topic = %expectation.topic, "No channel id for verified lease");
            return;
        }

        match self
            .store
            .record_lease(&channel_id, Utc::now(), Some(lease_seconds))
            .await
        {
            Ok(()) => debug!(channel_id = %channel_id, lease_seconds, "Recorded lease"),
            Err(Error::NotFound { .. }) => {
                debug!(channel_id = %channel_id, "Verified channel is not a tracked streamer")
            }
            Err(e) => warn!(channel_id = %channel_id, error = %e, "Failed to record lease"),
        }
    }
}

/// 200 with the challenge echoed byte-for-byte.
fn challenge_response(challenge: String) -> Response {
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (CONTENT_LENGTH, challenge.len().to_string()),
        ],
        challenge,
    )
        .into_response()
}
