//! Operator routes for WebSub subscriptions.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::error::Error;
use crate::websub::{Expectation, Mode, SubscriptionRequest, VerifyMode};

/// Body of a subscribe/unsubscribe call. Every field is optional; blanks
/// fall back to the operator defaults.
#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionBody {
    pub topic: Option<String>,
    pub channel_id: Option<String>,
    pub handle: Option<String>,
    pub callback: Option<String>,
    pub hub_url: Option<String>,
    pub verify: Option<String>,
    pub lease_seconds: Option<i64>,
    pub secret: Option<String>,
    pub alias: Option<String>,
}

impl SubscriptionBody {
    fn into_request(self, mode: Mode) -> ApiResult<SubscriptionRequest> {
        let mut req = SubscriptionRequest::new(mode);
        req.topic = self.topic.unwrap_or_default();
        req.channel_id = self.channel_id.unwrap_or_default();
        req.handle = self.handle.unwrap_or_default();
        req.callback = self.callback.unwrap_or_default();
        req.hub_url = self.hub_url.unwrap_or_default();
        req.verify = match self.verify.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(mode) => Some(mode.parse::<VerifyMode>()?),
        };
        req.lease_seconds = self.lease_seconds;
        req.secret = self.secret.filter(|s| !s.is_empty());
        req.alias = self.alias.unwrap_or_default();
        Ok(req)
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/websub/subscribe", post(subscribe))
        .route("/api/websub/unsubscribe", post(unsubscribe))
        .route("/api/websub/expectations", get(list_expectations))
}

async fn subscribe(State(state): State<AppState>, Json(body): Json<SubscriptionBody>) -> Response {
    send(&state, body, Mode::Subscribe).await
}

async fn unsubscribe(State(state): State<AppState>, Json(body): Json<SubscriptionBody>) -> Response {
    send(&state, body, Mode::Unsubscribe).await
}

/// Forward to the hub and mirror its status and body.
async fn send(state: &AppState, body: SubscriptionBody, mode: Mode) -> Response {
    let req = match body.into_request(mode) {
        Ok(req) => req,
        Err(e) => return e.into_response(),
    };

    match state.hub_client.send(req).await {
        Ok(response) => (response.status, response.body).into_response(),
        Err(Error::HubRejected { status, body }) => (status, body).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Pending expectations with the last hub response recorded for each.
async fn list_expectations(State(state): State<AppState>) -> Json<Vec<Expectation>> {
    Json(state.registry.snapshot())
}
