//! Hub-facing callback routes.
//!
//! `GET` answers verification challenges, `POST` receives content
//! notifications. Both live on the configured callback path.

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{Query, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, warn};

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::error::Error;
use crate::websub::{ChallengeQuery, MAX_FEED_BYTES};

pub fn router(callback_path: &str) -> Router<AppState> {
    Router::new().route(callback_path, get(verify).post(notify))
}

async fn verify(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Query<ChallengeQuery>,
) -> Response {
    match state.verifier.handle(&method, uri.path(), &query).await {
        Some(response) => response,
        None => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn notify(State(state): State<AppState>, body: Body) -> Response {
    let bytes = match to_bytes(body, MAX_FEED_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read notification body");
            return ApiError::from(Error::InvalidFeed(format!(
                "body unreadable or larger than {MAX_FEED_BYTES} bytes"
            )))
            .into_response();
        }
    };

    match state.processor.process(&bytes).await {
        Ok(result) => {
            debug!(
                entries = result.entries,
                live = result.live_updates.len(),
                skipped = result.skipped.len(),
                "Notification processed"
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            warn!(error = %e, "Notification not applied");
            ApiError::from(e).into_response()
        }
    }
}
