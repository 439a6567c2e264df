//! Logging API routes.
//!
//! View and change the active log filter at runtime.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilter {
    pub filter: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/logging/filter", get(get_filter).put(set_filter))
}

async fn get_filter(State(state): State<AppState>) -> ApiResult<Json<LogFilter>> {
    let config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging is not configured"))?;
    Ok(Json(LogFilter {
        filter: config.get_filter(),
    }))
}

async fn set_filter(
    State(state): State<AppState>,
    Json(body): Json<LogFilter>,
) -> ApiResult<Json<LogFilter>> {
    let config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging is not configured"))?;
    config.set_filter(body.filter.trim())?;
    Ok(Json(LogFilter {
        filter: config.get_filter(),
    }))
}
