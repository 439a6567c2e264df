//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::api::server::AppState;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
}

/// Component health status.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .route("/health/live", get(liveness_check))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = match state.store.list().await {
        Ok(records) => ComponentHealth {
            name: "store".to_string(),
            status: "healthy".to_string(),
            message: Some(format!("{} streamers", records.len())),
        },
        Err(e) => ComponentHealth {
            name: "store".to_string(),
            status: "unhealthy".to_string(),
            message: Some(e.to_string()),
        },
    };
    let expectations = ComponentHealth {
        name: "expectations".to_string(),
        status: "healthy".to_string(),
        message: Some(format!("{} pending", state.registry.len())),
    };

    let status = if store.status == "healthy" {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        components: vec![store, expectations],
    })
}

/// HTTP 200 once the store is readable, 503 otherwise.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list().await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "not ready")
        }
    }
}

async fn liveness_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "uptime_secs": uptime
        })),
    )
}
