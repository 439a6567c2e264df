//! Operator authentication middleware.
//!
//! Guards the `/api` routes with a static bearer token. The hub-facing
//! callback and the health probes stay open.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::api::error::ApiError;

/// Bearer token authentication configuration.
#[derive(Debug, Clone, Default)]
pub struct AdminAuth {
    /// Accepted token. `None` disables the check.
    token: Option<Arc<str>>,
}

impl AdminAuth {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Check the `Authorization: Bearer <token>` header.
    pub fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.token.as_deref() else {
            return true;
        };

        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|presented| constant_time_eq(presented.trim().as_bytes(), expected.as_bytes()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Middleware function for operator authentication.
pub async fn require_admin(State(auth): State<AdminAuth>, request: Request, next: Next) -> Response {
    if auth.is_authorized(request.headers()) {
        return next.run(request).await;
    }

    if request.headers().contains_key(AUTHORIZATION) {
        tracing::warn!(path = %request.uri().path(), "Invalid admin token provided");
    } else {
        tracing::warn!(path = %request.uri().path(), "Missing admin token in request");
    }
    ApiError::unauthorized("A valid bearer token is required").into_response()
}
