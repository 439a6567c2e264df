//! API route modules.
//!
//! Organizes routes by resource type.

pub mod health;
pub mod logging;
pub mod streamers;
pub mod subscriptions;
pub mod websub;

use axum::{Router, middleware};

use crate::api::middleware::require_admin;
use crate::api::server::AppState;

/// Create the main router with all routes.
///
/// `/api` routes sit behind the admin token; the callback and health
/// routes do not.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(subscriptions::router())
        .merge(streamers::router())
        .merge(logging::router())
        .route_layer(middleware::from_fn_with_state(
            state.admin_auth.clone(),
            require_admin,
        ));

    Router::new()
        .merge(api)
        .merge(health::router())
        .merge(websub::router(state.verifier.callback_path()))
        .with_state(state)
}
