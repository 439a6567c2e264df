//! Read-only streamer routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::store::StreamerRecord;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/streamers", get(list_streamers))
        .route("/api/streamers/{id}", get(get_streamer))
}

/// Hub secrets never leave the process.
fn redact(mut record: StreamerRecord) -> StreamerRecord {
    if let Some(yt) = record.youtube.as_mut() {
        yt.hub_secret = None;
    }
    record
}

async fn list_streamers(State(state): State<AppState>) -> ApiResult<Json<Vec<StreamerRecord>>> {
    let records = state.store.list().await?;
    Ok(Json(records.into_iter().map(redact).collect()))
}

async fn get_streamer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamerRecord>> {
    let record = state.store.get(&id).await?;
    Ok(Json(redact(record)))
}
