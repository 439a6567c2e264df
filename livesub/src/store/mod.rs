//! Streamer record storage.
//!
//! The store is the single source of truth for lease timestamps and live
//! status. The WebSub components never cache this state; every update goes
//! through [`StreamerStore`].

mod json;
mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use json::JsonStreamerStore;
pub use models::{LiveStatus, StreamerRecord, YouTubeSubscription};

use crate::Result;

/// Streamer store trait.
#[async_trait]
pub trait StreamerStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<StreamerRecord>;
    async fn list(&self) -> Result<Vec<StreamerRecord>>;
    /// Update the live status of the streamer owning `channel_id`.
    async fn update_youtube_live_status(&self, channel_id: &str, status: LiveStatus)
    -> Result<()>;
    /// Record a confirmed lease start for `channel_id`.
    ///
    /// `lease_seconds` is the lease granted by the hub, when it told us.
    async fn record_lease(
        &self,
        channel_id: &str,
        verified_at: DateTime<Utc>,
        lease_seconds: Option<i64>,
    ) -> Result<()>;
}
