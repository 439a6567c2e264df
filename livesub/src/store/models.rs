//! Streamer record models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked streamer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamerRecord {
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// YouTube WebSub subscription settings, if the streamer is on YouTube.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube: Option<YouTubeSubscription>,
    /// Last known live status.
    #[serde(default)]
    pub live: LiveStatus,
}

impl StreamerRecord {
    /// The YouTube channel ID, if one is configured and non-blank.
    pub fn channel_id(&self) -> Option<&str> {
        self.youtube
            .as_ref()
            .map(|yt| yt.channel_id.trim())
            .filter(|id| !id.is_empty())
    }
}

/// Persisted WebSub state for a YouTube channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YouTubeSubscription {
    pub channel_id: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_secret: Option<String>,
    /// RFC3339 timestamp of the last confirmed lease start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_lease_date: Option<String>,
    #[serde(default)]
    pub lease_seconds: i64,
    #[serde(default)]
    pub callback_url: String,
    #[serde(default)]
    pub hub_url: String,
    #[serde(default)]
    pub verify_mode: String,
    #[serde(default)]
    pub topic: String,
}

/// Live status of a streamer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveStatus {
    pub live: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LiveStatus {
    /// A live status for the given video.
    pub fn live(video_id: impl Into<String>, title: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            live: true,
            video_id: Some(video_id.into()),
            title: Some(title.into()),
            started_at: Some(started_at),
            updated_at: Some(Utc::now()),
        }
    }
}
