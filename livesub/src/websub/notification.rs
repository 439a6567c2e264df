//! Inbound notification processing.
//!
//! Turns a hub-delivered Atom feed into live-status updates.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::store::{LiveStatus, StreamerStore};
use crate::youtube::VideoLookup;
use crate::{Error, Result};

/// Maximum accepted feed size.
pub const MAX_FEED_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

/// One `<entry>`. Namespaced `yt:` elements are matched by local name.
#[derive(Debug, Deserialize)]
struct AtomEntry {
    #[serde(rename = "videoId", default)]
    video_id: String,
    #[serde(rename = "channelId", default)]
    channel_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    updated: String,
}

/// A channel that was marked live.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveUpdate {
    pub channel_id: String,
    pub video_id: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
}

/// A video that did not lead to a store update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedVideo {
    pub video_id: String,
    pub reason: String,
}

/// Summary of one processed notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationResult {
    pub entries: usize,
    pub video_ids: Vec<String>,
    pub live_updates: Vec<LiveUpdate>,
    pub skipped: Vec<SkippedVideo>,
}

fn decode_feed(body: &[u8]) -> Result<AtomFeed> {
    if body.len() > MAX_FEED_BYTES {
        return Err(Error::InvalidFeed(format!(
            "feed exceeds {MAX_FEED_BYTES} bytes"
        )));
    }
    let text = std::str::from_utf8(body).map_err(|e| Error::InvalidFeed(e.to_string()))?;
    if !text.trim_start().starts_with('<') {
        return Err(Error::InvalidFeed("body is not XML".to_string()));
    }
    quick_xml::de::from_str(text).map_err(|e| Error::InvalidFeed(e.to_string()))
}

/// Distinct non-empty video ids in first-seen order.
fn distinct_video_ids(entries: &[AtomEntry]) -> Vec<String> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .map(|e| e.video_id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Processes hub notifications.
pub struct NotificationProcessor {
    lookup: Arc<dyn VideoLookup>,
    store: Arc<dyn StreamerStore>,
}

impl NotificationProcessor {
    pub fn new(lookup: Arc<dyn VideoLookup>, store: Arc<dyn StreamerStore>) -> Self {
        Self { lookup, store }
    }

    /// Decode `body` and mark channels with live videos as live.
    ///
    /// Fails with [`Error::InvalidFeed`] when the body does not decode, and
    /// with [`Error::LookupFailed`] when metadata could not be fetched.
    pub async fn process(&self, body: &[u8]) -> Result<NotificationResult> {
        let feed = decode_feed(body)?;

        let mut result = NotificationResult {
            entries: feed.entries.len(),
            video_ids: distinct_video_ids(&feed.entries),
            ..Default::default()
        };
        if result.video_ids.is_empty() {
            return Ok(result);
        }

        let videos = self
            .lookup
            .fetch(&result.video_ids)
            .await
            .map_err(|e| Error::LookupFailed {
                video_ids: result.video_ids.clone(),
                message: e.to_string(),
            })?;

        for entry in &feed.entries {
            let video_id = entry.video_id.trim();
            let channel_id = entry.channel_id.trim();
            if video_id.is_empty() || channel_id.is_empty() {
                debug!(video_id, channel_id, "Skipping entry with missing ids");
                continue;
            }

            let Some(info) = videos.get(video_id) else {
                result.skipped.push(SkippedVideo {
                    video_id: video_id.to_string(),
                    reason: "no metadata returned".to_string(),
                });
                continue;
            };
            if !info.is_live() {
                result.skipped.push(SkippedVideo {
                    video_id: video_id.to_string(),
                    reason: format!("not live (liveBroadcastContent={:?})", info.live_broadcast_content),
                });
                continue;
            }

            let started_at = info
                .actual_start_time
                .or_else(|| {
                    DateTime::parse_from_rfc3339(entry.updated.trim())
                        .ok()
                        .map(|t| t.with_timezone(&Utc))
                })
                .unwrap_or_else(Utc::now);
            let title = if info.title.is_empty() {
                entry.title.clone()
            } else {
                info.title.clone()
            };

            match self
                .store
                .update_youtube_live_status(channel_id, LiveStatus::live(video_id, &title, started_at))
                .await
            {
                Ok(()) => {}
                Err(Error::NotFound { .. }) => {
                    result.skipped.push(SkippedVideo {
                        video_id: video_id.to_string(),
                        reason: format!("channel {channel_id} is not tracked"),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            }

            info!(channel_id, video_id, title = %title, started_at = %started_at, "Channel is live");
            result.live_updates.push(LiveUpdate {
                channel_id: channel_id.to_string(),
                video_id: video_id.to_string(),
                title,
                started_at,
            });
        }

        Ok(result)
    }
}
