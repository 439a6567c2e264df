//! YouTube video metadata lookup.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// The videos endpoint accepts at most this many ids per call.
const MAX_IDS_PER_CALL: usize = 50;

/// Metadata about a single video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    /// `live`, `upcoming` or `none`.
    pub live_broadcast_content: String,
    pub actual_start_time: Option<DateTime<Utc>>,
}

impl VideoInfo {
    pub fn is_live(&self) -> bool {
        self.live_broadcast_content.eq_ignore_ascii_case("live")
    }
}

/// Batch lookup of video metadata.
#[async_trait]
pub trait VideoLookup: Send + Sync {
    /// Fetch metadata for `video_ids`. Unknown ids are simply absent from the map.
    async fn fetch(&self, video_ids: &[String]) -> Result<HashMap<String, VideoInfo>>;
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    #[serde(default)]
    snippet: Option<VideoSnippet>,
    #[serde(default)]
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    live_broadcast_content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    #[serde(default)]
    actual_start_time: Option<DateTime<Utc>>,
}

impl From<VideoItem> for VideoInfo {
    fn from(item: VideoItem) -> Self {
        let snippet = item.snippet.unwrap_or(VideoSnippet {
            channel_id: String::new(),
            title: String::new(),
            live_broadcast_content: String::new(),
        });
        Self {
            id: item.id,
            channel_id: snippet.channel_id,
            title: snippet.title,
            live_broadcast_content: snippet.live_broadcast_content,
            actual_start_time: item.live_streaming_details.and_then(|d| d.actual_start_time),
        }
    }
}

/// Lookup backed by the YouTube Data API v3.
pub struct YouTubeVideoLookup {
    client: Client,
    api_key: Option<String>,
    api_base: String,
    timeout: Duration,
}

impl YouTubeVideoLookup {
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch_chunk(&self, api_key: &str, ids: &[String]) -> Result<Vec<VideoInfo>> {
        let url = format!("{}/videos", self.api_base);
        let ids = ids.join(",");
        let response = self
            .client
            .get(&url)
            .query(&[
                ("part", "snippet,liveStreamingDetails"),
                ("id", ids.as_str()),
                ("key", api_key),
            ])
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Other(format!("videos endpoint returned {status}: {body}")));
        }

        let list: VideoListResponse = response.json().await?;
        Ok(list.items.into_iter().map(VideoInfo::from).collect())
    }
}

#[async_trait]
impl VideoLookup for YouTubeVideoLookup {
    async fn fetch(&self, video_ids: &[String]) -> Result<HashMap<String, VideoInfo>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::config("YOUTUBE_API_KEY is not set"))?;

        let mut found = HashMap::with_capacity(video_ids.len());
        for chunk in video_ids.chunks(MAX_IDS_PER_CALL) {
            for info in self.fetch_chunk(api_key, chunk).await? {
                found.insert(info.id.clone(), info);
            }
        }

        debug!(requested = video_ids.len(), found = found.len(), "Fetched video metadata");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Query;
    use axum::routing::get;
    use serde_json::json;

    async fn videos(Query(params): Query<HashMap<String, String>>) -> axum::Json<serde_json::Value> {
        assert_eq!(params.get("key").map(String::as_str), Some("k"));
        let items: Vec<_> = params["id"]
            .split(',')
            .filter(|id| *id != "gone")
            .map(|id| {
                json!({
                    "id": id,
                    "snippet": {
                        "channelId": "UC123",
                        "title": format!("title {id}"),
                        "liveBroadcastContent": if id == "live1" { "live" } else { "none" }
                    },
                    "liveStreamingDetails": {
                        "actualStartTime": "2024-05-01T12:00:00Z"
                    }
                })
            })
            .collect();
        axum::Json(json!({ "items": items }))
    }

    async fn spawn_api() -> String {
        let app = Router::new().route("/videos", get(videos));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_is_live() {
        let mut info = VideoInfo::default();
        assert!(!info.is_live());
        info.live_broadcast_content = "live".into();
        assert!(info.is_live());
    }

    #[tokio::test]
    async fn test_missing_key_fails() {
        let lookup = YouTubeVideoLookup::new(Client::new(), Some("  ".into()));
        let err = lookup.fetch(&["a".into()]).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_fetch_maps_items() {
        let base = spawn_api().await;
        let lookup = YouTubeVideoLookup::new(Client::new(), Some("k".into())).with_api_base(base);

        let ids = vec!["live1".to_string(), "vod1".to_string(), "gone".to_string()];
        let found = lookup.fetch(&ids).await.unwrap();

        assert_eq!(found.len(), 2);
        let live = &found["live1"];
        assert!(live.is_live());
        assert_eq!(live.channel_id, "UC123");
        assert_eq!(live.title, "title live1");
        assert!(live.actual_start_time.is_some());
        assert!(!found["vod1"].is_live());
        assert!(!found.contains_key("gone"));
    }
}
