//! Subscribe, verify and notify against a running server and a fake hub.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::Form;
use axum::http::StatusCode;
use axum::routing::post;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use livesub::api::{ApiServer, ApiServerConfig, AppState};
use livesub::store::{JsonStreamerStore, StreamerRecord, StreamerStore, YouTubeSubscription};
use livesub::websub::renewal::Clock;
use livesub::websub::{
    ExpectationRegistry, HubClient, HubDefaults, LeaseMonitor, LeaseMonitorConfig,
    NotificationProcessor, VerificationHandler,
};
use livesub::youtube::{VideoInfo, VideoLookup};

const CALLBACK_PATH: &str = "/websub/callback";

type Forms = Arc<Mutex<Vec<HashMap<String, String>>>>;

struct LiveLookup;

#[async_trait]
impl VideoLookup for LiveLookup {
    async fn fetch(&self, video_ids: &[String]) -> livesub::Result<HashMap<String, VideoInfo>> {
        Ok(video_ids
            .iter()
            .map(|id| {
                let info = VideoInfo {
                    id: id.clone(),
                    channel_id: "UCabcdefghijklmnopqrstuv".into(),
                    title: format!("Stream {id}"),
                    live_broadcast_content: "live".into(),
                    actual_start_time: Some(Utc::now()),
                };
                (id.clone(), info)
            })
            .collect())
    }
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

async fn spawn_hub() -> (String, Forms) {
    let forms: Forms = Arc::default();
    let captured = forms.clone();
    let app = Router::new().route(
        "/subscribe",
        post(move |Form(form): Form<HashMap<String, String>>| {
            let captured = captured.clone();
            async move {
                captured.lock().push(form);
                (StatusCode::ACCEPTED, "Accepted")
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/subscribe"), forms)
}

fn streamer() -> StreamerRecord {
    StreamerRecord {
        id: "s1".into(),
        name: "Streamer".into(),
        youtube: Some(YouTubeSubscription {
            channel_id: "UCabcdefghijklmnopqrstuv".into(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn feed(video_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns="http://www.w3.org/2005/Atom">
  <link rel="hub" href="https://pubsubhubbub.appspot.com"/>
  <title>YouTube video feed</title>
  <entry>
    <id>yt:video:{video_id}</id>
    <yt:videoId>{video_id}</yt:videoId>
    <yt:channelId>UCabcdefghijklmnopqrstuv</yt:channelId>
    <title>Going live</title>
    <updated>2024-05-01T12:00:00+00:00</updated>
  </entry>
</feed>"#
    )
}

#[tokio::test]
async fn test_subscribe_verify_notify_and_renew() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("streamers.json");
    let store = Arc::new(JsonStreamerStore::open(&store_path).await.unwrap());
    store.upsert(streamer()).await.unwrap();

    let (hub_url, forms) = spawn_hub().await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let registry = Arc::new(ExpectationRegistry::new());
    let hub_client = Arc::new(HubClient::new(
        reqwest::Client::new(),
        registry.clone(),
        HubDefaults {
            hub_url,
            callback_url: format!("{base}{CALLBACK_PATH}"),
            lease_seconds: 1000,
            ..Default::default()
        },
    ));
    let verifier = Arc::new(VerificationHandler::new(
        registry.clone(),
        store.clone(),
        CALLBACK_PATH,
    ));
    let processor = Arc::new(NotificationProcessor::new(Arc::new(LiveLookup), store.clone()));
    let state = AppState::new(hub_client.clone(), verifier, processor, store.clone());

    let server = Arc::new(ApiServer::new(ApiServerConfig::default(), state));
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };

    let http = reqwest::Client::new();

    // Subscribe: the hub's answer is mirrored and the token stays pending.
    let response = http
        .post(format!("{base}/api/websub/subscribe"))
        .json(&serde_json::json!({ "channel_id": "UCabcdefghijklmnopqrstuv" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.text().await.unwrap(), "Accepted");
    assert_eq!(registry.len(), 1);

    let form = forms.lock()[0].clone();
    assert_eq!(form["hub.lease_seconds"], "1000");
    assert_eq!(form["hub.verify"], "async");
    let topic = form["hub.topic"].clone();
    let token = form["hub.verify_token"].clone();
    assert_eq!(token.len(), 32);

    // The hub verifies the intent.
    let challenge = http
        .get(format!("{base}{CALLBACK_PATH}"))
        .query(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", topic.as_str()),
            ("hub.challenge", "challenge-xyz"),
            ("hub.verify_token", token.as_str()),
            ("hub.lease_seconds", "1000"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(challenge.status(), StatusCode::OK);
    assert_eq!(challenge.text().await.unwrap(), "challenge-xyz");
    assert!(registry.is_empty());

    let persisted = JsonStreamerStore::open(&store_path).await.unwrap();
    let yt = persisted.get("s1").await.unwrap().youtube.unwrap();
    assert_eq!(yt.lease_seconds, 1000);
    let lease_date = yt.hub_lease_date.expect("lease date recorded");

    // A notification marks the channel live.
    let notified = http
        .post(format!("{base}{CALLBACK_PATH}"))
        .header("content-type", "application/atom+xml")
        .body(feed("dQw4w9WgXcQ"))
        .send()
        .await
        .unwrap();
    assert_eq!(notified.status(), StatusCode::NO_CONTENT);
    let live = store.get("s1").await.unwrap().live;
    assert!(live.live);
    assert_eq!(live.video_id.as_deref(), Some("dQw4w9WgXcQ"));
    assert_eq!(live.title.as_deref(), Some("Stream dQw4w9WgXcQ"));

    // Near the end of the lease the monitor re-subscribes exactly once.
    let lease_start = DateTime::parse_from_rfc3339(&lease_date)
        .unwrap()
        .with_timezone(&Utc);
    let monitor = LeaseMonitor::new(
        store.clone(),
        hub_client,
        LeaseMonitorConfig {
            clock: Arc::new(FixedClock(lease_start + chrono::Duration::seconds(960))),
            ..Default::default()
        },
    );
    assert_eq!(monitor.scan().await, 1);
    assert_eq!(monitor.scan().await, 0);
    monitor.wait_for_renewals().await;

    let forms = forms.lock().clone();
    assert_eq!(forms.len(), 2);
    assert_eq!(forms[1]["hub.mode"], "subscribe");
    assert_eq!(forms[1]["hub.topic"], topic);
    assert_ne!(forms[1]["hub.verify_token"], token);
    assert_eq!(registry.len(), 1);

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
