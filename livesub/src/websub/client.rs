//! Hub client: sends subscribe/unsubscribe requests to a WebSub hub.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use super::expectation::{Expectation, ExpectationRegistry};
use super::request::{MAX_LEASE_SECONDS, Mode, SubscriptionRequest, VerifyMode};
use crate::resolver::ChannelResolver;
use crate::store::StreamerRecord;
use crate::utils::url::{extract_channel_id, youtube_topic};
use crate::{Error, Result};

/// Default deadline for one hub call.
pub const DEFAULT_HUB_TIMEOUT: Duration = Duration::from_secs(10);

/// Most of a hub response body kept for mirroring and diagnostics.
pub const MAX_HUB_BODY_BYTES: usize = 64 * 1024;

/// Operator defaults applied to requests that leave fields blank.
#[derive(Debug, Clone)]
pub struct HubDefaults {
    pub hub_url: String,
    pub callback_url: String,
    pub verify: VerifyMode,
    pub lease_seconds: i64,
}

impl Default for HubDefaults {
    fn default() -> Self {
        Self {
            hub_url: "https://pubsubhubbub.appspot.com/subscribe".to_string(),
            callback_url: String::new(),
            verify: VerifyMode::Async,
            lease_seconds: MAX_LEASE_SECONDS,
        }
    }
}

/// A hub response within the 2xx range.
#[derive(Debug, Clone)]
pub struct HubResponse {
    pub status: StatusCode,
    pub body: String,
    /// The request as actually sent, including the generated verify token.
    pub request: SubscriptionRequest,
}

/// Cancels the registered expectation unless disarmed.
///
/// Covers both explicit failures and the request future being dropped
/// before the hub answered.
struct PendingExpectation<'a> {
    registry: &'a ExpectationRegistry,
    token: String,
    armed: bool,
}

impl PendingExpectation<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingExpectation<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(verify_token = %self.token, "Cancelling expectation after failed hub request");
            self.registry.cancel(&self.token);
        }
    }
}

/// Builds and sends WebSub subscription requests.
pub struct HubClient {
    client: Client,
    registry: Arc<ExpectationRegistry>,
    defaults: HubDefaults,
    resolver: Option<Arc<dyn ChannelResolver>>,
    timeout: Duration,
}

impl HubClient {
    pub fn new(client: Client, registry: Arc<ExpectationRegistry>, defaults: HubDefaults) -> Self {
        Self {
            client,
            registry,
            defaults,
            resolver: None,
            timeout: DEFAULT_HUB_TIMEOUT,
        }
    }

    /// Resolve handle-only requests through `resolver`.
    pub fn with_resolver(mut self, resolver: Arc<dyn ChannelResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ExpectationRegistry> {
        &self.registry
    }

    pub fn defaults(&self) -> &HubDefaults {
        &self.defaults
    }

    /// Fill in defaults, derive the topic/channel and validate.
    ///
    /// Never touches the network unless a handle has to be resolved.
    pub async fn prepare(&self, mut req: SubscriptionRequest) -> Result<SubscriptionRequest> {
        trim_in_place(&mut req.topic);
        trim_in_place(&mut req.channel_id);
        trim_in_place(&mut req.handle);

        if req.topic.is_empty() && req.channel_id.is_empty() && !req.handle.is_empty() {
            let resolver = self.resolver.as_ref().ok_or_else(|| {
                Error::validation("hub.topic is required (no channel resolver configured)")
            })?;
            req.channel_id = resolver.resolve(&req.handle).await?;
        }
        if req.topic.is_empty() && !req.channel_id.is_empty() {
            req.topic = youtube_topic(&req.channel_id);
        }

        if req.hub_url.trim().is_empty() {
            req.hub_url = self.defaults.hub_url.clone();
        }
        if req.callback.trim().is_empty() {
            req.callback = self.defaults.callback_url.clone();
        }
        if req.verify.is_none() {
            req.verify = Some(self.defaults.verify);
        }
        req.lease_seconds = match req.mode {
            Mode::Subscribe => Some(
                req.lease_seconds
                    .filter(|s| *s > 0)
                    .unwrap_or(self.defaults.lease_seconds),
            ),
            Mode::Unsubscribe => None,
        };

        req.validate()?;

        if req.verify_token.trim().is_empty() {
            req.verify_token = ExpectationRegistry::generate_token();
        }
        if req.channel_id.is_empty() {
            req.channel_id = extract_channel_id(&req.topic);
        }

        Ok(req)
    }

    /// Send `req` to its hub.
    ///
    /// The expectation is registered before the POST goes out so that a hub
    /// calling back before the POST returns still finds it. Any transport
    /// error or non-2xx answer cancels it again.
    pub async fn send(&self, req: SubscriptionRequest) -> Result<HubResponse> {
        let req = self.prepare(req).await?;

        let mut expectation = Expectation::new(req.mode, &req.topic, &req.verify_token);
        expectation.lease_seconds = req.effective_lease().unwrap_or(0);
        expectation.secret = req.secret.clone();
        expectation.channel_id = req.channel_id.clone();
        expectation.alias = req.alias.clone();
        self.registry.register(expectation);

        let pending = PendingExpectation {
            registry: &self.registry,
            token: req.verify_token.clone(),
            armed: true,
        };

        debug!(
            mode = %req.mode,
            topic = %req.topic,
            hub = %req.hub_url,
            verify_token = %req.verify_token,
            "Sending WebSub request"
        );

        let response = self
            .client
            .post(&req.hub_url)
            .form(&req.form_pairs())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(mode = %req.mode, topic = %req.topic, error = %e, "Hub request failed");
                Error::HubTransport(e.to_string())
            })?;

        let status = response.status();
        let body = read_body(response, MAX_HUB_BODY_BYTES).await;

        self.registry
            .record_result(&req.verify_token, &req.alias, &req.topic, status.as_u16(), &body);

        if !status.is_success() {
            warn!(
                mode = %req.mode,
                topic = %req.topic,
                status = %status,
                body = %body,
                "Hub rejected WebSub request"
            );
            return Err(Error::HubRejected { status, body });
        }

        pending.disarm();

        info!(
            mode = %req.mode,
            topic = %req.topic,
            channel_id = %req.channel_id,
            status = %status,
            "Hub accepted WebSub request"
        );

        Ok(HubResponse {
            status,
            body,
            request: req,
        })
    }

    /// Re-subscribe using the settings stored on a streamer record.
    pub async fn subscribe_record(&self, record: &StreamerRecord) -> Result<HubResponse> {
        let yt = record
            .youtube
            .as_ref()
            .ok_or_else(|| Error::validation(format!("streamer {} has no YouTube channel", record.id)))?;

        let mut req = SubscriptionRequest::subscribe(yt.topic.clone());
        req.hub_url = yt.hub_url.clone();
        req.callback = yt.callback_url.clone();
        req.verify = match yt.verify_mode.trim() {
            "" => None,
            mode => Some(mode.parse()?),
        };
        req.secret = yt.hub_secret.clone().filter(|s| !s.is_empty());
        req.lease_seconds = Some(yt.lease_seconds).filter(|s| *s > 0);
        req.channel_id = yt.channel_id.clone();
        req.handle = yt.handle.clone();
        req.alias = if record.name.is_empty() {
            record.id.clone()
        } else {
            record.name.clone()
        };

        self.send(req).await
    }
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

/// Read at most `limit` bytes of the body. The hub has already answered, so
/// a broken body keeps whatever arrived.
async fn read_body(mut response: reqwest::Response, limit: usize) -> String {
    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let remaining = limit - body.len();
                body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                if body.len() >= limit {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(status = %response.status(), error = %e, "Failed to read hub response body");
                break;
            }
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use axum::extract::{Form, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::Router;
    use parking_lot::Mutex;

    use super::*;
    use crate::store::YouTubeSubscription;

    #[derive(Clone)]
    struct FakeHub {
        registry: Arc<ExpectationRegistry>,
        forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
        /// Whether the expectation was visible when the hub received the POST.
        seen_pending: Arc<Mutex<Vec<bool>>>,
    }

    async fn accept(
        State(hub): State<FakeHub>,
        Form(form): Form<HashMap<String, String>>,
    ) -> (AxumStatus, &'static str) {
        let token = form.get("hub.verify_token").cloned().unwrap_or_default();
        hub.seen_pending.lock().push(hub.registry.lookup(&token).is_some());
        hub.forms.lock().push(form);
        (AxumStatus::ACCEPTED, "Accepted")
    }

    async fn reject(Form(_form): Form<HashMap<String, String>>) -> (AxumStatus, &'static str) {
        (AxumStatus::CONFLICT, "topic not allowed")
    }

    async fn huge(Form(_form): Form<HashMap<String, String>>) -> (AxumStatus, String) {
        (AxumStatus::ACCEPTED, "x".repeat(MAX_HUB_BODY_BYTES * 2))
    }

    async fn spawn_hub(registry: Arc<ExpectationRegistry>) -> (String, FakeHub) {
        let hub = FakeHub {
            registry,
            forms: Arc::default(),
            seen_pending: Arc::default(),
        };
        let app = Router::new()
            .route("/hub", post(accept))
            .route("/reject", post(reject))
            .route("/huge", post(huge))
            .with_state(hub.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hub)
    }

    fn client_for(base: &str, registry: Arc<ExpectationRegistry>) -> HubClient {
        HubClient::new(
            Client::new(),
            registry,
            HubDefaults {
                hub_url: format!("{base}/hub"),
                callback_url: "https://cb.example/websub/callback".to_string(),
                ..Default::default()
            },
        )
    }

    struct FixedResolver;

    #[async_trait]
    impl ChannelResolver for FixedResolver {
        async fn resolve(&self, handle: &str) -> Result<String> {
            assert_eq!(handle, "someone");
            Ok("UCresolved".to_string())
        }
    }

    #[tokio::test]
    async fn test_subscribe_applies_defaults_and_registers_first() {
        let registry = Arc::new(ExpectationRegistry::new());
        let (base, hub) = spawn_hub(registry.clone()).await;
        let client = client_for(&base, registry.clone());

        let topic = "https://www.youtube.com/xml/feeds/videos.xml?channel_id=UC123";
        let response = client.send(SubscriptionRequest::subscribe(topic)).await.unwrap();

        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert_eq!(response.body, "Accepted");
        assert_eq!(response.request.channel_id, "UC123");
        assert_eq!(response.request.verify_token.len(), 32);

        let forms = hub.forms.lock();
        let form = &forms[0];
        assert_eq!(form["hub.mode"], "subscribe");
        assert_eq!(form["hub.topic"], topic);
        assert_eq!(form["hub.callback"], "https://cb.example/websub/callback");
        assert_eq!(form["hub.verify"], "async");
        assert_eq!(form["hub.lease_seconds"], "864000");
        assert_eq!(form["hub.verify_token"], response.request.verify_token);
        assert_eq!(*hub.seen_pending.lock(), vec![true]);

        let pending = registry.lookup(&response.request.verify_token).unwrap();
        assert_eq!(pending.lease_seconds, 864000);
        assert_eq!(pending.hub_status, Some(202));
    }

    #[tokio::test]
    async fn test_unsubscribe_omits_lease() {
        let registry = Arc::new(ExpectationRegistry::new());
        let (base, hub) = spawn_hub(registry.clone()).await;
        let client = client_for(&base, registry.clone());

        let mut req = SubscriptionRequest::unsubscribe("https://x.example/feed?channel_id=UC1");
        req.lease_seconds = Some(100);
        let response = client.send(req).await.unwrap();

        assert!(!hub.forms.lock()[0].contains_key("hub.lease_seconds"));
        let pending = registry.lookup(&response.request.verify_token).unwrap();
        assert_eq!(pending.mode, Mode::Unsubscribe);
        assert_eq!(pending.lease_seconds, 0);
    }

    #[tokio::test]
    async fn test_rejection_cancels_expectation() {
        let registry = Arc::new(ExpectationRegistry::new());
        let (base, _hub) = spawn_hub(registry.clone()).await;
        let client = client_for(&base, registry.clone());

        let mut req = SubscriptionRequest::subscribe("https://x.example/feed?channel_id=UC1");
        req.hub_url = format!("{base}/reject");
        let err = client.send(req).await.unwrap_err();

        match err {
            Error::HubRejected { status, body } => {
                assert_eq!(status, StatusCode::CONFLICT);
                assert_eq!(body, "topic not allowed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_cancels_expectation() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let registry = Arc::new(ExpectationRegistry::new());
        let client = client_for(&format!("http://{addr}"), registry.clone());

        let err = client
            .send(SubscriptionRequest::subscribe("https://x.example/feed?channel_id=UC1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HubTransport(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_validation_fails_before_network() {
        let registry = Arc::new(ExpectationRegistry::new());
        let client = HubClient::new(Client::new(), registry.clone(), HubDefaults::default());

        let err = client
            .send(SubscriptionRequest::subscribe("https://x.example/feed"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("hub.callback")));

        let err = client
            .send(SubscriptionRequest::new(Mode::Subscribe))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_handle_is_resolved_to_topic() {
        let registry = Arc::new(ExpectationRegistry::new());
        let client = client_for("http://unused", registry).with_resolver(Arc::new(FixedResolver));

        let mut req = SubscriptionRequest::new(Mode::Subscribe);
        req.handle = "someone".into();
        let prepared = client.prepare(req).await.unwrap();

        assert_eq!(prepared.channel_id, "UCresolved");
        assert_eq!(prepared.topic, youtube_topic("UCresolved"));
        assert_eq!(prepared.lease_seconds, Some(MAX_LEASE_SECONDS));
        assert_eq!(prepared.verify, Some(VerifyMode::Async));
    }

    #[tokio::test]
    async fn test_subscribe_record_uses_stored_settings() {
        let registry = Arc::new(ExpectationRegistry::new());
        let (base, hub) = spawn_hub(registry.clone()).await;
        let client = client_for(&base, registry.clone());

        let record = StreamerRecord {
            id: "s1".into(),
            name: "Streamer One".into(),
            youtube: Some(YouTubeSubscription {
                channel_id: "UC123".into(),
                lease_seconds: 3600,
                verify_mode: "sync".into(),
                hub_secret: Some("secret".into()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = client.subscribe_record(&record).await.unwrap();

        let forms = hub.forms.lock();
        assert_eq!(forms[0]["hub.topic"], youtube_topic("UC123"));
        assert_eq!(forms[0]["hub.lease_seconds"], "3600");
        assert_eq!(forms[0]["hub.verify"], "sync");
        assert_eq!(forms[0]["hub.secret"], "secret");
        assert_eq!(
            registry.lookup(&response.request.verify_token).unwrap().alias,
            "Streamer One"
        );
    }

    #[tokio::test]
    async fn test_large_hub_body_is_capped() {
        let registry = Arc::new(ExpectationRegistry::new());
        let (base, _hub) = spawn_hub(registry.clone()).await;
        let mut client = client_for(&base, registry.clone());
        client.defaults.hub_url = format!("{base}/huge");

        let response = client
            .send(SubscriptionRequest::subscribe("https://x?channel_id=UC123"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert_eq!(response.body.len(), MAX_HUB_BODY_BYTES);
        assert_eq!(registry.len(), 1);
    }

    /// Answers with a status line, then closes before the promised body ends.
    async fn spawn_truncating_hub(status_line: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let head = format!("HTTP/1.1 {status_line}\r\ncontent-length: 100\r\n\r\nAccep");
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/hub")
    }

    #[tokio::test]
    async fn test_broken_body_keeps_hub_status() {
        let registry = Arc::new(ExpectationRegistry::new());
        let mut client = client_for("http://unused", registry.clone());
        client.defaults.hub_url = spawn_truncating_hub("202 Accepted").await;

        let response = client
            .send(SubscriptionRequest::subscribe("https://x?channel_id=UC123"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert_eq!(response.body, "Accep");
        assert_eq!(registry.len(), 1);

        client.defaults.hub_url = spawn_truncating_hub("409 Conflict").await;
        let err = client
            .send(SubscriptionRequest::subscribe("https://x?channel_id=UC123"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HubRejected { status, .. } if status == StatusCode::CONFLICT));
        assert_eq!(registry.len(), 1);
    }
}
