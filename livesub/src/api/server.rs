//! API server setup and configuration.

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::middleware::AdminAuth;
use crate::api::routes;
use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use crate::store::StreamerStore;
use crate::websub::{ExpectationRegistry, HubClient, NotificationProcessor, VerificationHandler};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
    /// Request body size limit in bytes
    pub body_limit: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: false,
            body_limit: 2 * 1024 * 1024,
        }
    }
}

impl ApiServerConfig {
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            ..Default::default()
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub registry: Arc<ExpectationRegistry>,
    pub hub_client: Arc<HubClient>,
    pub verifier: Arc<VerificationHandler>,
    pub processor: Arc<NotificationProcessor>,
    pub store: Arc<dyn StreamerStore>,
    pub admin_auth: AdminAuth,
    /// Logging configuration for dynamic log level changes
    pub logging_config: Option<Arc<LoggingConfig>>,
}

impl AppState {
    /// Wire the WebSub components together. The registry is the one owned
    /// by `hub_client`.
    pub fn new(
        hub_client: Arc<HubClient>,
        verifier: Arc<VerificationHandler>,
        processor: Arc<NotificationProcessor>,
        store: Arc<dyn StreamerStore>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            registry: Arc::clone(hub_client.registry()),
            hub_client,
            verifier,
            processor,
            store,
            admin_auth: AdminAuth::default(),
            logging_config: None,
        }
    }

    pub fn with_admin_auth(mut self, admin_auth: AdminAuth) -> Self {
        self.admin_auth = admin_auth;
        self
    }

    pub fn with_logging_config(mut self, config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(config);
        self
    }
}

fn is_health_path(path: &str) -> bool {
    path == "/health" || path.starts_with("/health/")
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.body_limit));

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if is_health_path(req.uri().path()) {
                        Span::none()
                    } else {
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        use tower_http::trace::MakeSpan;
                        make_span.make_span(req)
                    }
                })
                .on_request(|req: &Request, span: &Span| {
                    if span.is_disabled() || is_health_path(req.uri().path()) {
                        return;
                    }
                    let mut on_request =
                        tower_http::trace::DefaultOnRequest::new().level(tracing::Level::INFO);
                    use tower_http::trace::OnRequest;
                    on_request.on_request(req, span);
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                )
                .on_failure(
                    |class: tower_http::classify::ServerErrorsFailureClass,
                     latency: Duration,
                     span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let mut on_failure =
                            tower_http::trace::DefaultOnFailure::new().level(tracing::Level::ERROR);
                        use tower_http::trace::OnFailure;
                        on_failure.on_failure(class, latency, span);
                    },
                ),
        )
    }

    /// Bind the configured address and serve until cancelled.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Other(format!("Failed to bind {}: {}", addr, e)))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let router = self.build_router();

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                callback_path = %self.state.verifier.callback_path(),
                "API server listening on http://{}",
                addr
            );
        }

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| Error::Other(format!("Server error: {}", e)))?;

        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::test_support::test_state;

    #[test]
    fn test_config_defaults() {
        let config = ApiServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(!config.enable_cors);
    }

    #[test]
    fn test_health_paths() {
        assert!(is_health_path("/health"));
        assert!(is_health_path("/health/ready"));
        assert!(!is_health_path("/healthz"));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let server = ApiServer::new(ApiServerConfig::default(), test_state());
        let token = server.cancel_token();
        assert!(!token.is_cancelled());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), server.serve(listener))
            .await
            .unwrap()
            .unwrap();
    }
}
