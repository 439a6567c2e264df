use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use livesub::api::middleware::AdminAuth;
use livesub::api::{ApiServer, ApiServerConfig, AppState};
use livesub::config::AppConfig;
use livesub::resolver::HtmlChannelResolver;
use livesub::store::{JsonStreamerStore, StreamerStore};
use livesub::utils::http_client::build_client;
use livesub::websub::{
    DEFAULT_EXPECTATION_TTL, ExpectationRegistry, HubClient, HubDefaults, LeaseMonitor, LeaseMonitorConfig,
    NotificationProcessor, VerificationHandler,
};
use livesub::youtube::YouTubeVideoLookup;
use livesub::{logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("loading configuration")?;

    let (logging_config, _log_guard) =
        logging::init_logging(&config.log_dir).context("initializing logging")?;
    panic_hook::install(&config.log_dir);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting livesub");
    if config.callback_url.is_empty() {
        warn!("LIVESUB_CALLBACK_URL is not set; subscribe requests must carry a callback");
    }
    if config.youtube_api_key.is_none() {
        warn!("YOUTUBE_API_KEY is not set; notifications will be acknowledged without processing");
    }

    let shutdown = CancellationToken::new();
    logging_config.start_retention_cleanup(shutdown.child_token());

    let store: Arc<dyn StreamerStore> = Arc::new(
        JsonStreamerStore::open(&config.store_path)
            .await
            .context("opening streamer store")?,
    );

    let http = build_client(Duration::from_secs(10));
    let registry = Arc::new(ExpectationRegistry::new());
    registry.start_expiry_sweep(DEFAULT_EXPECTATION_TTL, shutdown.child_token());
    let hub_client = Arc::new(
        HubClient::new(
            http.clone(),
            registry.clone(),
            HubDefaults {
                hub_url: config.hub_url.clone(),
                callback_url: config.callback_url.clone(),
                verify: config.verify_mode,
                lease_seconds: config.lease_seconds,
            },
        )
        .with_resolver(Arc::new(HtmlChannelResolver::new(http.clone()))),
    );
    let verifier = Arc::new(VerificationHandler::new(
        registry,
        store.clone(),
        config.callback_path.clone(),
    ));
    let processor = Arc::new(NotificationProcessor::new(
        Arc::new(YouTubeVideoLookup::new(http, config.youtube_api_key.clone())),
        store.clone(),
    ));

    let monitor = LeaseMonitor::new(
        store.clone(),
        hub_client.clone(),
        LeaseMonitorConfig {
            interval: config.renew_interval,
            renew_window: config.renew_window,
            retry_after: config.renew_retry,
            ..Default::default()
        },
    )
    .with_parent_token(&shutdown)
    .start();

    let state = AppState::new(hub_client, verifier, processor, store)
        .with_admin_auth(AdminAuth::new(config.admin_token.clone()))
        .with_logging_config(logging_config);
    let server = ApiServer::new(
        ApiServerConfig::new(config.bind_address.clone(), config.port),
        state,
    );

    let server_token = server.cancel_token();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        server_token.cancel();
        signal_token.cancel();
    });

    let served = server.run().await;

    shutdown.cancel();
    monitor.stop().await;

    served.context("running API server")?;
    info!("livesub stopped");
    Ok(())
}
