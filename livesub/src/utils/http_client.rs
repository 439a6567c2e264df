use std::time::Duration;

use tracing::warn;

const USER_AGENT: &str = concat!("livesub/", env!("CARGO_PKG_VERSION"));

/// Build the shared outbound HTTP client.
///
/// Per-request deadlines are set by the callers; `connect_timeout` only
/// bounds connection establishment.
pub fn build_client(connect_timeout: Duration) -> reqwest::Client {
    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);

    if connect_timeout > Duration::ZERO {
        builder = builder.connect_timeout(connect_timeout);
    }

    builder.build().unwrap_or_else(|error| {
        warn!(
            error = %error,
            "Failed to create configured HTTP client; falling back to reqwest defaults"
        );
        reqwest::Client::new()
    })
}
