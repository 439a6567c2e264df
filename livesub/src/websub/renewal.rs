//! Lease renewal monitor.
//!
//! Periodically scans the stored subscriptions and re-subscribes channels
//! whose lease is about to run out. At most one renewal per channel is in
//! flight or attempted per lease cycle; a new cycle starts when a successful
//! verification moves the stored lease date forward.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::client::HubClient;
use crate::Result;
use crate::store::{StreamerRecord, StreamerStore};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Re-subscribes a stored channel.
#[async_trait]
pub trait LeaseRenewer: Send + Sync {
    async fn renew(&self, record: &StreamerRecord) -> Result<()>;
}

#[async_trait]
impl LeaseRenewer for HubClient {
    async fn renew(&self, record: &StreamerRecord) -> Result<()> {
        self.subscribe_record(record).await.map(|_| ())
    }
}

/// Configuration for the lease monitor.
#[derive(Clone)]
pub struct LeaseMonitorConfig {
    /// Time between scans.
    pub interval: Duration,
    /// Fraction of the lease left when renewal starts.
    pub renew_window: f64,
    /// Deadline for one renewal call.
    pub renew_timeout: Duration,
    /// After a failed renewal, allow another attempt in the same lease
    /// cycle once this much time has passed. `None` means one attempt per cycle.
    pub retry_after: Option<Duration>,
    pub clock: Arc<dyn Clock>,
}

impl Default for LeaseMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            renew_window: 0.05,
            renew_timeout: Duration::from_secs(15),
            retry_after: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for LeaseMonitorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseMonitorConfig")
            .field("interval", &self.interval)
            .field("renew_window", &self.renew_window)
            .field("renew_timeout", &self.renew_timeout)
            .field("retry_after", &self.retry_after)
            .finish_non_exhaustive()
    }
}

/// How long before lease expiry renewal should start.
///
/// Out-of-range windows fall back to 5% of the lease, at least one second.
pub fn renewal_margin(lease_seconds: i64, renew_window: f64) -> chrono::Duration {
    let lease_ms = lease_seconds.saturating_mul(1000);
    let margin_ms = if renew_window.is_finite() {
        (lease_ms as f64 * renew_window) as i64
    } else {
        0
    };

    if margin_ms <= 0 || margin_ms >= lease_ms {
        chrono::Duration::milliseconds((lease_ms / 20).max(1000))
    } else {
        chrono::Duration::milliseconds(margin_ms)
    }
}

/// The instant at which a lease started at `lease_start` should be renewed.
///
/// `None` when the lease is too large to represent.
pub fn renew_at(
    lease_start: DateTime<Utc>,
    lease_seconds: i64,
    renew_window: f64,
) -> Option<DateTime<Utc>> {
    let lease = chrono::Duration::try_seconds(lease_seconds)?;
    let until_due = lease.checked_sub(&renewal_margin(lease_seconds, renew_window))?;
    lease_start.checked_add_signed(until_due)
}

#[derive(Debug, Clone, Copy)]
struct RenewalAttempt {
    lease_start: DateTime<Utc>,
    attempted_at: DateTime<Utc>,
    /// Set after a failure when retries are enabled.
    retry_at: Option<DateTime<Utc>>,
}

/// Background lease renewal scheduler.
pub struct LeaseMonitor {
    store: Arc<dyn StreamerStore>,
    renewer: Arc<dyn LeaseRenewer>,
    config: LeaseMonitorConfig,
    /// Last renewal attempt per channel ID.
    attempts: Arc<Mutex<HashMap<String, RenewalAttempt>>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl LeaseMonitor {
    pub fn new(
        store: Arc<dyn StreamerStore>,
        renewer: Arc<dyn LeaseRenewer>,
        config: LeaseMonitorConfig,
    ) -> Self {
        Self {
            store,
            renewer,
            config,
            attempts: Arc::default(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Tie the monitor's lifetime to `parent`.
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Launch the scan loop.
    pub fn start(self) -> LeaseMonitorHandle {
        let monitor = Arc::new(self);
        let task = tokio::spawn(Arc::clone(&monitor).run());
        LeaseMonitorHandle { monitor, task }
    }

    async fn run(self: Arc<Self>) {
        info!(
            interval = ?self.config.interval,
            renew_window = self.config.renew_window,
            "Lease renewal monitor started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Lease renewal monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.scan().await;
                }
            }
        }
    }

    /// Evaluate every stored subscription once and launch due renewals.
    ///
    /// Renewals run in the background; returns how many were launched.
    pub async fn scan(&self) -> usize {
        let records = match self.store.list().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to list streamers for lease renewal");
                return 0;
            }
        };

        let now = self.config.clock.now();
        let tracked: HashSet<String> = records
            .iter()
            .filter_map(|r| r.channel_id().map(str::to_string))
            .collect();

        let mut launched = 0;
        for record in records {
            if let Some(lease_start) = self.claim(&record, now) {
                self.spawn_renewal(record, lease_start);
                launched += 1;
            }
        }

        // Forget channels that left the store.
        self.attempts
            .lock()
            .retain(|channel_id, _| tracked.contains(channel_id));
        launched
    }

    /// Decide whether `record` needs renewal at `now`, and if so mark the
    /// attempt for its current lease. Returns the lease start being renewed.
    fn claim(&self, record: &StreamerRecord, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let channel_id = record.channel_id()?;
        let yt = record.youtube.as_ref()?;
        if yt.lease_seconds <= 0 {
            return None;
        }
        let lease_start = DateTime::parse_from_rfc3339(yt.hub_lease_date.as_deref()?.trim())
            .ok()?
            .with_timezone(&Utc);

        let Some(due) = renew_at(lease_start, yt.lease_seconds, self.config.renew_window) else {
            warn!(
                channel_id,
                lease_seconds = yt.lease_seconds,
                "Stored lease is out of range, skipping renewal"
            );
            return None;
        };
        let mut attempts = self.attempts.lock();

        if now < due {
            if attempts
                .get(channel_id)
                .is_some_and(|a| a.lease_start < lease_start)
            {
                attempts.remove(channel_id);
            }
            return None;
        }

        if let Some(previous) = attempts.get(channel_id)
            && previous.lease_start == lease_start
        {
            match previous.retry_at {
                Some(retry_at) if now >= retry_at => {
                    debug!(channel_id, attempted_at = %previous.attempted_at, "Retrying failed lease renewal");
                }
                _ => return None,
            }
        }

        attempts.insert(
            channel_id.to_string(),
            RenewalAttempt {
                lease_start,
                attempted_at: now,
                retry_at: None,
            },
        );
        Some(lease_start)
    }

    fn spawn_renewal(&self, record: StreamerRecord, lease_start: DateTime<Utc>) {
        let renewer = Arc::clone(&self.renewer);
        let attempts = Arc::clone(&self.attempts);
        let clock = Arc::clone(&self.config.clock);
        let cancel = self.cancel.clone();
        let timeout = self.config.renew_timeout;
        let retry_after = self.config.retry_after;

        self.tracker.spawn(async move {
            let channel_id = record.channel_id().unwrap_or_default().to_string();
            info!(channel_id = %channel_id, lease_start = %lease_start, "Renewing WebSub lease");

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(channel_id = %channel_id, "Lease renewal cancelled");
                    return;
                }
                outcome = tokio::time::timeout(timeout, renewer.renew(&record)) => outcome,
            };

            let error = match outcome {
                Ok(Ok(())) => {
                    info!(channel_id = %channel_id, "Lease renewal request accepted");
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {timeout:?}"),
            };
            warn!(channel_id = %channel_id, error = %error, "Lease renewal failed");

            if let Some(retry_after) = retry_after
                && let Ok(retry_after) = chrono::Duration::from_std(retry_after)
                && let Some(attempt) = attempts.lock().get_mut(&channel_id)
                && attempt.lease_start == lease_start
            {
                attempt.retry_at = Some(clock.now() + retry_after);
            }
        });
    }

    /// Wait for every renewal launched so far to finish.
    pub async fn wait_for_renewals(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Number of renewals currently running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

/// Handle to a running [`LeaseMonitor`].
pub struct LeaseMonitorHandle {
    monitor: Arc<LeaseMonitor>,
    task: JoinHandle<()>,
}

impl LeaseMonitorHandle {
    pub fn monitor(&self) -> &Arc<LeaseMonitor> {
        &self.monitor
    }

    /// Stop scanning, cancel in-flight renewals and wait until they have
    /// all returned.
    pub async fn stop(self) {
        self.monitor.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Lease renewal loop ended abnormally");
        }
        self.monitor.tracker.close();
        self.monitor.tracker.wait().await;
        info!("Lease renewal monitor stopped");
    }
}
