//! WebSub (PubSubHubbub) subscriber.
//!
//! - `request`: subscription request model and form encoding
//! - `expectation`: pending verify-token registry
//! - `client`: hub subscribe/unsubscribe client
//! - `verify`: callback challenge verification
//! - `notification`: Atom feed notification processing
//! - `renewal`: lease renewal monitor

pub mod client;
pub mod expectation;
pub mod notification;
pub mod renewal;
pub mod request;
pub mod verify;

pub use client::{HubClient, HubDefaults, HubResponse};
pub use expectation::{DEFAULT_EXPECTATION_TTL, Expectation, ExpectationRegistry};
pub use notification::{MAX_FEED_BYTES, NotificationProcessor, NotificationResult};
pub use renewal::{LeaseMonitor, LeaseMonitorConfig, LeaseMonitorHandle, LeaseRenewer};
pub use request::{MAX_LEASE_SECONDS, Mode, SubscriptionRequest, VerifyMode};
pub use verify::{ChallengeQuery, ChallengeRejection, VerificationHandler};
