//! livesub library crate.
//!
//! A WebSub subscriber that tracks when YouTube channels go live.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod resolver;
pub mod store;
pub mod utils;
pub mod websub;
pub mod youtube;

pub use error::{Error, Result};
