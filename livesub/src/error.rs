//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// The hub answered, but outside the 2xx range.
    #[error("Hub rejected request: {status} - {body}")]
    HubRejected {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The hub could not be reached at all.
    #[error("Hub request failed: {0}")]
    HubTransport(String),

    #[error("Invalid notification feed: {0}")]
    InvalidFeed(String),

    #[error("Video lookup failed for {video_ids:?}: {message}")]
    LookupFailed {
        video_ids: Vec<String>,
        message: String,
    },

    #[error("Channel resolution failed: {0}")]
    Resolve(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} ({path}): {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the error originates from an upstream service rather than
    /// from this process or its caller.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::HubRejected { .. }
                | Self::HubTransport(_)
                | Self::LookupFailed { .. }
                | Self::Http(_)
        )
    }
}
