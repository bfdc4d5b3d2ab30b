//! Error types for deployment and run tracking

use thiserror::Error;
use workflow_engine::CompileError;

use crate::config::ConfigError;

/// Result type alias using SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors from the remote repository and the tracking loop
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote file changed since it was last synced
    #[error("Remote file '{path}' changed since last sync (remote sha {remote_sha:?})")]
    Conflict {
        path: String,
        remote_sha: Option<String>,
    },

    /// Network hiccup or server-side failure; safe to retry
    #[error("Transient network error: {0}")]
    Transient(String),

    /// Non-retryable API response
    #[error("GitHub API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Repository, file, workflow, or run does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or rejected credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Response body did not have the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The workflow could not be compiled
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Configuration could not be loaded or saved
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration is incomplete for the requested operation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Create a decode error with a message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            Self::Transient(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            match e.status() {
                Some(status) if status.is_server_error() => Self::Transient(e.to_string()),
                Some(status) => Self::Api {
                    status: status.as_u16(),
                    message: e.to_string(),
                },
                None => Self::Transient(e.to_string()),
            }
        }
    }
}
