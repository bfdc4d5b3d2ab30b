//! CLI error type

use std::path::PathBuf;

use thiserror::Error;
use workflow_engine::{CompileError, ValidationResult, WorkflowError};
use workflow_sync::SyncError;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not a workflow: {source}")]
    Load {
        path: PathBuf,
        source: WorkflowError,
    },

    #[error("Workflow has {} validation error(s)", .0.errors.len())]
    Invalid(ValidationResult),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code: 1 for invalid input, 2 for conflicts, 3 otherwise
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Invalid(_) | Self::Load { .. } | Self::Compile(_) => 1,
            Self::Sync(SyncError::Conflict { .. }) => 2,
            _ => 3,
        }
    }
}
