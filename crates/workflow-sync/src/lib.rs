//! Workflow Sync - deployment and live run tracking for visual workflows
//!
//! The asynchronous edge around `workflow-engine`:
//!
//! - [`PipelineRemote`]: file storage and runs of a hosting repository,
//!   implemented for GitHub by [`GitHubClient`]
//! - [`deploy_workflow`] / [`undeploy_workflow`] / [`dispatch_run`] with
//!   optimistic concurrency on the pipeline file
//! - [`ExecutionTracker`]: background polling with backoff and health
//! - [`EditorSession`]: one open workflow with undo, validation, and teardown
//! - [`SyncConfig`]: JSON configuration

pub mod config;
pub mod constants;
pub mod deploy;
pub mod error;
pub mod github;
pub mod remote;
pub mod session;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, GitHubConfig, SyncConfig, TrackerConfig};
pub use deploy::{
    deploy_workflow, dispatch_run, undeploy_workflow, ConflictPolicy, DeployOutcome,
    DeployReport, DispatchOptions,
};
pub use error::{Result, SyncError};
pub use github::GitHubClient;
pub use remote::{FileWrite, PipelineRemote, RemoteFile, RunSummary};
pub use session::EditorSession;
pub use tracker::{ExecutionTracker, TrackerHandle};
