//! Remote repository abstraction
//!
//! [`PipelineRemote`] is everything deploy and tracking need from the
//! hosting side: file storage with an optimistic-concurrency token, and
//! workflow runs. [`GitHubClient`](crate::github::GitHubClient) implements
//! it over the REST API; tests use an in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use workflow_engine::execution::{RemoteConclusion, RemoteStatus};
use workflow_engine::RemoteRunSnapshot;

use crate::error::Result;

/// A file as stored on the remote branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    /// Concurrency token; changes on every write
    pub sha: String,
    pub content: String,
}

/// A create-or-update request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
    pub message: String,
    /// Sha of the version being replaced; `None` creates the file
    pub sha: Option<String>,
}

/// One entry of a workflow's run list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: u64,
    pub status: RemoteStatus,
    #[serde(default)]
    pub conclusion: Option<RemoteConclusion>,
    #[serde(default)]
    pub head_branch: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Remote file storage and workflow runs for one repository and branch
#[async_trait]
pub trait PipelineRemote: Send + Sync {
    /// Fetch a file; `Ok(None)` when it does not exist
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>>;

    /// Create or update a file, returning its new sha
    ///
    /// Fails with `Conflict` when `sha` no longer matches the remote.
    async fn put_file(&self, write: FileWrite) -> Result<String>;

    /// Delete a file at the given sha
    async fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<()>;

    /// Runs of a workflow file, newest first
    async fn list_runs(&self, workflow_file: &str) -> Result<Vec<RunSummary>>;

    /// A run with its jobs and steps
    async fn get_run_detail(&self, run_id: u64) -> Result<RemoteRunSnapshot>;

    /// Start a run of a workflow file on a git ref
    async fn trigger_run(
        &self,
        workflow_file: &str,
        git_ref: &str,
        inputs: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()>;
}

/// File name part of a workflow path, as the Actions API expects it
pub fn workflow_file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_file_name() {
        assert_eq!(workflow_file_name(".github/workflows/ci.yml"), "ci.yml");
        assert_eq!(workflow_file_name("ci.yml"), "ci.yml");
    }

    #[test]
    fn test_run_summary_decodes_api_shape() {
        let json = serde_json::json!({
            "id": 99,
            "status": "completed",
            "conclusion": "success",
            "head_branch": "main",
            "created_at": "2026-01-02T03:04:05Z",
            "html_url": "https://github.com/acme/site/actions/runs/99",
            "run_attempt": 1
        });
        let run: RunSummary = serde_json::from_value(json).unwrap();
        assert_eq!(run.id, 99);
        assert_eq!(run.status, RemoteStatus::Completed);
        assert_eq!(run.conclusion, Some(RemoteConclusion::Success));
    }
}
