//! In-memory [`PipelineRemote`] for tests

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use workflow_engine::execution::RemoteStatus;
use workflow_engine::RemoteRunSnapshot;

use crate::error::{Result, SyncError};
use crate::remote::{FileWrite, PipelineRemote, RemoteFile, RunSummary};

/// Scripted response to `get_run_detail`
#[derive(Debug, Clone)]
pub enum Reply {
    Snapshot(RemoteRunSnapshot),
    Transient,
    NotFound,
}

#[derive(Default)]
pub struct FakeRemote {
    files: Mutex<BTreeMap<String, RemoteFile>>,
    runs: Mutex<Vec<RunSummary>>,
    replies: Mutex<VecDeque<Reply>>,
    next_sha: AtomicU64,
    next_run: AtomicU64,
    pub writes: AtomicUsize,
    pub detail_calls: AtomicUsize,
    pub dispatched: Mutex<Vec<(String, String)>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            next_run: AtomicU64::new(100),
            ..Self::default()
        }
    }

    /// Put a file as if someone else committed it
    pub fn seed_file(&self, path: &str, content: &str) -> String {
        let sha = self.mint_sha();
        self.files.lock().insert(
            path.to_string(),
            RemoteFile {
                path: path.to_string(),
                sha: sha.clone(),
                content: content.to_string(),
            },
        );
        sha
    }

    pub fn file(&self, path: &str) -> Option<RemoteFile> {
        self.files.lock().get(path).cloned()
    }

    /// Queue replies; the last one repeats once the queue drains
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.replies.lock().extend(replies);
    }

    fn mint_sha(&self) -> String {
        format!("sha-{}", self.next_sha.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl PipelineRemote for FakeRemote {
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>> {
        Ok(self.file(path))
    }

    async fn put_file(&self, write: FileWrite) -> Result<String> {
        let mut files = self.files.lock();
        let current = files.get(&write.path).map(|f| f.sha.clone());
        if current != write.sha {
            return Err(SyncError::Conflict {
                path: write.path,
                remote_sha: current,
            });
        }

        let sha = self.mint_sha();
        files.insert(
            write.path.clone(),
            RemoteFile {
                path: write.path,
                sha: sha.clone(),
                content: write.content,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(sha)
    }

    async fn delete_file(&self, path: &str, sha: &str, _message: &str) -> Result<()> {
        let mut files = self.files.lock();
        match files.get(path) {
            None => Err(SyncError::NotFound(path.to_string())),
            Some(file) if file.sha != sha => Err(SyncError::Conflict {
                path: path.to_string(),
                remote_sha: Some(file.sha.clone()),
            }),
            Some(_) => {
                files.remove(path);
                Ok(())
            }
        }
    }

    async fn list_runs(&self, _workflow_file: &str) -> Result<Vec<RunSummary>> {
        let mut runs = self.runs.lock().clone();
        runs.reverse();
        Ok(runs)
    }

    async fn get_run_detail(&self, run_id: u64) -> Result<RemoteRunSnapshot> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let mut replies = self.replies.lock();
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        };

        match reply {
            Some(Reply::Snapshot(snapshot)) => Ok(snapshot),
            Some(Reply::Transient) => Err(SyncError::Transient("connection reset".into())),
            Some(Reply::NotFound) | None => Err(SyncError::NotFound(format!("run {}", run_id))),
        }
    }

    async fn trigger_run(
        &self,
        workflow_file: &str,
        git_ref: &str,
        _inputs: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let id = self.next_run.fetch_add(1, Ordering::SeqCst);
        self.runs.lock().push(RunSummary {
            id,
            status: RemoteStatus::Queued,
            conclusion: None,
            head_branch: Some(git_ref.to_string()),
            created_at: Utc::now(),
            html_url: None,
        });
        self.dispatched
            .lock()
            .push((workflow_file.to_string(), git_ref.to_string()));
        Ok(())
    }
}
