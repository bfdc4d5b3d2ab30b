//! Pushing compiled workflows and dispatching runs
//!
//! Writes are guarded by the file sha last seen by the caller. A remote
//! edit made since then is surfaced as [`SyncError::Conflict`] unless the
//! caller explicitly chooses [`ConflictPolicy::Overwrite`].

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use workflow_engine::{compile, workflow_file_path, BlockRegistry, PipelineDocument, Workflow};

use crate::constants::deploy;
use crate::error::{Result, SyncError};
use crate::remote::{workflow_file_name, FileWrite, PipelineRemote};

/// What to do when the remote file changed since the last sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Fail,
    Overwrite,
}

/// Result of a deploy attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeployOutcome {
    Created { sha: String },
    Updated { sha: String },
    /// Remote content already matched; nothing was written
    Unchanged { sha: String },
}

impl DeployOutcome {
    /// Sha of the remote file after the deploy
    pub fn sha(&self) -> &str {
        match self {
            Self::Created { sha } | Self::Updated { sha } | Self::Unchanged { sha } => sha,
        }
    }
}

/// A deploy outcome with the document that was pushed
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub path: String,
    pub outcome: DeployOutcome,
    pub document: PipelineDocument,
}

/// Compile a workflow and push it to its pipeline file
///
/// `last_synced_sha` is the sha returned by the previous deploy of this
/// workflow, or `None` if it was never deployed.
pub async fn deploy_workflow(
    remote: &dyn PipelineRemote,
    workflow: &Workflow,
    registry: &BlockRegistry,
    last_synced_sha: Option<&str>,
    policy: ConflictPolicy,
) -> Result<DeployReport> {
    let document = compile(workflow, registry)?;
    let path = workflow_file_path(&workflow.name, &workflow.id);

    let existing = remote.get_file(&path).await?;

    if let Some(file) = &existing {
        if last_synced_sha != Some(file.sha.as_str()) {
            match policy {
                ConflictPolicy::Fail => {
                    log::warn!(
                        "Refusing to deploy {}: remote sha {} does not match last sync {:?}",
                        path,
                        file.sha,
                        last_synced_sha
                    );
                    return Err(SyncError::Conflict {
                        path,
                        remote_sha: Some(file.sha.clone()),
                    });
                }
                ConflictPolicy::Overwrite => {
                    log::warn!("Overwriting remote changes to {} (sha {})", path, file.sha);
                }
            }
        }

        if file.content == document.text {
            log::info!("{} is already up to date ({})", path, file.sha);
            return Ok(DeployReport {
                outcome: DeployOutcome::Unchanged {
                    sha: file.sha.clone(),
                },
                path,
                document,
            });
        }
    }

    let sha = remote
        .put_file(FileWrite {
            path: path.clone(),
            content: document.text.clone(),
            message: format!("{}: {}", deploy::COMMIT_PREFIX, workflow.name),
            sha: existing.as_ref().map(|f| f.sha.clone()),
        })
        .await?;

    let outcome = if existing.is_some() {
        DeployOutcome::Updated { sha }
    } else {
        DeployOutcome::Created { sha }
    };
    log::info!("Deployed '{}' to {} ({:?})", workflow.name, path, outcome);

    Ok(DeployReport {
        path,
        outcome,
        document,
    })
}

/// Delete a workflow's pipeline file; returns whether anything was removed
pub async fn undeploy_workflow(remote: &dyn PipelineRemote, workflow: &Workflow) -> Result<bool> {
    let path = workflow_file_path(&workflow.name, &workflow.id);
    let Some(file) = remote.get_file(&path).await? else {
        log::info!("{} is not deployed", path);
        return Ok(false);
    };

    let message = format!("{}: {}", deploy::REMOVE_PREFIX, workflow.name);
    remote.delete_file(&path, &file.sha, &message).await?;
    log::info!("Removed {}", path);
    Ok(true)
}

/// How long to look for the run created by a dispatch
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub lookup_attempts: u32,
    pub lookup_delay: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            lookup_attempts: deploy::DISPATCH_LOOKUP_ATTEMPTS,
            lookup_delay: Duration::from_millis(deploy::DISPATCH_LOOKUP_DELAY_MS),
        }
    }
}

/// Trigger a run of a deployed workflow and return the new run's id
///
/// The dispatch endpoint does not return the run, so runs are listed before
/// and after and the newest unseen one is taken.
pub async fn dispatch_run(
    remote: &dyn PipelineRemote,
    workflow: &Workflow,
    git_ref: &str,
    inputs: serde_json::Map<String, serde_json::Value>,
    options: &DispatchOptions,
) -> Result<u64> {
    let path = workflow_file_path(&workflow.name, &workflow.id);
    let file = workflow_file_name(&path);

    let known: BTreeSet<u64> = remote.list_runs(file).await?.iter().map(|r| r.id).collect();
    remote.trigger_run(file, git_ref, inputs).await?;

    for attempt in 1..=options.lookup_attempts.max(1) {
        let runs = remote.list_runs(file).await?;
        if let Some(run) = runs.iter().find(|r| !known.contains(&r.id)) {
            log::info!("Dispatched run {} of {}", run.id, file);
            return Ok(run.id);
        }
        log::debug!(
            "Dispatched run of {} not listed yet (attempt {}/{})",
            file,
            attempt,
            options.lookup_attempts
        );
        tokio::time::sleep(options.lookup_delay).await;
    }

    Err(SyncError::NotFound(format!("run dispatched for {}", file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;
    use std::sync::atomic::Ordering;
    use workflow_engine::WorkflowBuilder;

    fn workflow(script: &str) -> Workflow {
        WorkflowBuilder::new("wf-1", "Nightly")
            .add_block("t1", "trigger-schedule", (0.0, 0.0))
            .with_config(serde_json::json!({"cron": "0 2 * * *"}))
            .add_block("c1", "job-checkout", (200.0, 0.0))
            .add_block("r1", "job-run-script", (400.0, 0.0))
            .with_config(serde_json::json!({"run": script}))
            .connect("t1", "c1")
            .connect("c1", "r1")
            .build()
    }

    const PATH: &str = ".github/workflows/nightly.yml";

    #[tokio::test]
    async fn test_deploy_creates_then_updates() {
        let remote = FakeRemote::new();
        let registry = BlockRegistry::builtin();

        let first = deploy_workflow(&remote, &workflow("make"), registry, None, ConflictPolicy::Fail)
            .await
            .unwrap();
        assert_eq!(first.path, PATH);
        assert!(matches!(first.outcome, DeployOutcome::Created { .. }));
        assert_eq!(remote.file(PATH).unwrap().content, first.document.text);

        let second = deploy_workflow(
            &remote,
            &workflow("make test"),
            registry,
            Some(first.outcome.sha()),
            ConflictPolicy::Fail,
        )
        .await
        .unwrap();
        assert!(matches!(second.outcome, DeployOutcome::Updated { .. }));
        assert_ne!(second.outcome.sha(), first.outcome.sha());
    }

    #[tokio::test]
    async fn test_deploy_unchanged_skips_write() {
        let remote = FakeRemote::new();
        let registry = BlockRegistry::builtin();
        let wf = workflow("make");

        let first = deploy_workflow(&remote, &wf, registry, None, ConflictPolicy::Fail)
            .await
            .unwrap();
        let again = deploy_workflow(&remote, &wf, registry, Some(first.outcome.sha()), ConflictPolicy::Fail)
            .await
            .unwrap();

        assert_eq!(
            again.outcome,
            DeployOutcome::Unchanged {
                sha: first.outcome.sha().to_string()
            }
        );
        assert_eq!(remote.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_edit_is_a_conflict() {
        let remote = FakeRemote::new();
        let registry = BlockRegistry::builtin();

        let first = deploy_workflow(&remote, &workflow("make"), registry, None, ConflictPolicy::Fail)
            .await
            .unwrap();
        let foreign = remote.seed_file(PATH, "name: edited by hand\n");

        let err = deploy_workflow(
            &remote,
            &workflow("make test"),
            registry,
            Some(first.outcome.sha()),
            ConflictPolicy::Fail,
        )
        .await
        .unwrap_err();

        match err {
            SyncError::Conflict { path, remote_sha } => {
                assert_eq!(path, PATH);
                assert_eq!(remote_sha.as_deref(), Some(foreign.as_str()));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(remote.file(PATH).unwrap().content, "name: edited by hand\n");
    }

    #[tokio::test]
    async fn test_overwrite_policy_replaces_remote_edit() {
        let remote = FakeRemote::new();
        let registry = BlockRegistry::builtin();
        remote.seed_file(PATH, "name: edited by hand\n");

        let report = deploy_workflow(&remote, &workflow("make"), registry, None, ConflictPolicy::Overwrite)
            .await
            .unwrap();

        assert!(matches!(report.outcome, DeployOutcome::Updated { .. }));
        assert_eq!(remote.file(PATH).unwrap().content, report.document.text);
    }

    #[tokio::test]
    async fn test_invalid_workflow_is_not_pushed() {
        let remote = FakeRemote::new();
        let wf = WorkflowBuilder::new("wf-1", "Nightly")
            .add_block("c1", "job-checkout", (0.0, 0.0))
            .build();

        let err = deploy_workflow(&remote, &wf, BlockRegistry::builtin(), None, ConflictPolicy::Fail)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Compile(_)));
        assert_eq!(remote.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_undeploy() {
        let remote = FakeRemote::new();
        let wf = workflow("make");
        assert!(!undeploy_workflow(&remote, &wf).await.unwrap());

        deploy_workflow(&remote, &wf, BlockRegistry::builtin(), None, ConflictPolicy::Fail)
            .await
            .unwrap();
        assert!(undeploy_workflow(&remote, &wf).await.unwrap());
        assert!(remote.file(PATH).is_none());
    }

    #[tokio::test]
    async fn test_dispatch_finds_new_run() {
        let remote = FakeRemote::new();
        let wf = workflow("make");
        let options = DispatchOptions {
            lookup_attempts: 2,
            lookup_delay: Duration::ZERO,
        };

        let first = dispatch_run(&remote, &wf, "main", Default::default(), &options)
            .await
            .unwrap();
        let second = dispatch_run(&remote, &wf, "main", Default::default(), &options)
            .await
            .unwrap();

        assert_ne!(first, second);
        let dispatched = remote.dispatched.lock().clone();
        assert_eq!(dispatched[0], ("nightly.yml".to_string(), "main".to_string()));
    }
}
