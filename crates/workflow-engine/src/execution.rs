//! Execution state of a remote run, mapped onto blocks
//!
//! [`reduce`] is a pure function from the current [`WorkflowExecution`] and
//! a [`RemoteRunSnapshot`] to the next state. It holds these guarantees:
//!
//! - block statuses only move forward (pending → running → terminal);
//! - terminal executions and snapshots for other runs are no-ops;
//! - applying the same snapshot twice equals applying it once.
//!
//! Timestamps are taken from the snapshot, never from the local clock.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::naming::NameMap;
use crate::registry::BlockRegistry;
use crate::types::{BlockId, Workflow};

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }
}

/// Status of one block within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Pending,
    Running,
    Success,
    Failure,
    Skipped,
}

impl BlockStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Skipped)
    }

    /// Position in the forward-only lifecycle
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Success | Self::Failure | Self::Skipped => 2,
        }
    }
}

/// Per-block execution state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockExecutionState {
    pub block_id: BlockId,
    pub status: BlockStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Link to the remote log of the job that ran this block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_ref: Option<String>,
}

impl BlockExecutionState {
    pub fn pending(block_id: impl Into<BlockId>) -> Self {
        Self {
            block_id: block_id.into(),
            status: BlockStatus::Pending,
            started_at: None,
            finished_at: None,
            log_ref: None,
        }
    }
}

/// A tracked run of a compiled workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    /// Remote run id
    pub run_id: u64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub block_states: BTreeMap<BlockId, BlockExecutionState>,
}

impl WorkflowExecution {
    /// New execution with every non-trigger block pending
    ///
    /// Triggers never run as a remote step, so they have no state.
    pub fn start(
        workflow: &Workflow,
        registry: &BlockRegistry,
        run_id: u64,
        started_at: DateTime<Utc>,
    ) -> Self {
        let block_states = workflow
            .blocks
            .iter()
            .filter(|b| !registry.is_trigger(&b.block_type))
            .map(|b| (b.id.clone(), BlockExecutionState::pending(b.id.clone())))
            .collect();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow.id.clone(),
            run_id,
            status: RunStatus::Pending,
            started_at,
            finished_at: None,
            block_states,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn block_status(&self, block_id: &str) -> Option<BlockStatus> {
        self.block_states.get(block_id).map(|s| s.status)
    }
}

/// Health of the polling loop behind an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrackerHealth {
    Healthy,
    /// Remote status is currently unknown; last known block states are kept
    Degraded {
        consecutive_failures: u32,
        reason: String,
    },
}

impl TrackerHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Remote lifecycle status of a run, job, or step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Queued,
    Waiting,
    Requested,
    Pending,
    InProgress,
    Completed,
    #[serde(other)]
    Unknown,
}

/// Remote outcome of a completed run, job, or step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Stale,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStep {
    pub name: String,
    pub status: RemoteStatus,
    #[serde(default)]
    pub conclusion: Option<RemoteConclusion>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJob {
    pub name: String,
    pub status: RemoteStatus,
    #[serde(default)]
    pub conclusion: Option<RemoteConclusion>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub steps: Vec<RemoteStep>,
}

/// Point-in-time view of a remote run with its jobs and steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRunSnapshot {
    pub run_id: u64,
    pub status: RemoteStatus,
    #[serde(default)]
    pub conclusion: Option<RemoteConclusion>,
    #[serde(default)]
    pub jobs: Vec<RemoteJob>,
}

impl RemoteRunSnapshot {
    /// Run status as reported, before any local forward-only adjustment
    pub fn run_status(&self) -> RunStatus {
        match self.status {
            RemoteStatus::Completed => match self.conclusion {
                Some(RemoteConclusion::Success) | Some(RemoteConclusion::Neutral) => {
                    RunStatus::Success
                }
                Some(RemoteConclusion::Cancelled) | Some(RemoteConclusion::Skipped) => {
                    RunStatus::Cancelled
                }
                _ => RunStatus::Failure,
            },
            _ => {
                if self.has_started() {
                    RunStatus::Running
                } else {
                    RunStatus::Pending
                }
            }
        }
    }

    /// Whether any job or step has left the queue
    pub fn has_started(&self) -> bool {
        self.jobs.iter().any(|j| {
            matches!(j.status, RemoteStatus::InProgress | RemoteStatus::Completed)
                || j.steps
                    .iter()
                    .any(|s| matches!(s.status, RemoteStatus::InProgress | RemoteStatus::Completed))
        })
    }
}

/// Map a remote status/conclusion pair to a block status
fn block_status(status: RemoteStatus, conclusion: Option<RemoteConclusion>) -> BlockStatus {
    match status {
        RemoteStatus::InProgress => BlockStatus::Running,
        RemoteStatus::Completed => match conclusion {
            Some(RemoteConclusion::Success) | Some(RemoteConclusion::Neutral) => {
                BlockStatus::Success
            }
            Some(RemoteConclusion::Skipped) | Some(RemoteConclusion::Cancelled) => {
                BlockStatus::Skipped
            }
            _ => BlockStatus::Failure,
        },
        _ => BlockStatus::Pending,
    }
}

/// One remote entry resolved to a block
struct Observation<'a> {
    status: BlockStatus,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    log_ref: Option<&'a str>,
}

/// Combine every observation of one block into a single status
fn aggregate(observations: &[Observation<'_>]) -> BlockStatus {
    if observations.iter().any(|o| o.status == BlockStatus::Failure) {
        return BlockStatus::Failure;
    }
    let finished = observations.iter().filter(|o| o.status.is_terminal()).count();
    if finished == observations.len() {
        if observations.iter().all(|o| o.status == BlockStatus::Skipped) {
            BlockStatus::Skipped
        } else {
            BlockStatus::Success
        }
    } else if finished > 0 || observations.iter().any(|o| o.status == BlockStatus::Running) {
        BlockStatus::Running
    } else {
        BlockStatus::Pending
    }
}

/// Apply a remote snapshot to an execution
///
/// `names` is the compiler's name map for the deployed document.
pub fn reduce(
    state: &WorkflowExecution,
    snapshot: &RemoteRunSnapshot,
    names: &NameMap,
) -> WorkflowExecution {
    if state.is_terminal() || snapshot.run_id != state.run_id {
        return state.clone();
    }

    let mut observed: BTreeMap<&BlockId, Vec<Observation<'_>>> = BTreeMap::new();
    for job in &snapshot.jobs {
        let log_ref = job.html_url.as_deref();
        match names.resolve_job(&job.name) {
            Some(block_id) => observed.entry(block_id).or_default().push(Observation {
                status: block_status(job.status, job.conclusion),
                started_at: job.started_at,
                finished_at: job.completed_at,
                log_ref,
            }),
            None => log::debug!("Run {}: no block for job '{}'", snapshot.run_id, job.name),
        }

        for step in &job.steps {
            match names.resolve_step(&step.name) {
                Some(block_id) => observed.entry(block_id).or_default().push(Observation {
                    status: block_status(step.status, step.conclusion),
                    started_at: step.started_at,
                    finished_at: step.completed_at,
                    log_ref,
                }),
                None => log::debug!(
                    "Run {}: no block for step '{}' in job '{}'",
                    snapshot.run_id,
                    step.name,
                    job.name
                ),
            }
        }
    }

    let mut next = state.clone();

    for (block_id, observations) in &observed {
        let Some(current) = next.block_states.get_mut(*block_id) else {
            log::debug!("Run {}: block '{}' is not part of this execution", snapshot.run_id, block_id);
            continue;
        };
        if current.status.is_terminal() {
            continue;
        }

        let status = aggregate(observations);
        if status.rank() < current.status.rank() {
            continue;
        }

        current.status = status;
        if current.started_at.is_none() {
            current.started_at = observations.iter().filter_map(|o| o.started_at).min();
        }
        if status.is_terminal() {
            current.finished_at = observations.iter().filter_map(|o| o.finished_at).max();
        }
        if current.log_ref.is_none() {
            current.log_ref = observations
                .iter()
                .find_map(|o| o.log_ref)
                .map(str::to_string);
        }
    }

    let mut status = snapshot.run_status();
    if status == RunStatus::Pending
        && (state.status == RunStatus::Running
            || next.block_states.values().any(|b| b.status != BlockStatus::Pending))
    {
        status = RunStatus::Running;
    }
    next.status = status;

    if status.is_terminal() {
        let settle = match status {
            RunStatus::Success => BlockStatus::Success,
            RunStatus::Failure => BlockStatus::Failure,
            _ => BlockStatus::Skipped,
        };
        for block in next.block_states.values_mut() {
            match block.status {
                BlockStatus::Pending => block.status = BlockStatus::Skipped,
                BlockStatus::Running => block.status = settle,
                _ => {}
            }
        }
        next.finished_at = snapshot
            .jobs
            .iter()
            .filter_map(|j| j.completed_at)
            .max()
            .or(Some(state.started_at));
        log::info!("Run {} finished with status {:?}", snapshot.run_id, status);
    }

    next
}

/// Blocks whose status differs between two states, in id order
pub fn changed_blocks<'a>(
    before: &WorkflowExecution,
    after: &'a WorkflowExecution,
) -> Vec<&'a BlockExecutionState> {
    after
        .block_states
        .values()
        .filter(|s| before.block_status(&s.block_id) != Some(s.status))
        .collect()
}
