//! Live execution tracking
//!
//! An [`ExecutionTracker`] owns the [`WorkflowExecution`] of one remote run.
//! Each poll fetches a run snapshot, folds it in with the pure
//! [`reduce`](workflow_engine::reduce), and emits an event for every block
//! whose status moved. The background task started by
//! [`ExecutionTracker::start`] polls until the run is terminal, a
//! non-retryable error occurs, or its [`TrackerHandle`] is stopped or dropped.
//!
//! Failed polls never touch the block states. After `failure_threshold`
//! consecutive transient failures the tracker reports
//! [`TrackerHealth::Degraded`]; the next good poll restores `Healthy`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use workflow_engine::events::emit;
use workflow_engine::execution::changed_blocks;
use workflow_engine::{
    reduce, EventSink, NameMap, RemoteRunSnapshot, TrackerHealth, WorkflowEvent,
    WorkflowExecution,
};

use crate::config::TrackerConfig;
use crate::error::{Result, SyncError};
use crate::remote::PipelineRemote;

/// Tracks one remote run of a deployed workflow
pub struct ExecutionTracker {
    remote: Arc<dyn PipelineRemote>,
    names: NameMap,
    config: TrackerConfig,
    events: Arc<dyn EventSink>,
    state: RwLock<WorkflowExecution>,
    health: RwLock<TrackerHealth>,
    consecutive_failures: RwLock<u32>,
}

impl ExecutionTracker {
    /// Create a tracker for `execution`
    ///
    /// `names` must come from the document that was deployed for this run.
    pub fn new(
        execution: WorkflowExecution,
        names: NameMap,
        remote: Arc<dyn PipelineRemote>,
        config: TrackerConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            remote,
            names,
            config,
            events,
            state: RwLock::new(execution),
            health: RwLock::new(TrackerHealth::Healthy),
            consecutive_failures: RwLock::new(0),
        }
    }

    /// Current execution state
    pub fn state(&self) -> WorkflowExecution {
        self.state.read().clone()
    }

    pub fn health(&self) -> TrackerHealth {
        self.health.read().clone()
    }

    pub fn run_id(&self) -> u64 {
        self.state.read().run_id
    }

    /// Fold a snapshot into the state and emit the resulting changes
    pub fn apply_snapshot(&self, snapshot: &RemoteRunSnapshot) -> WorkflowExecution {
        let (before, after) = {
            let mut state = self.state.write();
            let before = state.clone();
            *state = reduce(&before, snapshot, &self.names);
            (before, state.clone())
        };

        for block in changed_blocks(&before, &after) {
            emit(
                self.events.as_ref(),
                WorkflowEvent::execution_state(
                    &after.workflow_id,
                    &after.id,
                    &block.block_id,
                    block.status,
                ),
            );
        }

        if before.status != after.status {
            emit(
                self.events.as_ref(),
                WorkflowEvent::ExecutionStatusChanged {
                    workflow_id: after.workflow_id.clone(),
                    execution_id: after.id.clone(),
                    status: after.status,
                },
            );
        }

        after
    }

    /// Fetch and apply one snapshot, updating health either way
    pub async fn poll_once(&self) -> Result<WorkflowExecution> {
        let run_id = self.run_id();
        match self.remote.get_run_detail(run_id).await {
            Ok(snapshot) => {
                let state = self.apply_snapshot(&snapshot);
                *self.consecutive_failures.write() = 0;
                self.set_health(TrackerHealth::Healthy);
                Ok(state)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn record_failure(&self, error: &SyncError) {
        let failures = {
            let mut count = self.consecutive_failures.write();
            *count += 1;
            *count
        };
        log::warn!(
            "Poll of run {} failed ({} in a row): {}",
            self.run_id(),
            failures,
            error
        );

        if !error.is_transient() || failures >= self.config.failure_threshold {
            self.set_health(TrackerHealth::Degraded {
                consecutive_failures: failures,
                reason: error.to_string(),
            });
        }
    }

    fn set_health(&self, health: TrackerHealth) {
        {
            let mut current = self.health.write();
            if *current == health {
                return;
            }
            *current = health.clone();
        }

        if let TrackerHealth::Degraded {
            consecutive_failures,
            reason,
        } = &health
        {
            log::warn!(
                "Tracking of run {} degraded after {} failures: {}",
                self.run_id(),
                consecutive_failures,
                reason
            );
        } else {
            log::info!("Tracking of run {} recovered", self.run_id());
        }

        let state = self.state.read();
        emit(
            self.events.as_ref(),
            WorkflowEvent::TrackingHealthChanged {
                workflow_id: state.workflow_id.clone(),
                execution_id: state.id.clone(),
                health,
            },
        );
    }

    /// Start polling in a background task
    pub fn start(self: Arc<Self>) -> TrackerHandle {
        let running = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());

        log::info!(
            "Tracking run {} every {}ms",
            self.run_id(),
            self.config.poll_interval_ms
        );

        let task = tokio::spawn({
            let running = running.clone();
            let wake = wake.clone();
            async move { self.run_loop(running, wake).await }
        });

        TrackerHandle {
            running,
            wake,
            task: Some(task),
        }
    }

    async fn run_loop(self: Arc<Self>, running: Arc<AtomicBool>, wake: Arc<Notify>) {
        while running.load(Ordering::SeqCst) {
            let delay = match self.poll_once().await {
                Ok(state) if state.is_terminal() => {
                    log::debug!("Run {} finished; tracker exiting", state.run_id);
                    break;
                }
                Ok(_) => self.config.poll_interval(),
                Err(e) if e.is_transient() => {
                    self.config.backoff_delay(*self.consecutive_failures.read())
                }
                Err(e) => {
                    log::error!("Stopped tracking run {}: {}", self.run_id(), e);
                    break;
                }
            };

            tokio::select! {
                _ = wake.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        running.store(false, Ordering::SeqCst);
    }
}

/// Handle to a running tracker task
///
/// Dropping the handle signals the task to stop at its next wake-up.
pub struct TrackerHandle {
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl TrackerHandle {
    /// Whether the polling task is still live
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop polling and wait for the task to exit
    pub async fn stop(mut self) {
        self.signal();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Tracker task ended abnormally: {}", e);
            }
        }
    }

    /// Wait for the task to exit on its own (terminal run or fatal error)
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Tracker task ended abnormally: {}", e);
            }
        }
    }

    fn signal(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.signal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRemote, Reply};
    use chrono::Utc;
    use std::time::Duration;
    use workflow_engine::execution::{RemoteConclusion, RemoteJob, RemoteStatus, RemoteStep};
    use workflow_engine::{
        compile, BlockRegistry, BlockStatus, RunStatus, VecEventSink, Workflow, WorkflowBuilder,
    };

    fn workflow() -> Workflow {
        WorkflowBuilder::new("wf-1", "Nightly")
            .add_block("t1", "trigger-schedule", (0.0, 0.0))
            .with_config(serde_json::json!({"cron": "0 2 * * *"}))
            .add_block("c1", "job-checkout", (200.0, 0.0))
            .add_block("r1", "job-run-script", (400.0, 0.0))
            .with_config(serde_json::json!({"run": "make"}))
            .connect("t1", "c1")
            .connect("c1", "r1")
            .build()
    }

    fn fast_config() -> TrackerConfig {
        TrackerConfig {
            poll_interval_ms: 1,
            failure_threshold: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
        }
    }

    fn step(name: &str, status: RemoteStatus, conclusion: Option<RemoteConclusion>) -> RemoteStep {
        RemoteStep {
            name: name.to_string(),
            status,
            conclusion,
            started_at: None,
            completed_at: None,
        }
    }

    /// Snapshot with the checkout and script steps in the given states
    fn snapshot(
        names: &NameMap,
        run: (RemoteStatus, Option<RemoteConclusion>),
        checkout: (RemoteStatus, Option<RemoteConclusion>),
        script: (RemoteStatus, Option<RemoteConclusion>),
    ) -> RemoteRunSnapshot {
        let step_name = |id: &str| {
            names
                .steps
                .iter()
                .find(|(_, block)| block.as_str() == id)
                .map(|(name, _)| name.clone())
                .unwrap()
        };
        RemoteRunSnapshot {
            run_id: 7,
            status: run.0,
            conclusion: run.1,
            jobs: vec![RemoteJob {
                name: "job-checkout-c1".to_string(),
                status: script.0,
                conclusion: script.1,
                started_at: Some(Utc::now()),
                completed_at: None,
                html_url: None,
                steps: vec![
                    step(&step_name("c1"), checkout.0, checkout.1),
                    step(&step_name("r1"), script.0, script.1),
                ],
            }],
        }
    }

    fn tracker(remote: Arc<FakeRemote>, events: Arc<VecEventSink>) -> (Arc<ExecutionTracker>, NameMap) {
        let wf = workflow();
        let names = compile(&wf, BlockRegistry::builtin()).unwrap().names;
        let execution = WorkflowExecution::start(&wf, BlockRegistry::builtin(), 7, Utc::now());
        let tracker = ExecutionTracker::new(execution, names.clone(), remote, fast_config(), events);
        (Arc::new(tracker), names)
    }

    #[tokio::test]
    async fn test_poll_applies_snapshot_and_emits() {
        let remote = Arc::new(FakeRemote::new());
        let events = Arc::new(VecEventSink::new());
        let (tracker, names) = tracker(remote.clone(), events.clone());

        remote.script([Reply::Snapshot(snapshot(
            &names,
            (RemoteStatus::InProgress, None),
            (RemoteStatus::Completed, Some(RemoteConclusion::Success)),
            (RemoteStatus::InProgress, None),
        ))]);

        let state = tracker.poll_once().await.unwrap();
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.block_status("c1"), Some(BlockStatus::Success));
        assert_eq!(state.block_status("r1"), Some(BlockStatus::Running));

        let emitted = events.events();
        assert!(emitted.iter().any(|e| matches!(
            e,
            WorkflowEvent::ExecutionStatusChanged { status: RunStatus::Running, .. }
        )));
        assert!(emitted.iter().any(|e| matches!(
            e,
            WorkflowEvent::ExecutionStateChanged { block_id, status: BlockStatus::Success, .. }
                if block_id == "c1"
        )));

        // Same snapshot again: nothing new to report
        events.clear();
        let again = tracker.poll_once().await.unwrap();
        assert_eq!(again, state);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn test_degrades_after_threshold_and_recovers() {
        let remote = Arc::new(FakeRemote::new());
        let events = Arc::new(VecEventSink::new());
        let (tracker, names) = tracker(remote.clone(), events.clone());

        let running = snapshot(
            &names,
            (RemoteStatus::InProgress, None),
            (RemoteStatus::Completed, Some(RemoteConclusion::Success)),
            (RemoteStatus::InProgress, None),
        );
        remote.script([
            Reply::Snapshot(running.clone()),
            Reply::Transient,
            Reply::Transient,
            Reply::Snapshot(running),
        ]);

        let good = tracker.poll_once().await.unwrap();
        assert!(tracker.poll_once().await.unwrap_err().is_transient());
        assert!(tracker.health().is_healthy());

        assert!(tracker.poll_once().await.is_err());
        assert_eq!(
            tracker.health(),
            TrackerHealth::Degraded {
                consecutive_failures: 2,
                reason: "Transient network error: connection reset".to_string()
            }
        );
        // Last known block states survive the outage
        assert_eq!(tracker.state(), good);

        tracker.poll_once().await.unwrap();
        assert!(tracker.health().is_healthy());

        let health_events: Vec<_> = events
            .events()
            .into_iter()
            .filter(|e| matches!(e, WorkflowEvent::TrackingHealthChanged { .. }))
            .collect();
        assert_eq!(health_events.len(), 2);
    }

    #[tokio::test]
    async fn test_loop_stops_at_terminal_state() {
        let remote = Arc::new(FakeRemote::new());
        let events = Arc::new(VecEventSink::new());
        let (tracker, names) = tracker(remote.clone(), events.clone());

        remote.script([
            Reply::Snapshot(snapshot(
                &names,
                (RemoteStatus::InProgress, None),
                (RemoteStatus::InProgress, None),
                (RemoteStatus::Queued, None),
            )),
            Reply::Transient,
            Reply::Snapshot(snapshot(
                &names,
                (RemoteStatus::Completed, Some(RemoteConclusion::Failure)),
                (RemoteStatus::Completed, Some(RemoteConclusion::Success)),
                (RemoteStatus::Completed, Some(RemoteConclusion::Failure)),
            )),
        ]);

        let handle = tracker.clone().start();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();

        let state = tracker.state();
        assert_eq!(state.status, RunStatus::Failure);
        assert_eq!(state.block_status("c1"), Some(BlockStatus::Success));
        assert_eq!(state.block_status("r1"), Some(BlockStatus::Failure));
        assert_eq!(remote.detail_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_stops_loop() {
        let remote = Arc::new(FakeRemote::new());
        let events = Arc::new(VecEventSink::new());
        let (tracker, _) = tracker(remote.clone(), events);

        remote.script([Reply::NotFound]);

        let handle = tracker.clone().start();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();

        assert_eq!(remote.detail_calls.load(Ordering::SeqCst), 1);
        assert!(!tracker.health().is_healthy());
        assert_eq!(tracker.state().status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn test_stop_cancels_polling() {
        let remote = Arc::new(FakeRemote::new());
        let events = Arc::new(VecEventSink::new());
        let (tracker, names) = tracker(remote.clone(), events);

        remote.script([Reply::Snapshot(snapshot(
            &names,
            (RemoteStatus::InProgress, None),
            (RemoteStatus::InProgress, None),
            (RemoteStatus::Queued, None),
        ))]);

        let handle = tracker.clone().start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_running());

        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap();

        let calls = remote.detail_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(remote.detail_calls.load(Ordering::SeqCst), calls);
    }
}
