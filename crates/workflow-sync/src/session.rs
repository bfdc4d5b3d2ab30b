//! Editor session
//!
//! [`EditorSession`] is the explicit owner of everything one open workflow
//! needs: the graph editor, undo history, the current validation result,
//! the sync token of the last deploy, and at most one live run tracker.
//! It is created for a workflow and torn down with [`EditorSession::teardown`],
//! which cancels polling before the session goes away.

use std::sync::Arc;

use chrono::Utc;
use workflow_engine::events::emit;
use workflow_engine::{
    compile, validate, BlockConfig, BlockInstance, BlockRegistry, CompileError, Connection,
    EventSink, NameMap, PipelineDocument, Position, TrackerHealth, UndoStack, ValidationResult,
    Workflow, WorkflowEditor, WorkflowEvent, WorkflowExecution,
};

use crate::config::TrackerConfig;
use crate::deploy::{
    deploy_workflow, dispatch_run, undeploy_workflow, ConflictPolicy, DeployReport,
    DispatchOptions,
};
use crate::error::Result;
use crate::remote::PipelineRemote;
use crate::tracker::{ExecutionTracker, TrackerHandle};

struct ActiveTracker {
    tracker: Arc<ExecutionTracker>,
    handle: TrackerHandle,
}

/// One open workflow and its remote counterpart
pub struct EditorSession {
    editor: WorkflowEditor,
    registry: Arc<BlockRegistry>,
    events: Arc<dyn EventSink>,
    remote: Arc<dyn PipelineRemote>,
    tracker_config: TrackerConfig,
    undo: UndoStack,
    validation: ValidationResult,
    last_synced_sha: Option<String>,
    /// Names of the last deployed document
    deployed_names: Option<NameMap>,
    active: Option<ActiveTracker>,
}

impl EditorSession {
    pub fn new(
        workflow: Workflow,
        registry: Arc<BlockRegistry>,
        remote: Arc<dyn PipelineRemote>,
        events: Arc<dyn EventSink>,
        tracker_config: TrackerConfig,
    ) -> workflow_engine::Result<Self> {
        let mut undo = UndoStack::default();
        undo.push(&workflow)?;

        let mut session = Self {
            editor: WorkflowEditor::new(workflow, registry.clone(), events.clone()),
            registry,
            events,
            remote,
            tracker_config,
            undo,
            validation: ValidationResult::default(),
            last_synced_sha: None,
            deployed_names: None,
            active: None,
        };
        session.revalidate();
        Ok(session)
    }

    pub fn workflow(&self) -> &Workflow {
        self.editor.workflow()
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    /// Result of the most recent validation
    pub fn validation(&self) -> &ValidationResult {
        &self.validation
    }

    pub fn last_synced_sha(&self) -> Option<&str> {
        self.last_synced_sha.as_deref()
    }

    /// Restore the sync token persisted from an earlier session
    pub fn set_last_synced_sha(&mut self, sha: Option<String>) {
        self.last_synced_sha = sha;
    }

    // --- editing ---------------------------------------------------------

    pub fn add_block(
        &mut self,
        block_type: &str,
        position: Position,
        initial_config: BlockConfig,
    ) -> workflow_engine::Result<BlockInstance> {
        let result = self.editor.add_block(block_type, position, initial_config);
        self.commit(result)
    }

    pub fn remove_block(&mut self, id: &str) -> workflow_engine::Result<BlockInstance> {
        let result = self.editor.remove_block(id);
        self.commit(result)
    }

    pub fn update_config(
        &mut self,
        id: &str,
        patch: BlockConfig,
    ) -> workflow_engine::Result<BlockInstance> {
        let result = self.editor.update_config(id, patch);
        self.commit(result)
    }

    pub fn update_label(
        &mut self,
        id: &str,
        label: Option<String>,
    ) -> workflow_engine::Result<BlockInstance> {
        let result = self.editor.update_label(id, label);
        self.commit(result)
    }

    pub fn update_position(
        &mut self,
        id: &str,
        position: Position,
    ) -> workflow_engine::Result<BlockInstance> {
        let result = self.editor.update_position(id, position);
        self.commit(result)
    }

    pub fn duplicate_block(&mut self, id: &str) -> workflow_engine::Result<BlockInstance> {
        let result = self.editor.duplicate_block(id);
        self.commit(result)
    }

    pub fn add_connection(
        &mut self,
        source_block_id: &str,
        source_port_id: &str,
        target_block_id: &str,
        target_port_id: &str,
    ) -> workflow_engine::Result<Connection> {
        let result = self.editor.add_connection(
            source_block_id,
            source_port_id,
            target_block_id,
            target_port_id,
        );
        self.commit(result)
    }

    pub fn remove_connection(&mut self, id: &str) -> workflow_engine::Result<Connection> {
        let result = self.editor.remove_connection(id);
        self.commit(result)
    }

    /// Record a successful mutation; failed ones leave history untouched
    fn commit<T>(&mut self, result: workflow_engine::Result<T>) -> workflow_engine::Result<T> {
        let value = result?;
        self.undo.push(self.editor.workflow())?;
        self.revalidate();
        Ok(value)
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    /// Step back in history; `Ok(false)` when there is nothing to undo
    pub fn undo(&mut self) -> workflow_engine::Result<bool> {
        match self.undo.undo() {
            Some(workflow) => {
                self.editor.replace(workflow?);
                self.revalidate();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Step forward in history; `Ok(false)` when there is nothing to redo
    pub fn redo(&mut self) -> workflow_engine::Result<bool> {
        match self.undo.redo() {
            Some(workflow) => {
                self.editor.replace(workflow?);
                self.revalidate();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn revalidate(&mut self) {
        let result = validate(self.editor.workflow(), &self.registry);
        if result == self.validation {
            return;
        }

        log::debug!(
            "Workflow {} now has {} validation error(s)",
            self.editor.workflow().id,
            result.errors.len()
        );
        emit(
            self.events.as_ref(),
            WorkflowEvent::ValidationErrorsChanged {
                workflow_id: self.editor.workflow().id.clone(),
                errors: result.errors.clone(),
            },
        );
        self.validation = result;
    }

    // --- remote ----------------------------------------------------------

    pub fn compile(&self) -> std::result::Result<PipelineDocument, CompileError> {
        compile(self.editor.workflow(), &self.registry)
    }

    /// Push the compiled workflow, remembering the new sync token
    pub async fn deploy(&mut self, policy: ConflictPolicy) -> Result<DeployReport> {
        let report = deploy_workflow(
            self.remote.as_ref(),
            self.editor.workflow(),
            &self.registry,
            self.last_synced_sha.as_deref(),
            policy,
        )
        .await?;

        self.last_synced_sha = Some(report.outcome.sha().to_string());
        self.deployed_names = Some(report.document.names.clone());
        Ok(report)
    }

    /// Remove the pipeline file and forget the sync token
    pub async fn undeploy(&mut self) -> Result<bool> {
        let removed = undeploy_workflow(self.remote.as_ref(), self.editor.workflow()).await?;
        self.last_synced_sha = None;
        self.deployed_names = None;
        Ok(removed)
    }

    /// Dispatch a run and start tracking it
    pub async fn run(
        &mut self,
        git_ref: &str,
        inputs: serde_json::Map<String, serde_json::Value>,
        options: &DispatchOptions,
    ) -> Result<Arc<ExecutionTracker>> {
        let run_id = dispatch_run(
            self.remote.as_ref(),
            self.editor.workflow(),
            git_ref,
            inputs,
            options,
        )
        .await?;
        self.track_run(run_id).await
    }

    /// Track a remote run, superseding any run tracked before
    ///
    /// Remote names are resolved with the last deployed document, or with
    /// a fresh compile when nothing was deployed from this session.
    pub async fn track_run(&mut self, run_id: u64) -> Result<Arc<ExecutionTracker>> {
        let names = match &self.deployed_names {
            Some(names) => names.clone(),
            None => self.compile()?.names,
        };

        self.stop_tracking().await;

        let execution =
            WorkflowExecution::start(self.editor.workflow(), &self.registry, run_id, Utc::now());
        let tracker = Arc::new(ExecutionTracker::new(
            execution,
            names,
            self.remote.clone(),
            self.tracker_config.clone(),
            self.events.clone(),
        ));
        let handle = tracker.clone().start();

        self.active = Some(ActiveTracker {
            tracker: tracker.clone(),
            handle,
        });
        Ok(tracker)
    }

    /// State of the tracked run, if any
    pub fn execution(&self) -> Option<WorkflowExecution> {
        self.active.as_ref().map(|a| a.tracker.state())
    }

    pub fn tracker_health(&self) -> Option<TrackerHealth> {
        self.active.as_ref().map(|a| a.tracker.health())
    }

    pub fn is_tracking(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.handle.is_running())
    }

    /// Stop polling; the last execution state is discarded
    pub async fn stop_tracking(&mut self) {
        if let Some(active) = self.active.take() {
            log::debug!("Stopping tracker for run {}", active.tracker.run_id());
            active.handle.stop().await;
        }
    }

    /// Cancel polling and flush a final validation
    pub async fn teardown(mut self) -> ValidationResult {
        self.stop_tracking().await;
        self.revalidate();
        log::info!("Closed session for workflow {}", self.editor.workflow().id);
        self.validation
    }
}
