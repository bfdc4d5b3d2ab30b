//! In-memory graph model for editing a workflow
//!
//! [`WorkflowEditor`] owns a [`Workflow`] and exposes the only sanctioned
//! mutations. Every operation checks its preconditions before touching the
//! graph, so a failed call leaves the workflow exactly as it was. After a
//! successful mutation the matching [`WorkflowEvent`] is emitted.
//!
//! Invariants kept here:
//! - every connection references existing blocks and valid ports;
//! - input ports never exceed their arity;
//! - the non-trigger subgraph stays acyclic.
//!
//! Schema completeness (required fields) is the validator's concern.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, WorkflowError};
use crate::events::{emit, EventSink, NullEventSink, WorkflowEvent};
use crate::registry::{BlockDefinition, BlockRegistry};
use crate::types::{BlockConfig, BlockInstance, Connection, Position, Workflow};

/// Offset applied to duplicated blocks so the copy does not hide the original
const DUPLICATE_OFFSET: f64 = 50.0;

/// Single-owner editor over one workflow
pub struct WorkflowEditor {
    workflow: Workflow,
    registry: Arc<BlockRegistry>,
    events: Arc<dyn EventSink>,
}

impl WorkflowEditor {
    /// Create an editor for an existing workflow
    pub fn new(workflow: Workflow, registry: Arc<BlockRegistry>, events: Arc<dyn EventSink>) -> Self {
        Self {
            workflow,
            registry,
            events,
        }
    }

    /// Create an editor that discards events
    pub fn detached(workflow: Workflow, registry: Arc<BlockRegistry>) -> Self {
        Self::new(workflow, registry, Arc::new(NullEventSink))
    }

    /// Current workflow snapshot
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    /// Replace the whole workflow (undo/redo, reload)
    ///
    /// No per-block events are emitted; callers re-render from the snapshot.
    pub fn replace(&mut self, workflow: Workflow) {
        self.workflow = workflow;
    }

    /// Consume the editor, returning the workflow
    pub fn into_workflow(self) -> Workflow {
        self.workflow
    }

    /// Add a block of a registered type
    ///
    /// Fields missing from `initial_config` take their schema defaults.
    pub fn add_block(
        &mut self,
        block_type: &str,
        position: Position,
        initial_config: BlockConfig,
    ) -> Result<BlockInstance> {
        let definition = self.registry.lookup(block_type)?;
        let id = self.next_block_id();

        let mut config = definition.default_config();
        apply_patch(&id, definition, &mut config, initial_config)?;

        let block = BlockInstance {
            id,
            block_type: block_type.to_string(),
            position,
            config,
            label: None,
        };
        self.workflow.blocks.push(block.clone());

        log::debug!("Added block '{}' ({})", block.id, block.block_type);
        self.emit(WorkflowEvent::BlockAdded {
            workflow_id: self.workflow.id.clone(),
            block: block.clone(),
        });
        Ok(block)
    }

    /// Remove a block and every connection touching it
    pub fn remove_block(&mut self, id: &str) -> Result<BlockInstance> {
        let index = self
            .workflow
            .blocks
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| WorkflowError::BlockNotFound(id.to_string()))?;

        let (removed, kept): (Vec<Connection>, Vec<Connection>) = self
            .workflow
            .connections
            .drain(..)
            .partition(|c| c.touches(id));
        self.workflow.connections = kept;
        let block = self.workflow.blocks.remove(index);

        for connection in removed {
            self.emit(WorkflowEvent::ConnectionRemoved {
                workflow_id: self.workflow.id.clone(),
                connection_id: connection.id,
            });
        }
        self.emit(WorkflowEvent::BlockRemoved {
            workflow_id: self.workflow.id.clone(),
            block_id: block.id.clone(),
        });
        Ok(block)
    }

    /// Merge a partial config into a block
    ///
    /// Every patched field must exist in the schema and pass its rule.
    /// A `null` value resets the field to its default.
    pub fn update_config(&mut self, id: &str, patch: BlockConfig) -> Result<BlockInstance> {
        let block = self
            .workflow
            .find_block(id)
            .ok_or_else(|| WorkflowError::BlockNotFound(id.to_string()))?;
        let definition = self.registry.lookup(&block.block_type)?;

        let mut config = block.config.clone();
        apply_patch(id, definition, &mut config, patch)?;

        self.modify_block(id, |b| b.config = config)
    }

    /// Set or clear the custom label
    pub fn update_label(&mut self, id: &str, label: Option<String>) -> Result<BlockInstance> {
        let label = label.filter(|l| !l.trim().is_empty());
        self.modify_block(id, |b| b.label = label)
    }

    /// Move a block on the canvas
    pub fn update_position(&mut self, id: &str, position: Position) -> Result<BlockInstance> {
        self.modify_block(id, |b| b.position = position)
    }

    /// Copy a block (type and config) next to the original
    ///
    /// Connections are not copied.
    pub fn duplicate_block(&mut self, id: &str) -> Result<BlockInstance> {
        let original = self
            .workflow
            .find_block(id)
            .ok_or_else(|| WorkflowError::BlockNotFound(id.to_string()))?;
        let definition = self.registry.lookup(&original.block_type)?;

        let base = original
            .label
            .clone()
            .unwrap_or_else(|| definition.name.clone());
        let copy = BlockInstance {
            id: self.next_block_id(),
            block_type: original.block_type.clone(),
            position: original.position.offset(DUPLICATE_OFFSET, DUPLICATE_OFFSET),
            config: original.config.clone(),
            label: Some(format!("{} (copy)", base)),
        };
        self.workflow.blocks.push(copy.clone());

        self.emit(WorkflowEvent::BlockAdded {
            workflow_id: self.workflow.id.clone(),
            block: copy.clone(),
        });
        Ok(copy)
    }

    /// Connect an output port to an input port
    pub fn add_connection(
        &mut self,
        source_block_id: &str,
        source_port_id: &str,
        target_block_id: &str,
        target_port_id: &str,
    ) -> Result<Connection> {
        let source = self
            .workflow
            .find_block(source_block_id)
            .ok_or_else(|| WorkflowError::BlockNotFound(source_block_id.to_string()))?;
        let target = self
            .workflow
            .find_block(target_block_id)
            .ok_or_else(|| WorkflowError::BlockNotFound(target_block_id.to_string()))?;
        let source_def = self.registry.lookup(&source.block_type)?;
        let target_def = self.registry.lookup(&target.block_type)?;

        let out_port = source_def.output(source_port_id).ok_or_else(|| {
            WorkflowError::port_mismatch(format!(
                "'{}' has no output port '{}'",
                source_def.block_type(),
                source_port_id
            ))
        })?;
        let in_port = target_def.input(target_port_id).ok_or_else(|| {
            WorkflowError::port_mismatch(format!(
                "'{}' has no input port '{}'",
                target_def.block_type(),
                target_port_id
            ))
        })?;
        if !out_port.port_type.is_compatible_with(&in_port.port_type) {
            return Err(WorkflowError::port_mismatch(format!(
                "cannot connect {:?} output to {:?} input",
                out_port.port_type, in_port.port_type
            )));
        }

        if source_block_id == target_block_id {
            return Err(WorkflowError::WouldCreateCycle {
                source_id: source_block_id.to_string(),
                target_id: target_block_id.to_string(),
            });
        }

        let existing: Vec<&Connection> = self
            .workflow
            .incoming(target_block_id)
            .filter(|c| c.target_port_id == target_port_id)
            .collect();
        if existing
            .iter()
            .any(|c| c.source_block_id == source_block_id && c.source_port_id == source_port_id)
        {
            return Err(WorkflowError::DuplicateConnection {
                source_id: source_block_id.to_string(),
                target_id: target_block_id.to_string(),
            });
        }
        // Trigger edges only mark entry points and never count toward arity
        if let Some(limit) = in_port.input_arity().filter(|_| !source_def.is_trigger()) {
            let used = existing
                .iter()
                .filter(|c| {
                    self.workflow
                        .find_block(&c.source_block_id)
                        .map_or(true, |b| !self.registry.is_trigger(&b.block_type))
                })
                .count();
            if used >= limit {
                return Err(WorkflowError::ArityExceeded {
                    block_id: target_block_id.to_string(),
                    port: target_port_id.to_string(),
                    limit,
                });
            }
        }

        if !source_def.is_trigger()
            && !target_def.is_trigger()
            && self.reaches(target_block_id, source_block_id)
        {
            return Err(WorkflowError::WouldCreateCycle {
                source_id: source_block_id.to_string(),
                target_id: target_block_id.to_string(),
            });
        }

        let connection = Connection {
            id: self.next_connection_id(),
            source_block_id: source_block_id.to_string(),
            source_port_id: source_port_id.to_string(),
            target_block_id: target_block_id.to_string(),
            target_port_id: target_port_id.to_string(),
        };
        self.workflow.connections.push(connection.clone());

        self.emit(WorkflowEvent::ConnectionAdded {
            workflow_id: self.workflow.id.clone(),
            connection: connection.clone(),
        });
        Ok(connection)
    }

    /// Remove a connection
    pub fn remove_connection(&mut self, id: &str) -> Result<Connection> {
        let index = self
            .workflow
            .connections
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| WorkflowError::ConnectionNotFound(id.to_string()))?;
        let connection = self.workflow.connections.remove(index);

        self.emit(WorkflowEvent::ConnectionRemoved {
            workflow_id: self.workflow.id.clone(),
            connection_id: connection.id.clone(),
        });
        Ok(connection)
    }

    /// Plain-data form of the workflow
    pub fn serialize(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.workflow)?)
    }

    /// Rebuild a workflow from plain data
    ///
    /// Every block type must be registered; unknown entries fail the whole
    /// load with `UnknownBlockType` instead of being dropped.
    pub fn deserialize(value: Value, registry: &BlockRegistry) -> Result<Workflow> {
        let workflow: Workflow = serde_json::from_value(value)?;

        let mut seen = HashSet::new();
        for block in &workflow.blocks {
            registry.lookup(&block.block_type)?;
            if !seen.insert(block.id.as_str()) {
                return Err(WorkflowError::DuplicateBlockId(block.id.clone()));
            }
        }

        Ok(workflow)
    }

    /// Whether `to` is reachable from `from` following non-trigger connections
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for connection in self.workflow.outgoing(current) {
                let next = connection.target_block_id.as_str();
                let is_trigger = self
                    .workflow
                    .find_block(next)
                    .is_some_and(|b| self.registry.is_trigger(&b.block_type));
                if !is_trigger {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    fn modify_block(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut BlockInstance),
    ) -> Result<BlockInstance> {
        let block = self
            .workflow
            .find_block_mut(id)
            .ok_or_else(|| WorkflowError::BlockNotFound(id.to_string()))?;
        f(block);
        let block = block.clone();

        self.emit(WorkflowEvent::BlockUpdated {
            workflow_id: self.workflow.id.clone(),
            block: block.clone(),
        });
        Ok(block)
    }

    fn next_block_id(&self) -> String {
        loop {
            let id = format!("block-{}", short_uuid());
            if self.workflow.find_block(&id).is_none() {
                return id;
            }
        }
    }

    fn next_connection_id(&self) -> String {
        loop {
            let id = format!("conn-{}", short_uuid());
            if self.workflow.find_connection(&id).is_none() {
                return id;
            }
        }
    }

    fn emit(&self, event: WorkflowEvent) {
        emit(self.events.as_ref(), event);
    }
}

fn short_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Validate a patch against the schema and merge it into `config`
///
/// All fields are checked before any is written.
fn apply_patch(
    block_id: &str,
    definition: &BlockDefinition,
    config: &mut BlockConfig,
    patch: BlockConfig,
) -> Result<()> {
    for (key, value) in &patch {
        let field = definition.field(key).ok_or_else(|| {
            WorkflowError::schema(
                block_id,
                key,
                format!("'{}' has no field '{}'", definition.block_type(), key),
            )
        })?;
        if !value.is_null() {
            field
                .check_value(value)
                .map_err(|reason| WorkflowError::schema(block_id, key, reason))?;
        }
    }

    for (key, value) in patch {
        if value.is_null() {
            match definition.field(&key).and_then(|f| f.default.clone()) {
                Some(default) => {
                    config.insert(key, default);
                }
                None => {
                    config.remove(&key);
                }
            }
        } else {
            config.insert(key, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;
    use serde_json::json;

    fn editor() -> (WorkflowEditor, Arc<VecEventSink>) {
        let sink = Arc::new(VecEventSink::new());
        let editor = WorkflowEditor::new(
            Workflow::new("wf", "Test"),
            Arc::new(BlockRegistry::with_builtin()),
            sink.clone(),
        );
        (editor, sink)
    }

    fn config(value: Value) -> BlockConfig {
        value.as_object().cloned().unwrap_or_default()
    }

    fn add(editor: &mut WorkflowEditor, block_type: &str) -> String {
        editor
            .add_block(block_type, Position::default(), BlockConfig::new())
            .unwrap()
            .id
    }

    #[test]
    fn test_add_block_applies_defaults() {
        let (mut editor, sink) = editor();
        let block = editor
            .add_block("job-build", Position::new(1.0, 2.0), config(json!({"outputDir": "out"})))
            .unwrap();

        assert_eq!(block.config["command"], "npm run build");
        assert_eq!(block.config["outputDir"], "out");
        assert!(matches!(sink.events()[0], WorkflowEvent::BlockAdded { .. }));
    }

    #[test]
    fn test_add_block_unknown_type() {
        let (mut editor, sink) = editor();
        let err = editor
            .add_block("job-compile-cobol", Position::default(), BlockConfig::new())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownBlockType(_)));
        assert!(editor.workflow().blocks.is_empty());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_add_block_rejects_bad_initial_config() {
        let (mut editor, _) = editor();
        let err = editor
            .add_block("job-setup-node", Position::default(), config(json!({"nodeVersion": "12"})))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::SchemaViolation { .. }));
        assert!(editor.workflow().blocks.is_empty());
    }

    #[test]
    fn test_remove_block_cascades() {
        let (mut editor, sink) = editor();
        let trigger = add(&mut editor, "trigger-push");
        let checkout = add(&mut editor, "job-checkout");
        let script = add(&mut editor, "job-run-script");
        editor.add_connection(&trigger, "out", &checkout, "in").unwrap();
        editor.add_connection(&checkout, "out", &script, "in").unwrap();
        sink.clear();

        editor.remove_block(&checkout).unwrap();

        assert_eq!(editor.workflow().blocks.len(), 2);
        assert!(editor.workflow().connections.is_empty());
        let removed = sink
            .events()
            .iter()
            .filter(|e| matches!(e, WorkflowEvent::ConnectionRemoved { .. }))
            .count();
        assert_eq!(removed, 2);
    }

    #[test]
    fn test_remove_unknown_block() {
        let (mut editor, _) = editor();
        assert!(matches!(
            editor.remove_block("nope"),
            Err(WorkflowError::BlockNotFound(_))
        ));
    }

    #[test]
    fn test_update_config_merges() {
        let (mut editor, _) = editor();
        let id = add(&mut editor, "job-run-script");

        editor
            .update_config(&id, config(json!({"run": "echo hi"})))
            .unwrap();
        let block = editor
            .update_config(&id, config(json!({"name": "Say hi"})))
            .unwrap();

        assert_eq!(block.config["run"], "echo hi");
        assert_eq!(block.config["name"], "Say hi");
    }

    #[test]
    fn test_update_config_is_all_or_nothing() {
        let (mut editor, _) = editor();
        let id = add(&mut editor, "utility-upload-artifact");

        let err = editor
            .update_config(&id, config(json!({"name": "dist", "retention": 365})))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::SchemaViolation { ref field, .. } if field == "retention"));
        assert_eq!(editor.workflow().blocks[0].config["name"], "");
    }

    #[test]
    fn test_update_config_unknown_field() {
        let (mut editor, _) = editor();
        let id = add(&mut editor, "job-lint");
        let err = editor
            .update_config(&id, config(json!({"fix": true})))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::SchemaViolation { .. }));
    }

    #[test]
    fn test_update_config_null_resets_default() {
        let (mut editor, _) = editor();
        let id = add(&mut editor, "job-test");
        editor
            .update_config(&id, config(json!({"command": "cargo test"})))
            .unwrap();
        let block = editor
            .update_config(&id, config(json!({"command": null})))
            .unwrap();
        assert_eq!(block.config["command"], "npm test");
    }

    #[test]
    fn test_label_and_position() {
        let (mut editor, _) = editor();
        let id = add(&mut editor, "job-lint");

        let block = editor.update_label(&id, Some("Clippy".to_string())).unwrap();
        assert_eq!(block.label.as_deref(), Some("Clippy"));
        let block = editor.update_label(&id, Some("  ".to_string())).unwrap();
        assert!(block.label.is_none());

        let block = editor.update_position(&id, Position::new(5.0, 6.0)).unwrap();
        assert_eq!(block.position, Position::new(5.0, 6.0));
    }

    #[test]
    fn test_duplicate_block() {
        let (mut editor, _) = editor();
        let id = add(&mut editor, "job-build");
        editor
            .update_config(&id, config(json!({"command": "make"})))
            .unwrap();

        let copy = editor.duplicate_block(&id).unwrap();
        assert_ne!(copy.id, id);
        assert_eq!(copy.config["command"], "make");
        assert_eq!(copy.label.as_deref(), Some("Build (copy)"));
        assert_eq!(copy.position, Position::new(50.0, 50.0));
    }

    #[test]
    fn test_connection_port_mismatch() {
        let (mut editor, _) = editor();
        let push = add(&mut editor, "trigger-push");
        let schedule = add(&mut editor, "trigger-schedule");
        let build = add(&mut editor, "job-build");

        // Triggers have no inputs
        let err = editor.add_connection(&push, "out", &schedule, "in").unwrap_err();
        assert!(matches!(err, WorkflowError::PortMismatch(_)));
        // Wrong direction
        let err = editor.add_connection(&build, "in", &push, "out").unwrap_err();
        assert!(matches!(err, WorkflowError::PortMismatch(_)));
        assert!(editor.workflow().connections.is_empty());
    }

    #[test]
    fn test_connection_arity() {
        let (mut editor, _) = editor();
        let a = add(&mut editor, "job-checkout");
        let b = add(&mut editor, "job-lint");
        let c = add(&mut editor, "job-build");

        editor.add_connection(&a, "out", &c, "in").unwrap();
        let err = editor.add_connection(&b, "out", &c, "in").unwrap_err();
        assert!(matches!(err, WorkflowError::ArityExceeded { limit: 1, .. }));

        // The merge block takes many
        let wait = add(&mut editor, "control-wait");
        editor.add_connection(&a, "out", &wait, "in").unwrap();
        editor.add_connection(&b, "out", &wait, "in").unwrap();
        assert!(matches!(
            editor.add_connection(&a, "out", &wait, "in"),
            Err(WorkflowError::DuplicateConnection { .. })
        ));
    }

    #[test]
    fn test_several_triggers_share_an_entry_block() {
        let (mut editor, _) = editor();
        let push = add(&mut editor, "trigger-push");
        let manual = add(&mut editor, "trigger-manual");
        let checkout = add(&mut editor, "job-checkout");
        let lint = add(&mut editor, "job-lint");

        editor.add_connection(&push, "out", &checkout, "in").unwrap();
        editor.add_connection(&manual, "out", &checkout, "in").unwrap();
        editor.add_connection(&lint, "out", &checkout, "in").unwrap();

        let build = add(&mut editor, "job-build");
        assert!(matches!(
            editor.add_connection(&build, "out", &checkout, "in"),
            Err(WorkflowError::ArityExceeded { limit: 1, .. })
        ));
    }

    #[test]
    fn test_connection_cycle_rejected() {
        let (mut editor, _) = editor();
        let a = add(&mut editor, "job-checkout");
        let b = add(&mut editor, "job-build");
        let c = add(&mut editor, "control-wait");

        editor.add_connection(&a, "out", &b, "in").unwrap();
        editor.add_connection(&b, "out", &c, "in").unwrap();
        let before = editor.workflow().clone();

        let err = editor.add_connection(&c, "out", &a, "in").unwrap_err();
        assert!(matches!(err, WorkflowError::WouldCreateCycle { .. }));
        let err = editor.add_connection(&b, "out", &b, "in").unwrap_err();
        assert!(matches!(err, WorkflowError::WouldCreateCycle { .. }));
        assert_eq!(editor.workflow(), &before);
    }

    #[test]
    fn test_remove_connection() {
        let (mut editor, _) = editor();
        let a = add(&mut editor, "trigger-push");
        let b = add(&mut editor, "job-checkout");
        let conn = editor.add_connection(&a, "out", &b, "in").unwrap();

        editor.remove_connection(&conn.id).unwrap();
        assert!(editor.workflow().connections.is_empty());
        assert_eq!(editor.workflow().blocks.len(), 2);
        assert!(matches!(
            editor.remove_connection(&conn.id),
            Err(WorkflowError::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn test_serialize_round_trip() {
        let (mut editor, _) = editor();
        let a = add(&mut editor, "trigger-schedule");
        let b = add(&mut editor, "job-checkout");
        editor.add_connection(&a, "out", &b, "in").unwrap();
        editor.update_label(&b, Some("Fetch".to_string())).unwrap();

        let value = editor.serialize().unwrap();
        let restored = WorkflowEditor::deserialize(value, editor.registry()).unwrap();
        assert_eq!(&restored, editor.workflow());
    }

    #[test]
    fn test_deserialize_rejects_unknown_type() {
        let registry = BlockRegistry::with_builtin();
        let value = json!({
            "id": "wf", "name": "X", "description": "",
            "blocks": [{"id": "a", "type": "job-frobnicate", "position": {"x": 0, "y": 0}, "config": {}}],
            "connections": []
        });
        let err = WorkflowEditor::deserialize(value, &registry).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownBlockType(t) if t == "job-frobnicate"));
    }
}
