//! Fluent builder for workflow graphs
//!
//! Builds graphs without going through the editor's checks, which makes it
//! the tool of choice for fixtures and for loading hand-written graphs that
//! are validated afterwards.

use serde_json::Value;

use crate::registry::BlockRegistry;
use crate::types::{BlockConfig, BlockInstance, Connection, Position, Workflow};

/// Fluent builder for constructing workflows
///
/// # Example
///
/// ```ignore
/// let workflow = WorkflowBuilder::new("wf-1", "Nightly")
///     .add_block("t1", "trigger-schedule", (0.0, 0.0))
///     .with_config(serde_json::json!({"cron": "0 9 * * *"}))
///     .add_block("c1", "job-checkout", (200.0, 0.0))
///     .connect("t1", "c1")
///     .build();
/// ```
pub struct WorkflowBuilder {
    id: String,
    name: String,
    description: String,
    blocks: Vec<BlockInstance>,
    connections: Vec<Connection>,
    connection_counter: usize,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            blocks: Vec::new(),
            connections: Vec::new(),
            connection_counter: 0,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a block with its schema defaults from the built-in registry
    ///
    /// Unknown types are added with an empty config.
    pub fn add_block(
        mut self,
        id: impl Into<String>,
        block_type: impl Into<String>,
        position: impl Into<Position>,
    ) -> Self {
        let block_type = block_type.into();
        let config = BlockRegistry::builtin()
            .get(&block_type)
            .map(|d| d.default_config())
            .unwrap_or_default();
        self.blocks.push(BlockInstance {
            id: id.into(),
            block_type,
            position: position.into(),
            config,
            label: None,
        });
        self
    }

    /// Merge config values into the most recently added block
    ///
    /// Must be called immediately after `add_block`. A `null` removes the key.
    pub fn with_config(mut self, config: Value) -> Self {
        if let (Some(block), Value::Object(values)) = (self.blocks.last_mut(), config) {
            for (key, value) in values {
                if value.is_null() {
                    block.config.remove(&key);
                } else {
                    block.config.insert(key, value);
                }
            }
        }
        self
    }

    /// Replace the config of the most recently added block entirely
    pub fn with_raw_config(mut self, config: BlockConfig) -> Self {
        if let Some(block) = self.blocks.last_mut() {
            block.config = config;
        }
        self
    }

    /// Set the label of the most recently added block
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        if let Some(block) = self.blocks.last_mut() {
            block.label = Some(label.into());
        }
        self
    }

    /// Connect `out` of `source` to `in` of `target` (auto-generates the id)
    pub fn connect(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.connect_ports(source, "out", target, "in")
    }

    /// Connect explicit ports (auto-generates the id)
    pub fn connect_ports(
        mut self,
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        self.connection_counter += 1;
        self.connections.push(Connection {
            id: format!("conn-{}", self.connection_counter),
            source_block_id: source.into(),
            source_port_id: source_port.into(),
            target_block_id: target.into(),
            target_port_id: target_port.into(),
        });
        self
    }

    /// Build the workflow without validation
    pub fn build(self) -> Workflow {
        let mut workflow = Workflow::new(self.id, self.name);
        workflow.description = self.description;
        workflow.blocks = self.blocks;
        workflow.connections = self.connections;
        workflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults_and_config() {
        let workflow = WorkflowBuilder::new("wf", "Nightly")
            .description("runs every morning")
            .add_block("t1", "trigger-schedule", (0.0, 0.0))
            .with_config(json!({"cron": "0 9 * * *"}))
            .add_block("r1", "job-run-script", (200.0, 0.0))
            .with_config(json!({"run": "echo hi", "workingDirectory": null}))
            .with_label("Greet")
            .connect("t1", "r1")
            .build();

        assert_eq!(workflow.description, "runs every morning");
        assert_eq!(workflow.blocks[0].config["cron"], "0 9 * * *");
        assert_eq!(workflow.blocks[1].config["run"], "echo hi");
        assert!(!workflow.blocks[1].config.contains_key("workingDirectory"));
        assert_eq!(workflow.blocks[1].label.as_deref(), Some("Greet"));
        assert_eq!(workflow.connections[0].id, "conn-1");
        assert_eq!(workflow.connections[0].target_port_id, "in");
    }

    #[test]
    fn test_unknown_type_gets_empty_config() {
        let workflow = WorkflowBuilder::new("wf", "X")
            .add_block("a", "job-unknown", Position::default())
            .build();
        assert!(workflow.blocks[0].config.is_empty());
    }
}
