//! Core types for workflow graphs
//!
//! These types define the persisted shape of a workflow: block instances,
//! the connections between their ports, and the port metadata that
//! constrains how blocks may be wired.

use serde::{Deserialize, Serialize};

/// Unique identifier for a block instance
pub type BlockId = String;

/// Unique identifier for a connection
pub type ConnectionId = String;

/// Unique identifier for a port
pub type PortId = String;

/// Config values of a block instance, keyed by field name
pub type BlockConfig = serde_json::Map<String, serde_json::Value>;

/// Category of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCategory {
    /// Events that start a run
    Trigger,
    /// Build steps (checkout, setup, scripts)
    Job,
    /// Repository actions (releases, comments, labels)
    Action,
    /// Job-level control (conditions, matrix, fan-in)
    Control,
    /// External service integrations
    Integration,
    /// Cache, artifacts, environment
    Utility,
}

impl BlockCategory {
    pub const ALL: [BlockCategory; 6] = [
        BlockCategory::Trigger,
        BlockCategory::Job,
        BlockCategory::Action,
        BlockCategory::Control,
        BlockCategory::Integration,
        BlockCategory::Utility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Job => "job",
            Self::Action => "action",
            Self::Control => "control",
            Self::Integration => "integration",
            Self::Utility => "utility",
        }
    }
}

impl std::str::FromStr for BlockCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown block category '{}'", s))
    }
}

/// The kind of flow a port carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// Workflow trigger output
    Trigger,
    /// Execution order between steps
    Job,
    /// Artifact or data passing
    Data,
    /// Conditional branch
    Condition,
    /// Universal connector
    Any,
}

impl PortType {
    /// Check if an output of this type can feed an input of `other`
    pub fn is_compatible_with(&self, other: &PortType) -> bool {
        if matches!(self, PortType::Any) || matches!(other, PortType::Any) {
            return true;
        }

        if self == other {
            return true;
        }

        // Flow-control types interoperate
        let flow = |t: &PortType| matches!(t, PortType::Trigger | PortType::Job | PortType::Condition);
        if flow(self) && flow(other) {
            return true;
        }

        // A data output must land on a data input
        !matches!(self, PortType::Data)
    }
}

/// Definition of a port (input or output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    /// Unique identifier for this port on its block
    pub id: PortId,
    /// Human-readable label
    pub label: String,
    /// Flow type of the port
    pub port_type: PortType,
    /// Whether this port must be connected
    pub required: bool,
    /// Whether this port accepts more than one connection
    pub multiple: bool,
}

impl PortDefinition {
    /// Create a required port
    pub fn required(id: impl Into<String>, label: impl Into<String>, port_type: PortType) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            port_type,
            required: true,
            multiple: false,
        }
    }

    /// Create an optional port
    pub fn optional(id: impl Into<String>, label: impl Into<String>, port_type: PortType) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            port_type,
            required: false,
            multiple: false,
        }
    }

    /// Set this port to accept multiple connections
    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// Connection limit when used as an input (`None` = unbounded)
    pub fn input_arity(&self) -> Option<usize> {
        if self.multiple {
            None
        } else {
            Some(1)
        }
    }
}

/// Canvas position of a block; irrelevant to compilation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Position shifted by the given deltas
    pub fn offset(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl From<(f64, f64)> for Position {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// A block instance placed on the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInstance {
    /// Unique identifier for this block
    pub id: BlockId,
    /// Block type tag (references a BlockDefinition)
    #[serde(rename = "type")]
    pub block_type: String,
    /// Position in the UI
    #[serde(default)]
    pub position: Position,
    /// Config values for this instance
    #[serde(default)]
    pub config: BlockConfig,
    /// Custom label override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl BlockInstance {
    /// Read a config value as a string slice
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    /// Read a config value as a bool
    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(|v| v.as_bool())
    }
}

/// A directed edge between two block ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Source block ID
    pub source_block_id: BlockId,
    /// Source (output) port ID
    pub source_port_id: PortId,
    /// Target block ID
    pub target_block_id: BlockId,
    /// Target (input) port ID
    pub target_port_id: PortId,
}

impl Connection {
    /// Whether this connection touches the given block at either end
    pub fn touches(&self, block_id: &str) -> bool {
        self.source_block_id == block_id || self.target_block_id == block_id
    }
}

/// A complete workflow graph; the unit of persistence and compilation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique identifier for this workflow
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Blocks in insertion order
    #[serde(default)]
    pub blocks: Vec<BlockInstance>,
    /// Connections between block ports
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Workflow {
    /// Create a new empty workflow
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            blocks: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Find a block by ID
    pub fn find_block(&self, id: &str) -> Option<&BlockInstance> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Find a block by ID (mutable)
    pub fn find_block_mut(&mut self, id: &str) -> Option<&mut BlockInstance> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    /// Find a connection by ID
    pub fn find_connection(&self, id: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// Get connections coming into a block
    pub fn incoming<'a>(&'a self, block_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.target_block_id == block_id)
    }

    /// Get connections going out of a block
    pub fn outgoing<'a>(&'a self, block_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.source_block_id == block_id)
    }

    /// IDs of blocks this block runs after
    pub fn get_dependencies(&self, block_id: &str) -> Vec<BlockId> {
        self.incoming(block_id)
            .map(|c| c.source_block_id.clone())
            .collect()
    }

    /// IDs of blocks that run after this block
    pub fn get_dependents(&self, block_id: &str) -> Vec<BlockId> {
        self.outgoing(block_id)
            .map(|c| c.target_block_id.clone())
            .collect()
    }
}
