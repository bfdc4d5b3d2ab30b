//! Error types for the workflow engine

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using WorkflowError
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors raised synchronously by the graph model
///
/// A mutation that returns one of these has not touched the graph.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Block type is not in the registry
    #[error("Unknown block type: {0}")]
    UnknownBlockType(String),

    /// No block with this id
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// No connection with this id
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Ports do not exist, point the wrong way, or carry incompatible types
    #[error("Port mismatch: {0}")]
    PortMismatch(String),

    /// Target input port is already at its connection limit
    #[error("Input port '{port}' on block '{block_id}' accepts at most {limit} connection(s)")]
    ArityExceeded {
        block_id: String,
        port: String,
        limit: usize,
    },

    /// Inserting the edge would close a cycle among non-trigger blocks
    #[error("Connecting '{source_id}' to '{target_id}' would create a cycle")]
    WouldCreateCycle { source_id: String, target_id: String },

    /// An identical connection already exists
    #[error("Connection from '{source_id}' to '{target_id}' already exists")]
    DuplicateConnection { source_id: String, target_id: String },

    /// Two blocks in a document share an id
    #[error("Duplicate block id: {0}")]
    DuplicateBlockId(String),

    /// Config value fails its field rule
    #[error("Schema violation on block '{block_id}', field '{field}': {reason}")]
    SchemaViolation {
        block_id: String,
        field: String,
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),
}

impl WorkflowError {
    /// Create a port mismatch error with a message
    pub fn port_mismatch(msg: impl Into<String>) -> Self {
        Self::PortMismatch(msg.into())
    }

    /// Create a schema violation for a block field
    pub fn schema(
        block_id: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SchemaViolation {
            block_id: block_id.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from the pipeline compiler
///
/// `InvalidWorkflow` means the caller skipped validation. It is a contract
/// violation on the caller's side, not something to show an end user.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Compile was invoked on a workflow that does not validate
    #[error("Cannot compile an invalid workflow ({} validation error(s))", .0.len())]
    InvalidWorkflow(Vec<ValidationError>),

    /// YAML emitter error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}
