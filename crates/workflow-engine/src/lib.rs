//! Workflow Engine - visual CI/CD workflow graphs compiled to GitHub Actions
//!
//! This crate is the synchronous core of the workflow builder:
//!
//! - Block registry with the built-in catalog of block types
//! - Graph model with checked mutations and UI events
//! - Validator that reports every problem as data
//! - Deterministic compiler to a GitHub Actions workflow file
//! - Pure reducer mapping remote run snapshots back onto blocks
//! - Compressed snapshot-based undo/redo
//!
//! # Architecture
//!
//! Blocks and connections live in flat lists keyed by opaque ids. The
//! compiler names every step after its block, and the execution reducer
//! resolves remote job/step names through the same [`NameMap`], so the two
//! only share a naming contract.
//!
//! Polling, deployment, and other I/O live in `workflow-sync`.
//!
//! # Example
//!
//! ```ignore
//! use workflow_engine::{compile, validate, BlockRegistry, WorkflowBuilder};
//!
//! let workflow = WorkflowBuilder::new("wf-1", "Nightly")
//!     .add_block("t1", "trigger-schedule", (0.0, 0.0))
//!     .with_config(serde_json::json!({"cron": "0 9 * * *"}))
//!     .add_block("c1", "job-checkout", (200.0, 0.0))
//!     .connect("t1", "c1")
//!     .build();
//!
//! let registry = BlockRegistry::builtin();
//! assert!(validate(&workflow, registry).is_valid());
//! let document = compile(&workflow, registry)?;
//! ```

pub mod builder;
pub mod catalog;
pub mod compiler;
pub mod error;
pub mod events;
pub mod execution;
pub mod graph;
pub mod naming;
pub mod pipeline;
pub mod registry;
pub mod schema;
pub mod types;
pub mod undo;
pub mod validation;

// Re-export key types
pub use builder::WorkflowBuilder;
pub use compiler::compile;
pub use error::{CompileError, Result, WorkflowError};
pub use events::{ChannelEventSink, EventSink, NullEventSink, VecEventSink, WorkflowEvent};
pub use execution::{
    reduce, BlockExecutionState, BlockStatus, RemoteRunSnapshot, RunStatus, TrackerHealth,
    WorkflowExecution,
};
pub use graph::WorkflowEditor;
pub use naming::{workflow_file_path, NameMap};
pub use pipeline::PipelineDocument;
pub use registry::{BlockDefinition, BlockKind, BlockRegistry};
pub use schema::{ConfigField, FieldType};
pub use types::{
    BlockCategory, BlockConfig, BlockId, BlockInstance, Connection, ConnectionId, PortDefinition,
    PortType, Position, Workflow,
};
pub use undo::UndoStack;
pub use validation::{validate, ValidationError, ValidationErrorKind, ValidationResult};
