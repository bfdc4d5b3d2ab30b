//! Event types for the editor UI layer
//!
//! Events are sent from the graph model, the session, and the execution
//! tracker to whatever renders the canvas.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::execution::{BlockStatus, RunStatus, TrackerHealth};
use crate::types::{BlockId, BlockInstance, Connection, ConnectionId};
use crate::validation::ValidationError;

/// Destination for editor and tracker events
///
/// The canvas front end decides how events travel; the engine only needs
/// somewhere to put them.
pub trait EventSink: Send + Sync {
    /// Deliver one event; fails once the receiving side is gone
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// An event could not be delivered
#[derive(Debug, Clone, thiserror::Error)]
#[error("Event not delivered: {message}")]
pub struct EventError {
    pub message: String,
}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted while editing and tracking a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowEvent {
    #[serde(rename_all = "camelCase")]
    BlockAdded {
        workflow_id: String,
        block: BlockInstance,
    },

    #[serde(rename_all = "camelCase")]
    BlockRemoved {
        workflow_id: String,
        block_id: BlockId,
    },

    /// Config, label, or position changed
    #[serde(rename_all = "camelCase")]
    BlockUpdated {
        workflow_id: String,
        block: BlockInstance,
    },

    #[serde(rename_all = "camelCase")]
    ConnectionAdded {
        workflow_id: String,
        connection: Connection,
    },

    #[serde(rename_all = "camelCase")]
    ConnectionRemoved {
        workflow_id: String,
        connection_id: ConnectionId,
    },

    /// The full current error list; empty means the workflow is valid
    #[serde(rename_all = "camelCase")]
    ValidationErrorsChanged {
        workflow_id: String,
        errors: Vec<ValidationError>,
    },

    /// A block's execution status moved forward
    #[serde(rename_all = "camelCase")]
    ExecutionStateChanged {
        workflow_id: String,
        execution_id: String,
        block_id: BlockId,
        status: BlockStatus,
    },

    /// The overall run status changed
    #[serde(rename_all = "camelCase")]
    ExecutionStatusChanged {
        workflow_id: String,
        execution_id: String,
        status: RunStatus,
    },

    /// Polling health changed (e.g., remote unreachable)
    #[serde(rename_all = "camelCase")]
    TrackingHealthChanged {
        workflow_id: String,
        execution_id: String,
        health: TrackerHealth,
    },
}

impl WorkflowEvent {
    /// Create a block execution state event
    pub fn execution_state(
        workflow_id: &str,
        execution_id: &str,
        block_id: &str,
        status: BlockStatus,
    ) -> Self {
        Self::ExecutionStateChanged {
            workflow_id: workflow_id.to_string(),
            execution_id: execution_id.to_string(),
            block_id: block_id.to_string(),
            status,
        }
    }
}

/// Send an event, logging instead of failing when the sink is gone
pub fn emit(sink: &dyn EventSink, event: WorkflowEvent) {
    if let Err(e) = sink.send(event) {
        log::warn!("Failed to emit workflow event: {}", e);
    }
}

/// Drops every event (headless use)
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Keeps every event in memory, in emission order
pub struct VecEventSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Copy of everything received so far
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Event sink that forwards into an unbounded tokio channel
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that drains it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.tx.send(event).map_err(|_| EventError::channel_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_keeps_order() {
        let sink = VecEventSink::new();

        sink.send(WorkflowEvent::execution_state("wf", "exec1", "b1", BlockStatus::Running))
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);

        match &events[0] {
            WorkflowEvent::ExecutionStateChanged { block_id, status, .. } => {
                assert_eq!(block_id, "b1");
                assert_eq!(*status, BlockStatus::Running);
            }
            _ => panic!("Expected ExecutionStateChanged event"),
        }

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_wire_format() {
        let event = WorkflowEvent::BlockRemoved {
            workflow_id: "wf".to_string(),
            block_id: "b1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "blockRemoved");
        assert_eq!(json["blockId"], "b1");
    }

    #[test]
    fn test_channel_sink_closed() {
        let (sink, rx) = ChannelEventSink::new();
        drop(rx);
        let err = sink
            .send(WorkflowEvent::execution_state("wf", "e", "b", BlockStatus::Success))
            .unwrap_err();
        assert_eq!(err.message, "Channel closed");
    }

    #[test]
    fn test_emit_into_null_sink() {
        let sink = NullEventSink;
        emit(
            &sink,
            WorkflowEvent::execution_state("wf", "e", "b", BlockStatus::Pending),
        );
    }
}
