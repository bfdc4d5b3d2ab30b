//! Undo/redo over compressed workflow snapshots
//!
//! The editor records the whole workflow after every successful mutation.
//! Each record is zstd-compressed JSON, so a full history of small graphs
//! costs a few kilobytes and no operation needs an inverse.

use crate::error::{Result, WorkflowError};
use crate::types::Workflow;

/// Default number of states kept, including the present one
pub const DEFAULT_CAPACITY: usize = 100;

/// zstd level for snapshots
const COMPRESSION_LEVEL: i32 = 3;

/// One compressed workflow state
#[derive(Clone)]
struct Snapshot(Vec<u8>);

impl Snapshot {
    fn capture(workflow: &Workflow) -> Result<Self> {
        let json = serde_json::to_vec(workflow)?;
        zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL)
            .map(Self)
            .map_err(|e| WorkflowError::Compression(e.to_string()))
    }

    fn restore(&self) -> Result<Workflow> {
        let json = zstd::decode_all(self.0.as_slice())
            .map_err(|e| WorkflowError::Compression(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Linear history: past states, the present, and undone states
pub struct UndoStack {
    past: Vec<Snapshot>,
    present: Option<Snapshot>,
    future: Vec<Snapshot>,
    capacity: usize,
}

impl UndoStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            past: Vec::new(),
            present: None,
            future: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record a new present state; undone states are discarded
    pub fn push(&mut self, workflow: &Workflow) -> Result<()> {
        let snapshot = Snapshot::capture(workflow)?;
        if let Some(previous) = self.present.replace(snapshot) {
            self.past.push(previous);
        }
        self.future.clear();

        let overflow = self.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.past.drain(..overflow.min(self.past.len()));
        }
        Ok(())
    }

    /// Move the present one step back; `None` at the oldest state
    pub fn undo(&mut self) -> Option<Result<Workflow>> {
        let previous = self.past.pop()?;
        if let Some(current) = self.present.replace(previous) {
            self.future.push(current);
        }
        self.present.as_ref().map(Snapshot::restore)
    }

    /// Re-apply the most recently undone state; `None` if there is none
    pub fn redo(&mut self) -> Option<Result<Workflow>> {
        let next = self.future.pop()?;
        if let Some(current) = self.present.replace(next) {
            self.past.push(current);
        }
        self.present.as_ref().map(Snapshot::restore)
    }

    /// The present state, if anything was recorded
    pub fn current(&self) -> Option<Result<Workflow>> {
        self.present.as_ref().map(Snapshot::restore)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// Number of recorded states
    pub fn len(&self) -> usize {
        self.past.len() + usize::from(self.present.is_some()) + self.future.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_none()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.present = None;
        self.future.clear();
    }

    /// Bytes held by all snapshots
    pub fn compressed_size(&self) -> usize {
        self.past
            .iter()
            .chain(self.present.iter())
            .chain(self.future.iter())
            .map(|s| s.0.len())
            .sum()
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;

    fn named(name: &str) -> Workflow {
        WorkflowBuilder::new("wf", name)
            .add_block("c1", "job-checkout", (0.0, 0.0))
            .build()
    }

    fn name_of(result: Option<Result<Workflow>>) -> String {
        result.unwrap().unwrap().name
    }

    #[test]
    fn test_walks_history_both_ways() {
        let mut history = UndoStack::new(10);
        assert!(history.is_empty());
        for name in ["first", "second", "third"] {
            history.push(&named(name)).unwrap();
        }

        assert_eq!(name_of(history.current()), "third");
        assert_eq!(name_of(history.undo()), "second");
        assert_eq!(name_of(history.undo()), "first");
        assert!(history.undo().is_none());
        assert_eq!(name_of(history.current()), "first");

        assert_eq!(name_of(history.redo()), "second");
        assert_eq!(name_of(history.redo()), "third");
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_new_edit_after_undo_drops_redo() {
        let mut history = UndoStack::new(10);
        history.push(&named("a")).unwrap();
        history.push(&named("b")).unwrap();
        history.undo();
        history.push(&named("c")).unwrap();

        assert!(!history.can_redo());
        assert_eq!(history.len(), 2);
        assert_eq!(name_of(history.undo()), "a");
    }

    #[test]
    fn test_oldest_states_fall_off() {
        let mut history = UndoStack::new(3);
        for i in 0..5 {
            history.push(&named(&format!("v{}", i))).unwrap();
        }
        assert_eq!(history.len(), 3);
        assert_eq!(name_of(history.undo()), "v3");
        assert_eq!(name_of(history.undo()), "v2");
        assert!(!history.can_undo());
        assert!(history.compressed_size() > 0);

        history.clear();
        assert!(history.current().is_none());
    }
}
