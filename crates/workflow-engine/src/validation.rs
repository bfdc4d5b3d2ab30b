//! Workflow validation
//!
//! [`validate`] runs every check and returns all problems as data. Nothing
//! here fails or short-circuits: the UI shows the whole list at once, and
//! the compiler refuses to run unless the list is empty.
//!
//! Checks, in order:
//! 1. every block type is registered;
//! 2. config fields satisfy their schema;
//! 3. connections reference existing blocks and ports, with compatible
//!    types and within input arity;
//! 4. the non-trigger subgraph is acyclic;
//! 5. every non-trigger block is reachable from a trigger;
//! 6. at least one trigger exists.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::registry::BlockRegistry;
use crate::types::{BlockId, ConnectionId, Workflow};

/// Category of a validation problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationErrorKind {
    UnknownBlockType,
    MissingRequiredField,
    SchemaViolation,
    MissingBlock,
    MissingPort,
    PortMismatch,
    ArityExceeded,
    Cycle,
    Unreachable,
    MissingTrigger,
}

/// A single validation problem, located on a block or a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl ValidationError {
    fn on_block(block_id: &str, kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            block_id: Some(block_id.to_string()),
            connection_id: None,
            kind,
            message: message.into(),
        }
    }

    fn on_connection(
        connection_id: &str,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            block_id: None,
            connection_id: Some(connection_id.to_string()),
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.block_id, &self.connection_id) {
            (Some(block), _) => write!(f, "[{:?}] block '{}': {}", self.kind, block, self.message),
            (None, Some(conn)) => {
                write!(f, "[{:?}] connection '{}': {}", self.kind, conn, self.message)
            }
            (None, None) => write!(f, "[{:?}] {}", self.kind, self.message),
        }
    }
}

/// Result of validating a workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// True when no errors were found
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors of one kind
    pub fn of_kind(&self, kind: ValidationErrorKind) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }

    pub fn has_kind(&self, kind: ValidationErrorKind) -> bool {
        self.of_kind(kind).next().is_some()
    }
}

/// Validate a workflow against a registry
///
/// Returns all errors found, not just the first.
pub fn validate(workflow: &Workflow, registry: &BlockRegistry) -> ValidationResult {
    let mut errors = Vec::new();

    check_block_types(workflow, registry, &mut errors);
    check_config(workflow, registry, &mut errors);
    check_connections(workflow, registry, &mut errors);
    check_cycles(workflow, registry, &mut errors);
    check_reachability(workflow, registry, &mut errors);
    check_trigger_present(workflow, registry, &mut errors);

    ValidationResult { errors }
}

fn check_block_types(workflow: &Workflow, registry: &BlockRegistry, errors: &mut Vec<ValidationError>) {
    for block in &workflow.blocks {
        if !registry.has_block_type(&block.block_type) {
            errors.push(ValidationError::on_block(
                &block.id,
                ValidationErrorKind::UnknownBlockType,
                format!("Unknown block type '{}'", block.block_type),
            ));
        }
    }
}

fn check_config(workflow: &Workflow, registry: &BlockRegistry, errors: &mut Vec<ValidationError>) {
    for block in &workflow.blocks {
        let Some(definition) = registry.get(&block.block_type) else {
            continue;
        };

        for field in &definition.config_schema {
            let value = block.config.get(&field.key);
            let present = value.is_some_and(|v| match v {
                serde_json::Value::Null => false,
                serde_json::Value::String(s) => !s.trim().is_empty(),
                serde_json::Value::Array(a) => !a.is_empty(),
                _ => true,
            });

            if field.required && !present {
                errors.push(ValidationError::on_block(
                    &block.id,
                    ValidationErrorKind::MissingRequiredField,
                    format!("'{}' is required", field.label),
                ));
                continue;
            }

            if let Err(reason) = field.check_required(value) {
                errors.push(ValidationError::on_block(
                    &block.id,
                    ValidationErrorKind::SchemaViolation,
                    format!("'{}': {}", field.label, reason),
                ));
            }
        }

        for key in block.config.keys() {
            if definition.field(key).is_none() {
                errors.push(ValidationError::on_block(
                    &block.id,
                    ValidationErrorKind::SchemaViolation,
                    format!("'{}' has no field '{}'", definition.block_type(), key),
                ));
            }
        }
    }
}

fn check_connections(workflow: &Workflow, registry: &BlockRegistry, errors: &mut Vec<ValidationError>) {
    // (target block, target port) -> incoming count
    let mut fan_in: BTreeMap<(&str, &str), usize> = BTreeMap::new();

    for conn in &workflow.connections {
        let source = workflow.find_block(&conn.source_block_id);
        let target = workflow.find_block(&conn.target_block_id);

        for (block, id) in [(source, &conn.source_block_id), (target, &conn.target_block_id)] {
            if block.is_none() {
                errors.push(ValidationError::on_connection(
                    &conn.id,
                    ValidationErrorKind::MissingBlock,
                    format!("references missing block '{}'", id),
                ));
            }
        }
        let (Some(source), Some(target)) = (source, target) else {
            continue;
        };

        // Unknown types were reported by the first check
        let (Some(source_def), Some(target_def)) =
            (registry.get(&source.block_type), registry.get(&target.block_type))
        else {
            continue;
        };

        let out_port = source_def.output(&conn.source_port_id);
        let in_port = target_def.input(&conn.target_port_id);
        if out_port.is_none() {
            errors.push(ValidationError::on_connection(
                &conn.id,
                ValidationErrorKind::MissingPort,
                format!("block '{}' has no output port '{}'", source.id, conn.source_port_id),
            ));
        }
        if in_port.is_none() {
            errors.push(ValidationError::on_connection(
                &conn.id,
                ValidationErrorKind::MissingPort,
                format!("block '{}' has no input port '{}'", target.id, conn.target_port_id),
            ));
        }
        let (Some(out_port), Some(in_port)) = (out_port, in_port) else {
            continue;
        };

        if !out_port.port_type.is_compatible_with(&in_port.port_type) {
            errors.push(ValidationError::on_connection(
                &conn.id,
                ValidationErrorKind::PortMismatch,
                format!(
                    "{:?} output cannot feed {:?} input",
                    out_port.port_type, in_port.port_type
                ),
            ));
        }

        if source_def.is_trigger() {
            continue;
        }
        let count = fan_in
            .entry((target.id.as_str(), in_port.id.as_str()))
            .or_insert(0);
        *count += 1;
        if let Some(limit) = in_port.input_arity() {
            if *count == limit + 1 {
                errors.push(ValidationError::on_block(
                    &target.id,
                    ValidationErrorKind::ArityExceeded,
                    format!("input '{}' accepts at most {} connection(s)", in_port.id, limit),
                ));
            }
        }
    }
}

/// Adjacency over non-trigger blocks; unknown types count as non-trigger
fn non_trigger_graph<'a>(
    workflow: &'a Workflow,
    registry: &BlockRegistry,
) -> BTreeMap<&'a str, BTreeSet<&'a str>> {
    let mut graph: BTreeMap<&str, BTreeSet<&str>> = workflow
        .blocks
        .iter()
        .filter(|b| !registry.is_trigger(&b.block_type))
        .map(|b| (b.id.as_str(), BTreeSet::new()))
        .collect();

    for conn in &workflow.connections {
        let target = conn.target_block_id.as_str();
        if graph.contains_key(target) {
            if let Some(successors) = graph.get_mut(conn.source_block_id.as_str()) {
                successors.insert(target);
            }
        }
    }
    graph
}

/// Report every block that lies on a cycle
///
/// A block is on a cycle when it can reach itself. Each block is checked
/// with a depth-first walk from its successors.
fn check_cycles(workflow: &Workflow, registry: &BlockRegistry, errors: &mut Vec<ValidationError>) {
    let graph = non_trigger_graph(workflow, registry);

    for &start in graph.keys() {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = graph[start].iter().copied().collect();
        let mut on_cycle = false;

        while let Some(current) = stack.pop() {
            if current == start {
                on_cycle = true;
                break;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = graph.get(current) {
                stack.extend(next.iter().copied());
            }
        }

        if on_cycle {
            errors.push(ValidationError::on_block(
                start,
                ValidationErrorKind::Cycle,
                "block is part of a dependency cycle",
            ));
        }
    }
}

fn check_reachability(workflow: &Workflow, registry: &BlockRegistry, errors: &mut Vec<ValidationError>) {
    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = workflow
        .blocks
        .iter()
        .filter(|b| registry.is_trigger(&b.block_type))
        .map(|b| b.id.as_str())
        .collect();

    while let Some(current) = queue.pop_front() {
        if !reached.insert(current) {
            continue;
        }
        for conn in workflow.outgoing(current) {
            queue.push_back(conn.target_block_id.as_str());
        }
    }

    let mut unreached: Vec<&str> = workflow
        .blocks
        .iter()
        .filter(|b| !registry.is_trigger(&b.block_type) && !reached.contains(b.id.as_str()))
        .map(|b| b.id.as_str())
        .collect();
    unreached.sort_unstable();

    for id in unreached {
        errors.push(ValidationError::on_block(
            id,
            ValidationErrorKind::Unreachable,
            "no path from any trigger reaches this block",
        ));
    }
}

fn check_trigger_present(workflow: &Workflow, registry: &BlockRegistry, errors: &mut Vec<ValidationError>) {
    if !workflow
        .blocks
        .iter()
        .any(|b| registry.is_trigger(&b.block_type))
    {
        errors.push(ValidationError {
            block_id: None,
            connection_id: None,
            kind: ValidationErrorKind::MissingTrigger,
            message: "workflow has no trigger block".to_string(),
        });
    }
}
