//! Deterministic names shared by the compiler and the execution tracker
//!
//! The compiler names every emitted step (and every job) from the block it
//! came from. The remote side reports results under those same names, which
//! is how the tracker maps them back to block ids.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{BlockId, BlockInstance};

/// Emitted step and job names → originating block
///
/// Steps and jobs live in separate scopes: a job key may equal the name of
/// a step inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMap {
    #[serde(default)]
    pub steps: BTreeMap<String, BlockId>,
    #[serde(default)]
    pub jobs: BTreeMap<String, BlockId>,
}

impl NameMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_step(&mut self, name: impl Into<String>, block_id: impl Into<BlockId>) {
        self.steps.insert(name.into(), block_id.into());
    }

    pub fn insert_job(&mut self, key: impl Into<String>, block_id: impl Into<BlockId>) {
        self.jobs.insert(key.into(), block_id.into());
    }

    /// Block of a remote step
    pub fn resolve_step(&self, remote_name: &str) -> Option<&BlockId> {
        self.steps.get(remote_name)
    }

    /// Block of a remote job
    ///
    /// Matrix jobs are reported as `"{key} (a, b)"`; the suffix is stripped
    /// when the full name is not mapped.
    pub fn resolve_job(&self, remote_name: &str) -> Option<&BlockId> {
        if let Some(id) = self.jobs.get(remote_name) {
            return Some(id);
        }
        let trimmed = remote_name.trim_end();
        if trimmed.ends_with(')') {
            if let Some(open) = trimmed.rfind(" (") {
                return self.jobs.get(&trimmed[..open]);
            }
        }
        None
    }

    /// Every block that has at least one name
    pub fn block_ids(&self) -> BTreeSet<&BlockId> {
        self.steps.values().chain(self.jobs.values()).collect()
    }
}

/// Display name of the step emitted for a block
///
/// `"{label} ({id})"` when a label is set, otherwise `"{type}-{id}"`.
/// Including the id keeps two identically labelled blocks distinct.
/// Expression markers are removed so the runner reports the name verbatim.
pub fn step_name(block: &BlockInstance) -> String {
    let name = match block.label.as_deref().map(str::trim) {
        Some(label) if !label.is_empty() => format!("{} ({})", label, block.id),
        _ => format!("{}-{}", block.block_type, block.id),
    };
    literal(name)
}

/// Drop every `${{` opener; the runner would evaluate what follows
fn literal(mut text: String) -> String {
    while text.contains("${{") {
        text = text.replace("${{", "{{");
    }
    text
}

/// Name of an extra step emitted for the same block (e.g. a registry login)
pub fn auxiliary_step_name(block: &BlockInstance, purpose: &str) -> String {
    format!("{} ({})", step_name(block), purpose)
}

/// Key of the job opened by a block
///
/// Job keys may only hold `[A-Za-z0-9_-]` and must start with a letter
/// or underscore.
pub fn job_key(block: &BlockInstance) -> String {
    let raw = format!("{}-{}", block.block_type, block.id);
    let mut key: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !key.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        key.insert(0, '_');
    }
    key
}

/// File-system-safe form of a workflow name
///
/// Lower-cases, maps spaces and underscores to `-`, and drops everything
/// else that is not ASCII alphanumeric. Falls back to `workflow-<id>`.
pub fn safe_file_stem(name: &str, workflow_id: &str) -> String {
    let stem: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' | '_' | '-' => Some('-'),
            c if c.is_ascii_alphanumeric() => Some(c),
            _ => None,
        })
        .collect();
    let stem = stem.trim_matches('-').to_string();
    if stem.is_empty() {
        format!("workflow-{}", workflow_id)
    } else {
        stem
    }
}

/// Repository path of the pipeline file for a workflow
pub fn workflow_file_path(name: &str, workflow_id: &str) -> String {
    format!(".github/workflows/{}.yml", safe_file_stem(name, workflow_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockConfig, Position};

    fn block(id: &str, block_type: &str, label: Option<&str>) -> BlockInstance {
        BlockInstance {
            id: id.to_string(),
            block_type: block_type.to_string(),
            position: Position::default(),
            config: BlockConfig::new(),
            label: label.map(str::to_string),
        }
    }

    #[test]
    fn test_step_name() {
        assert_eq!(step_name(&block("b1", "job-checkout", None)), "job-checkout-b1");
        assert_eq!(
            step_name(&block("b2", "job-test", Some("Unit tests"))),
            "Unit tests (b2)"
        );
        assert_eq!(step_name(&block("b3", "job-test", Some("  "))), "job-test-b3");
    }

    #[test]
    fn test_step_name_is_never_an_expression() {
        let name = step_name(&block("b4", "job-test", Some("Tests ${{ matrix.os }}")));
        assert_eq!(name, "Tests {{ matrix.os }} (b4)");

        let nested = step_name(&block("b5", "job-test", Some("$${{{ x }}")));
        assert!(!nested.contains("${{"), "{}", nested);
    }

    #[test]
    fn test_job_key_sanitized() {
        assert_eq!(job_key(&block("a.b c", "job-build", None)), "job-build-a_b_c");
        assert_eq!(job_key(&block("x", "9-odd", None)), "_9-odd-x");
    }

    #[test]
    fn test_resolve_strips_matrix_suffix() {
        let mut names = NameMap::new();
        names.insert_job("control-matrix-m1", "m1");
        names.insert_job("Deploy (v2)", "d1");
        names.insert_step("job-test-t1", "t1");

        assert_eq!(
            names.resolve_job("control-matrix-m1 (ubuntu-latest, 20)").map(String::as_str),
            Some("m1")
        );
        // An exact match wins over stripping
        assert_eq!(names.resolve_job("Deploy (v2)").map(String::as_str), Some("d1"));
        assert_eq!(names.resolve_job("job-test-t1"), None);
        assert_eq!(names.resolve_step("job-test-t1").map(String::as_str), Some("t1"));
        assert_eq!(names.resolve_step("Set up job"), None);
    }

    #[test]
    fn test_workflow_file_path() {
        assert_eq!(workflow_file_path("CI Build_Nightly!", "w1"), ".github/workflows/ci-build-nightly.yml");
        assert_eq!(workflow_file_path("  ", "w1"), ".github/workflows/workflow-w1.yml");
        assert_eq!(workflow_file_path("日本", "w2"), ".github/workflows/workflow-w2.yml");
    }
}
