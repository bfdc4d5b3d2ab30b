//! Typed model of the emitted GitHub Actions workflow file
//!
//! The compiler fills these structs and hands them to `serde_yaml_ng`.
//! Field order here is emission order, and every map is ordered, so the
//! text is a pure function of the values.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::naming::NameMap;

/// Compiled pipeline text plus the names the tracker maps back to blocks
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDocument {
    pub text: String,
    pub names: NameMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct PipelineFile {
    pub name: String,
    pub on: OnSection,
    pub jobs: JobMap,
}

/// The `on:` section; one optional entry per event kind
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct OnSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<BranchFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<BranchFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Vec<CronEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_dispatch: Option<Dispatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<BranchFilter>,
}

/// Event filter lists; empty lists are omitted
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct BranchFilter {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

impl BranchFilter {
    /// Union another filter into this one, keeping first-seen order
    pub fn merge(&mut self, other: BranchFilter) {
        fn union(into: &mut Vec<String>, from: Vec<String>) {
            for item in from {
                if !into.contains(&item) {
                    into.push(item);
                }
            }
        }
        union(&mut self.types, other.types);
        union(&mut self.branches, other.branches);
        union(&mut self.paths, other.paths);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct CronEntry {
    pub cron: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub(crate) struct Dispatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<serde_yaml_ng::Value>,
}

/// Jobs in plan order, serialized as a mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct JobMap(pub Vec<(String, Job)>);

impl Serialize for JobMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, job) in &self.0 {
            map.serialize_entry(key, job)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Job {
    pub runs_on: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Strategy {
    pub matrix: serde_yaml_ng::Value,
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Step {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Step {
    pub fn uses(name: impl Into<String>, action: &str) -> Self {
        Self {
            name: name.into(),
            uses: Some(action.to_string()),
            ..Self::default()
        }
    }

    pub fn run(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: Some(script.into()),
            ..Self::default()
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.with.insert(key.to_string(), value.into());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_string(), value.into());
        self
    }
}
