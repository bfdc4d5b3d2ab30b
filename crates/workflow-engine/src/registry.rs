//! Block type registry
//!
//! Maps block type tags to their definitions: category, ports, and config
//! schema. The built-in catalog is a fixed table (see [`crate::catalog`]);
//! [`BlockRegistry::builtin`] returns it as a process-wide singleton.
//!
//! # Usage
//!
//! ```ignore
//! use workflow_engine::{BlockRegistry, BlockCategory};
//!
//! let registry = BlockRegistry::builtin();
//! let checkout = registry.lookup("job-checkout")?;
//! let triggers = registry.list_by_category(BlockCategory::Trigger);
//! ```

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};
use crate::schema::ConfigField;
use crate::types::{BlockCategory, BlockConfig, PortDefinition};

/// Closed set of block types understood by the compiler
///
/// Serialized as the kebab-case type tag (`job-setup-node`), which is also
/// what [`BlockInstance::block_type`](crate::types::BlockInstance) stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockKind {
    TriggerPush,
    TriggerPr,
    TriggerSchedule,
    TriggerManual,
    TriggerRelease,
    JobCheckout,
    JobSetupNode,
    JobSetupPython,
    JobRunScript,
    JobInstallDeps,
    JobBuild,
    JobTest,
    JobLint,
    ControlCondition,
    ControlMatrix,
    ControlParallel,
    ControlWait,
    ActionCreateRelease,
    ActionCommentPr,
    ActionLabel,
    IntegrationDeployVercel,
    IntegrationDockerBuild,
    IntegrationNotifySlack,
    IntegrationNpmPublish,
    UtilityCache,
    UtilityUploadArtifact,
    UtilityDownloadArtifact,
    UtilityEnv,
}

impl BlockKind {
    pub const ALL: [BlockKind; 28] = [
        BlockKind::TriggerPush,
        BlockKind::TriggerPr,
        BlockKind::TriggerSchedule,
        BlockKind::TriggerManual,
        BlockKind::TriggerRelease,
        BlockKind::JobCheckout,
        BlockKind::JobSetupNode,
        BlockKind::JobSetupPython,
        BlockKind::JobRunScript,
        BlockKind::JobInstallDeps,
        BlockKind::JobBuild,
        BlockKind::JobTest,
        BlockKind::JobLint,
        BlockKind::ControlCondition,
        BlockKind::ControlMatrix,
        BlockKind::ControlParallel,
        BlockKind::ControlWait,
        BlockKind::ActionCreateRelease,
        BlockKind::ActionCommentPr,
        BlockKind::ActionLabel,
        BlockKind::IntegrationDeployVercel,
        BlockKind::IntegrationDockerBuild,
        BlockKind::IntegrationNotifySlack,
        BlockKind::IntegrationNpmPublish,
        BlockKind::UtilityCache,
        BlockKind::UtilityUploadArtifact,
        BlockKind::UtilityDownloadArtifact,
        BlockKind::UtilityEnv,
    ];

    /// The type tag stored on block instances
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TriggerPush => "trigger-push",
            Self::TriggerPr => "trigger-pr",
            Self::TriggerSchedule => "trigger-schedule",
            Self::TriggerManual => "trigger-manual",
            Self::TriggerRelease => "trigger-release",
            Self::JobCheckout => "job-checkout",
            Self::JobSetupNode => "job-setup-node",
            Self::JobSetupPython => "job-setup-python",
            Self::JobRunScript => "job-run-script",
            Self::JobInstallDeps => "job-install-deps",
            Self::JobBuild => "job-build",
            Self::JobTest => "job-test",
            Self::JobLint => "job-lint",
            Self::ControlCondition => "control-condition",
            Self::ControlMatrix => "control-matrix",
            Self::ControlParallel => "control-parallel",
            Self::ControlWait => "control-wait",
            Self::ActionCreateRelease => "action-create-release",
            Self::ActionCommentPr => "action-comment-pr",
            Self::ActionLabel => "action-label",
            Self::IntegrationDeployVercel => "integration-deploy-vercel",
            Self::IntegrationDockerBuild => "integration-docker-build",
            Self::IntegrationNotifySlack => "integration-notify-slack",
            Self::IntegrationNpmPublish => "integration-npm-publish",
            Self::UtilityCache => "utility-cache",
            Self::UtilityUploadArtifact => "utility-upload-artifact",
            Self::UtilityDownloadArtifact => "utility-download-artifact",
            Self::UtilityEnv => "utility-env",
        }
    }

    /// Parse a type tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable definition of a block type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDefinition {
    /// Type tag and emission dispatch key
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub category: BlockCategory,
    /// Human-readable name shown in the palette
    pub name: String,
    pub description: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    pub config_schema: Vec<ConfigField>,
}

impl BlockDefinition {
    /// The type tag of this definition
    pub fn block_type(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn is_trigger(&self) -> bool {
        self.category == BlockCategory::Trigger
    }

    pub fn input(&self, port_id: &str) -> Option<&PortDefinition> {
        self.inputs.iter().find(|p| p.id == port_id)
    }

    pub fn output(&self, port_id: &str) -> Option<&PortDefinition> {
        self.outputs.iter().find(|p| p.id == port_id)
    }

    pub fn field(&self, key: &str) -> Option<&ConfigField> {
        self.config_schema.iter().find(|f| f.key == key)
    }

    /// Config populated with every field's schema default
    pub fn default_config(&self) -> BlockConfig {
        self.config_schema
            .iter()
            .filter_map(|f| f.default.clone().map(|v| (f.key.clone(), v)))
            .collect()
    }
}

/// Registry of block definitions keyed by type tag
///
/// Listing preserves registration order, so palettes render in the same
/// order as the catalog table.
pub struct BlockRegistry {
    definitions: Vec<BlockDefinition>,
    index: HashMap<String, usize>,
}

impl BlockRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            definitions: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registry populated with the built-in catalog
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for definition in crate::catalog::builtin_definitions() {
            registry.register(definition);
        }
        registry
    }

    /// Shared built-in registry, created on first use
    pub fn builtin() -> &'static BlockRegistry {
        static BUILTIN: OnceLock<BlockRegistry> = OnceLock::new();
        BUILTIN.get_or_init(Self::with_builtin)
    }

    /// Register a definition, replacing any existing one with the same type
    pub fn register(&mut self, definition: BlockDefinition) {
        let key = definition.block_type().to_string();
        if let Some(&i) = self.index.get(&key) {
            self.definitions[i] = definition;
        } else {
            self.index.insert(key, self.definitions.len());
            self.definitions.push(definition);
        }
    }

    /// Look up a definition, failing with `UnknownBlockType`
    pub fn lookup(&self, block_type: &str) -> Result<&BlockDefinition> {
        self.get(block_type)
            .ok_or_else(|| WorkflowError::UnknownBlockType(block_type.to_string()))
    }

    /// Look up a definition
    pub fn get(&self, block_type: &str) -> Option<&BlockDefinition> {
        self.index.get(block_type).map(|&i| &self.definitions[i])
    }

    /// Definitions of one category, in registration order
    pub fn list_by_category(&self, category: BlockCategory) -> Vec<&BlockDefinition> {
        self.definitions
            .iter()
            .filter(|d| d.category == category)
            .collect()
    }

    /// All definitions, in registration order
    pub fn all(&self) -> &[BlockDefinition] {
        &self.definitions
    }

    /// Check if a block type is registered
    pub fn has_block_type(&self, block_type: &str) -> bool {
        self.index.contains_key(block_type)
    }

    /// Whether the type is a registered trigger
    pub fn is_trigger(&self, block_type: &str) -> bool {
        self.get(block_type).is_some_and(|d| d.is_trigger())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_round_trip() {
        for kind in BlockKind::ALL {
            assert_eq!(BlockKind::from_tag(kind.as_str()), Some(kind));
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
        assert_eq!(BlockKind::from_tag("job-deploy-mainframe"), None);
    }

    #[test]
    fn test_builtin_lookup() {
        let registry = BlockRegistry::builtin();
        assert_eq!(registry.len(), BlockKind::ALL.len());

        let schedule = registry.lookup("trigger-schedule").unwrap();
        assert_eq!(schedule.category, BlockCategory::Trigger);
        assert!(schedule.inputs.is_empty());
        assert_eq!(
            schedule.default_config().get("cron"),
            Some(&serde_json::json!("0 0 * * *"))
        );
    }

    #[test]
    fn test_unknown_type_is_error() {
        let registry = BlockRegistry::builtin();
        let err = registry.lookup("job-teleport").unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownBlockType(t) if t == "job-teleport"));
    }

    #[test]
    fn test_list_by_category_preserves_order() {
        let registry = BlockRegistry::builtin();
        let triggers: Vec<_> = registry
            .list_by_category(BlockCategory::Trigger)
            .iter()
            .map(|d| d.block_type())
            .collect();
        assert_eq!(
            triggers,
            vec![
                "trigger-push",
                "trigger-pr",
                "trigger-schedule",
                "trigger-manual",
                "trigger-release"
            ]
        );
        assert_eq!(registry.list_by_category(BlockCategory::Control).len(), 4);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = BlockRegistry::with_builtin();
        let mut lint = registry.lookup("job-lint").unwrap().clone();
        lint.name = "Lint (strict)".to_string();
        registry.register(lint);

        assert_eq!(registry.len(), BlockKind::ALL.len());
        assert_eq!(registry.lookup("job-lint").unwrap().name, "Lint (strict)");
    }
}
