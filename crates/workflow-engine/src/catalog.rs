//! Built-in block catalog
//!
//! The fixed table the registry is initialized from. Every non-trigger block
//! exposes one `in` and one `out` port of type `job`; triggers have no inputs.
//! `control-wait` is the only block whose input accepts several connections.

use serde_json::json;

use crate::registry::{BlockDefinition, BlockKind};
use crate::schema::{ConfigField, FieldType};
use crate::types::{BlockCategory, PortDefinition, PortType};

/// Five whitespace-separated cron fields
const CRON_PATTERN: &str = r"^\S+(\s+\S+){4}$";

fn trigger(
    kind: BlockKind,
    name: &str,
    description: &str,
    config_schema: Vec<ConfigField>,
) -> BlockDefinition {
    BlockDefinition {
        kind,
        category: BlockCategory::Trigger,
        name: name.to_string(),
        description: description.to_string(),
        inputs: Vec::new(),
        outputs: vec![PortDefinition::optional("out", "Output", PortType::Trigger).multiple()],
        config_schema,
    }
}

fn step(
    kind: BlockKind,
    category: BlockCategory,
    name: &str,
    description: &str,
    config_schema: Vec<ConfigField>,
) -> BlockDefinition {
    BlockDefinition {
        kind,
        category,
        name: name.to_string(),
        description: description.to_string(),
        inputs: vec![PortDefinition::required("in", "Input", PortType::Job)],
        outputs: vec![PortDefinition::optional("out", "Output", PortType::Job).multiple()],
        config_schema,
    }
}

fn text(key: &str, label: &str) -> ConfigField {
    ConfigField::new(key, label, FieldType::Text)
}

fn select(key: &str, label: &str, options: &[&str]) -> ConfigField {
    ConfigField::new(key, label, FieldType::Select).with_options(options)
}

fn flag(key: &str, label: &str, default: bool) -> ConfigField {
    ConfigField::new(key, label, FieldType::Boolean).with_default(json!(default))
}

fn command(label: &str, default: &str) -> ConfigField {
    text("command", label).required().with_default(json!(default))
}

/// All built-in block definitions, in palette order
pub fn builtin_definitions() -> Vec<BlockDefinition> {
    use BlockCategory::*;
    use BlockKind::*;

    vec![
        // Triggers
        trigger(
            TriggerPush,
            "Push",
            "Triggered when code is pushed to repository",
            vec![
                text("branches", "Branches").with_default(json!("main")),
                text("paths", "Paths").with_default(json!("")),
            ],
        ),
        trigger(
            TriggerPr,
            "Pull Request",
            "Triggered on pull request events",
            vec![
                ConfigField::new("types", "Event Types", FieldType::Multiselect)
                    .with_options(&["opened", "closed", "synchronize", "reopened", "ready_for_review"])
                    .with_default(json!(["opened", "synchronize"])),
                text("branches", "Target Branches").with_default(json!("main")),
            ],
        ),
        trigger(
            TriggerSchedule,
            "Schedule",
            "Triggered on a schedule (cron)",
            vec![text("cron", "Cron Expression")
                .required()
                .with_pattern(CRON_PATTERN)
                .with_default(json!("0 0 * * *"))],
        ),
        trigger(
            TriggerManual,
            "Manual Trigger",
            "Manually triggered workflow",
            vec![ConfigField::new("inputs", "Input Parameters", FieldType::Code)
                .yaml_mapping()
                .with_default(json!(""))],
        ),
        trigger(
            TriggerRelease,
            "Release",
            "Triggered on release events",
            vec![ConfigField::new("types", "Event Types", FieldType::Multiselect)
                .with_options(&["published", "created", "prereleased"])
                .with_default(json!(["published"]))],
        ),
        // Jobs
        step(
            JobCheckout,
            Job,
            "Checkout",
            "Checkout repository code",
            vec![
                ConfigField::new("fetchDepth", "Fetch Depth", FieldType::Number)
                    .with_range(Some(0.0), None)
                    .with_default(json!(1)),
                select("submodules", "Submodules", &["false", "true", "recursive"])
                    .with_default(json!("false")),
            ],
        ),
        step(
            JobSetupNode,
            Job,
            "Setup Node.js",
            "Setup Node.js environment",
            vec![
                select("nodeVersion", "Node Version", &["18", "20", "21", "22"])
                    .required()
                    .with_default(json!("20")),
                select("cache", "Package Manager Cache", &["", "npm", "yarn", "pnpm"])
                    .with_default(json!("npm")),
            ],
        ),
        step(
            JobSetupPython,
            Job,
            "Setup Python",
            "Setup Python environment",
            vec![
                select("pythonVersion", "Python Version", &["3.9", "3.10", "3.11", "3.12"])
                    .required()
                    .with_default(json!("3.11")),
                select("cache", "Cache", &["", "pip", "pipenv", "poetry"]).with_default(json!("pip")),
            ],
        ),
        step(
            JobRunScript,
            Job,
            "Run Script",
            "Run shell commands",
            vec![
                text("name", "Step Name").with_default(json!("")),
                ConfigField::new("run", "Commands", FieldType::Code)
                    .required()
                    .with_default(json!("")),
                text("workingDirectory", "Working Directory").with_default(json!("")),
            ],
        ),
        step(
            JobInstallDeps,
            Job,
            "Install Dependencies",
            "Install project dependencies",
            vec![
                select("packageManager", "Package Manager", &["npm", "yarn", "pnpm", "pip"])
                    .required()
                    .with_default(json!("npm")),
                flag("frozen", "Frozen Lockfile", true),
            ],
        ),
        step(
            JobBuild,
            Job,
            "Build",
            "Build the project",
            vec![
                command("Build Command", "npm run build"),
                text("outputDir", "Output Directory").with_default(json!("dist")),
            ],
        ),
        step(
            JobTest,
            Job,
            "Run Tests",
            "Run test suite",
            vec![
                command("Test Command", "npm test"),
                flag("coverage", "Generate Coverage", true),
            ],
        ),
        step(
            JobLint,
            Job,
            "Lint",
            "Run linter checks",
            vec![command("Lint Command", "npm run lint")],
        ),
        // Control
        step(
            ControlCondition,
            Control,
            "Condition",
            "Conditional branching",
            vec![ConfigField::new("condition", "Condition", FieldType::Code)
                .required()
                .with_default(json!(""))],
        ),
        step(
            ControlMatrix,
            Control,
            "Matrix",
            "Run job with matrix strategy",
            vec![
                ConfigField::new("matrix", "Matrix Definition", FieldType::Code)
                    .required()
                    .yaml_mapping()
                    .with_default(json!("os: [ubuntu-latest]\nnode: [20]")),
                flag("failFast", "Fail Fast", true),
            ],
        ),
        step(ControlParallel, Control, "Parallel", "Run jobs in parallel", Vec::new()),
        {
            let mut wait = step(
                ControlWait,
                Control,
                "Wait All",
                "Wait for all inputs to complete",
                Vec::new(),
            );
            wait.inputs = vec![PortDefinition::required("in", "Input", PortType::Job).multiple()];
            wait
        },
        // Actions
        step(
            ActionCreateRelease,
            Action,
            "Create Release",
            "Create GitHub release",
            vec![
                text("tagName", "Tag Name").required().with_default(json!("")),
                text("releaseName", "Release Name").with_default(json!("")),
                flag("draft", "Draft", false),
                flag("prerelease", "Pre-release", false),
            ],
        ),
        step(
            ActionCommentPr,
            Action,
            "Comment on PR",
            "Add comment to pull request",
            vec![ConfigField::new("message", "Comment Message", FieldType::Textarea)
                .required()
                .with_default(json!(""))],
        ),
        step(
            ActionLabel,
            Action,
            "Manage Labels",
            "Add or remove labels",
            vec![
                select("action", "Action", &["add", "remove"])
                    .required()
                    .with_default(json!("add")),
                text("labels", "Labels").required().with_default(json!("")),
            ],
        ),
        // Integrations
        step(
            IntegrationDeployVercel,
            Integration,
            "Deploy to Vercel",
            "Deploy to Vercel platform",
            vec![
                text("projectId", "Project ID").required().with_default(json!("")),
                text("orgId", "Org ID").required().with_default(json!("")),
                flag("production", "Production Deploy", false),
            ],
        ),
        step(
            IntegrationDockerBuild,
            Integration,
            "Docker Build & Push",
            "Build and push Docker image",
            vec![
                select("registry", "Registry", &["ghcr.io", "docker.io", "custom"])
                    .required()
                    .with_default(json!("ghcr.io")),
                text("imageName", "Image Name").required().with_default(json!("")),
                text("dockerfile", "Dockerfile Path").with_default(json!("./Dockerfile")),
                text("tags", "Tags").with_default(json!("latest")),
            ],
        ),
        step(
            IntegrationNotifySlack,
            Integration,
            "Slack Notification",
            "Send Slack notification",
            vec![
                ConfigField::new("webhookUrl", "Webhook URL (Secret)", FieldType::Secret)
                    .required()
                    .with_default(json!("${{ secrets.SLACK_WEBHOOK }}")),
                ConfigField::new("message", "Message", FieldType::Textarea)
                    .required()
                    .with_default(json!("")),
                text("channel", "Channel").with_default(json!("")),
            ],
        ),
        step(
            IntegrationNpmPublish,
            Integration,
            "NPM Publish",
            "Publish package to npm",
            vec![
                select(
                    "registry",
                    "Registry",
                    &["https://registry.npmjs.org", "https://npm.pkg.github.com"],
                )
                .required()
                .with_default(json!("https://registry.npmjs.org")),
                select("access", "Access", &["public", "restricted"]).with_default(json!("public")),
            ],
        ),
        // Utilities
        step(
            UtilityCache,
            Utility,
            "Cache",
            "Cache dependencies or build outputs",
            vec![
                text("path", "Cache Path").required().with_default(json!("")),
                text("key", "Cache Key").required().with_default(json!("")),
                text("restoreKeys", "Restore Keys").with_default(json!("")),
            ],
        ),
        step(
            UtilityUploadArtifact,
            Utility,
            "Upload Artifact",
            "Upload build artifact",
            vec![
                text("name", "Artifact Name").required().with_default(json!("")),
                text("path", "Path").required().with_default(json!("")),
                ConfigField::new("retention", "Retention Days", FieldType::Number)
                    .with_range(Some(1.0), Some(90.0))
                    .with_default(json!(30)),
            ],
        ),
        step(
            UtilityDownloadArtifact,
            Utility,
            "Download Artifact",
            "Download artifact from previous job",
            vec![
                text("name", "Artifact Name").required().with_default(json!("")),
                text("path", "Download Path").with_default(json!("")),
            ],
        ),
        step(
            UtilityEnv,
            Utility,
            "Environment",
            "Set environment variables",
            vec![
                select("environment", "Environment", &["", "development", "staging", "production"])
                    .with_default(json!("production")),
                ConfigField::new("variables", "Variables", FieldType::Code)
                    .yaml_mapping()
                    .with_default(json!("")),
            ],
        ),
    ]
}
