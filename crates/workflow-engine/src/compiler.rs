//! Workflow → GitHub Actions compiler
//!
//! Compilation is deterministic: blocks are visited in a topological order
//! with block id as the tie-break, trigger blocks in id order, and every
//! emitted map is ordered. Reordering the stored block or connection lists
//! never changes the output.
//!
//! # Job boundaries
//!
//! Non-trigger blocks are grouped into jobs while walking the topological
//! order. A block opens a new job when
//!
//! 1. it has no non-trigger predecessor,
//! 2. it merges two or more predecessors,
//! 3. it is a control block, or
//! 4. it is a `job` block whose only predecessor fans out to several
//!    non-trigger successors.
//!
//! Otherwise it becomes the next step of its predecessor's job. A new job
//! `needs` the jobs of all its predecessors; since those were created
//! earlier in the walk, the job graph is acyclic.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use crate::error::CompileError;
use crate::naming::{self, NameMap};
use crate::pipeline::{
    BranchFilter, CronEntry, Dispatch, Job, JobMap, OnSection, PipelineDocument, PipelineFile,
    Step, Strategy,
};
use crate::registry::{BlockKind, BlockRegistry};
use crate::types::{BlockCategory, BlockInstance, Workflow};
use crate::validation::validate;

/// Runner image for every emitted job
pub const RUNNER: &str = "ubuntu-latest";

/// Compile a workflow into a pipeline document
///
/// The workflow must validate. Calling this on an invalid workflow is a
/// caller bug and is reported as [`CompileError::InvalidWorkflow`].
pub fn compile(
    workflow: &Workflow,
    registry: &BlockRegistry,
) -> Result<PipelineDocument, CompileError> {
    let validation = validate(workflow, registry);
    if !validation.is_valid() {
        log::error!(
            "compile called on invalid workflow '{}' ({} errors)",
            workflow.id,
            validation.errors.len()
        );
        return Err(CompileError::InvalidWorkflow(validation.errors));
    }

    let graph = DependencyGraph::build(workflow, registry);
    let mut names = NameMap::new();

    let file = PipelineFile {
        name: workflow.name.clone(),
        on: emit_triggers(workflow, registry)?,
        jobs: emit_jobs(&graph, registry, &mut names)?,
    };

    let text = serde_yaml_ng::to_string(&file)?;
    Ok(PipelineDocument { text, names })
}

/// Non-trigger blocks with their ordered predecessor/successor sets
struct DependencyGraph<'a> {
    order: Vec<&'a BlockInstance>,
    preds: BTreeMap<&'a str, BTreeSet<&'a str>>,
    succs: BTreeMap<&'a str, BTreeSet<&'a str>>,
}

impl<'a> DependencyGraph<'a> {
    fn build(workflow: &'a Workflow, registry: &BlockRegistry) -> Self {
        let blocks: BTreeMap<&str, &BlockInstance> = workflow
            .blocks
            .iter()
            .filter(|b| !registry.is_trigger(&b.block_type))
            .map(|b| (b.id.as_str(), b))
            .collect();

        let mut preds: BTreeMap<&str, BTreeSet<&str>> =
            blocks.keys().map(|&id| (id, BTreeSet::new())).collect();
        let mut succs = preds.clone();
        for conn in &workflow.connections {
            let (source, target) = (conn.source_block_id.as_str(), conn.target_block_id.as_str());
            if blocks.contains_key(source) && blocks.contains_key(target) {
                succs.entry(source).or_default().insert(target);
                preds.entry(target).or_default().insert(source);
            }
        }

        // Kahn's algorithm, smallest id first
        let mut in_degree: BTreeMap<&str, usize> =
            preds.iter().map(|(&id, p)| (id, p.len())).collect();
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(blocks.len());

        while let Some(id) = ready.pop_first() {
            if let Some(&block) = blocks.get(id) {
                order.push(block);
            }
            for &next in succs.get(id).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(next);
                    }
                }
            }
        }

        Self { order, preds, succs }
    }

    fn preds(&self, id: &str) -> impl Iterator<Item = &'a str> + '_ {
        self.preds.get(id).into_iter().flatten().copied()
    }

    fn fan_out(&self, id: &str) -> usize {
        self.succs.get(id).map_or(0, BTreeSet::len)
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn string_list(block: &BlockInstance, key: &str) -> Vec<String> {
    block
        .config
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Non-empty trimmed string config value
fn non_empty<'b>(block: &'b BlockInstance, key: &str) -> Option<&'b str> {
    block
        .config_str(key)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_yaml(source: &str) -> Result<serde_yaml_ng::Value, CompileError> {
    Ok(serde_yaml_ng::from_str(source)?)
}

fn emit_triggers(workflow: &Workflow, registry: &BlockRegistry) -> Result<OnSection, CompileError> {
    let mut triggers: Vec<&BlockInstance> = workflow
        .blocks
        .iter()
        .filter(|b| registry.is_trigger(&b.block_type))
        .collect();
    triggers.sort_by(|a, b| a.id.cmp(&b.id));

    let mut on = OnSection::default();
    for block in triggers {
        let Some(kind) = BlockKind::from_tag(&block.block_type) else {
            continue;
        };
        match kind {
            BlockKind::TriggerPush => {
                let filter = BranchFilter {
                    branches: split_list(block.config_str("branches")),
                    paths: split_list(block.config_str("paths")),
                    ..BranchFilter::default()
                };
                on.push.get_or_insert_with(BranchFilter::default).merge(filter);
            }
            BlockKind::TriggerPr => {
                let filter = BranchFilter {
                    types: string_list(block, "types"),
                    branches: split_list(block.config_str("branches")),
                    ..BranchFilter::default()
                };
                on.pull_request
                    .get_or_insert_with(BranchFilter::default)
                    .merge(filter);
            }
            BlockKind::TriggerSchedule => {
                if let Some(cron) = non_empty(block, "cron") {
                    on.schedule.get_or_insert_with(Vec::new).push(CronEntry {
                        cron: cron.to_string(),
                    });
                }
            }
            BlockKind::TriggerManual => {
                let dispatch = on.workflow_dispatch.get_or_insert_with(Dispatch::default);
                if let Some(inputs) = non_empty(block, "inputs") {
                    let parsed = parse_yaml(inputs)?;
                    match dispatch.inputs.as_mut() {
                        None => dispatch.inputs = Some(parsed),
                        Some(serde_yaml_ng::Value::Mapping(existing)) => {
                            if let serde_yaml_ng::Value::Mapping(more) = parsed {
                                for (key, value) in more {
                                    if !existing.contains_key(&key) {
                                        existing.insert(key, value);
                                    }
                                }
                            }
                        }
                        Some(_) => {}
                    }
                }
            }
            BlockKind::TriggerRelease => {
                let filter = BranchFilter {
                    types: string_list(block, "types"),
                    ..BranchFilter::default()
                };
                on.release.get_or_insert_with(BranchFilter::default).merge(filter);
            }
            _ => {}
        }
    }
    Ok(on)
}

/// A job under construction
struct PlannedJob<'a> {
    key: String,
    opener: &'a BlockInstance,
    needs: BTreeSet<String>,
    blocks: Vec<&'a BlockInstance>,
}

fn plan_jobs<'a>(graph: &DependencyGraph<'a>, registry: &BlockRegistry) -> Vec<PlannedJob<'a>> {
    let mut jobs: Vec<PlannedJob<'a>> = Vec::new();
    let mut job_of: BTreeMap<&str, usize> = BTreeMap::new();
    let mut used_keys: BTreeSet<String> = BTreeSet::new();

    for &block in &graph.order {
        let preds: Vec<&str> = graph.preds(&block.id).collect();
        let category = registry.get(&block.block_type).map(|d| d.category);

        let joins = match preds.as_slice() {
            [single] => {
                let forks = category == Some(BlockCategory::Job) && graph.fan_out(single) > 1;
                if category == Some(BlockCategory::Control) || forks {
                    None
                } else {
                    job_of.get(single).copied()
                }
            }
            _ => None,
        };

        let index = match joins {
            Some(index) => {
                jobs[index].blocks.push(block);
                index
            }
            None => {
                let mut key = naming::job_key(block);
                let mut n = 2;
                while used_keys.contains(&key) {
                    key = format!("{}-{}", naming::job_key(block), n);
                    n += 1;
                }
                used_keys.insert(key.clone());

                let needs = preds
                    .iter()
                    .filter_map(|p| job_of.get(p))
                    .map(|&i| jobs[i].key.clone())
                    .collect();
                jobs.push(PlannedJob {
                    key,
                    opener: block,
                    needs,
                    blocks: vec![block],
                });
                jobs.len() - 1
            }
        };
        job_of.insert(block.id.as_str(), index);
    }

    jobs
}

fn emit_jobs(
    graph: &DependencyGraph<'_>,
    registry: &BlockRegistry,
    names: &mut NameMap,
) -> Result<JobMap, CompileError> {
    let mut jobs = Vec::new();

    for planned in plan_jobs(graph, registry) {
        let mut job = Job {
            runs_on: RUNNER.to_string(),
            needs: planned.needs.into_iter().collect(),
            condition: None,
            environment: None,
            strategy: None,
            steps: Vec::new(),
        };

        let opener = planned.opener;
        let opener_kind = BlockKind::from_tag(&opener.block_type);
        match opener_kind {
            Some(BlockKind::ControlCondition) => {
                job.condition = non_empty(opener, "condition").map(str::to_string);
            }
            Some(BlockKind::ControlMatrix) => {
                let matrix = non_empty(opener, "matrix").unwrap_or_default();
                job.strategy = Some(Strategy {
                    matrix: parse_yaml(matrix)?,
                    fail_fast: opener.config_bool("failFast").unwrap_or(true),
                });
            }
            _ => {}
        }

        for &block in &planned.blocks {
            if block.block_type == BlockKind::UtilityEnv.as_str() && job.environment.is_none() {
                job.environment = non_empty(block, "environment").map(str::to_string);
            }
            for step in emit_steps(block)? {
                names.insert_step(step.name.clone(), block.id.clone());
                job.steps.push(step);
            }
        }

        let opened_by_control =
            registry.get(&opener.block_type).map(|d| d.category) == Some(BlockCategory::Control);
        if opened_by_control {
            names.insert_job(planned.key.clone(), opener.id.clone());
        }
        if job.steps.is_empty() {
            // A job needs at least one step to be accepted by the runner
            let label = registry
                .get(&opener.block_type)
                .map_or(opener.block_type.as_str(), |d| d.name.as_str());
            job.steps.push(Step::run(
                naming::step_name(opener),
                format!("echo \"{} reached\"", label),
            ));
        }

        jobs.push((planned.key, job));
    }

    Ok(JobMap(jobs))
}

/// Steps for one block; control blocks emit none
fn emit_steps(block: &BlockInstance) -> Result<Vec<Step>, CompileError> {
    let Some(kind) = BlockKind::from_tag(&block.block_type) else {
        return Ok(Vec::new());
    };
    let name = naming::step_name(block);
    let text = |key: &str| block.config_str(key).unwrap_or_default().to_string();

    let steps = match kind {
        BlockKind::JobCheckout => {
            let mut step = Step::uses(name, "actions/checkout@v4");
            if let Some(depth) = block.config.get("fetchDepth").filter(|v| v.is_number()) {
                step = step.with("fetch-depth", depth.clone());
            }
            if let Some(submodules) = non_empty(block, "submodules").filter(|s| *s != "false") {
                step = step.with("submodules", submodules);
            }
            vec![step]
        }
        BlockKind::JobSetupNode => {
            let mut step = Step::uses(name, "actions/setup-node@v4").with("node-version", text("nodeVersion"));
            if let Some(cache) = non_empty(block, "cache") {
                step = step.with("cache", cache);
            }
            vec![step]
        }
        BlockKind::JobSetupPython => {
            let mut step =
                Step::uses(name, "actions/setup-python@v5").with("python-version", text("pythonVersion"));
            if let Some(cache) = non_empty(block, "cache") {
                step = step.with("cache", cache);
            }
            vec![step]
        }
        BlockKind::JobRunScript => {
            let mut step = Step::run(name, text("run"));
            step.working_directory = non_empty(block, "workingDirectory").map(str::to_string);
            vec![step]
        }
        BlockKind::JobInstallDeps => {
            let frozen = block.config_bool("frozen").unwrap_or(true);
            let command = match (block.config_str("packageManager").unwrap_or("npm"), frozen) {
                ("yarn", true) => "yarn --frozen-lockfile",
                ("yarn", false) => "yarn install",
                ("pnpm", true) => "pnpm install --frozen-lockfile",
                ("pnpm", false) => "pnpm install",
                ("pip", _) => "pip install -r requirements.txt",
                (_, true) => "npm ci",
                (_, false) => "npm install",
            };
            vec![Step::run(name, command)]
        }
        BlockKind::JobBuild | BlockKind::JobTest | BlockKind::JobLint => {
            vec![Step::run(name, text("command"))]
        }
        BlockKind::ActionCreateRelease => {
            let mut step = Step::uses(name, "softprops/action-gh-release@v2")
                .with("tag_name", text("tagName"))
                .with("draft", block.config_bool("draft").unwrap_or(false))
                .with("prerelease", block.config_bool("prerelease").unwrap_or(false));
            if let Some(release_name) = non_empty(block, "releaseName") {
                step = step.with("name", release_name);
            }
            vec![step]
        }
        BlockKind::ActionCommentPr => vec![Step::run(
            name,
            "gh pr comment \"${{ github.event.pull_request.number }}\" --body \"$COMMENT_BODY\"",
        )
        .env("GH_TOKEN", "${{ secrets.GITHUB_TOKEN }}")
        .env("COMMENT_BODY", text("message"))],
        BlockKind::ActionLabel => {
            let flag = if block.config_str("action") == Some("remove") {
                "--remove-label"
            } else {
                "--add-label"
            };
            let labels = split_list(block.config_str("labels")).join(",");
            vec![Step::run(
                name,
                format!(
                    "gh pr edit \"${{{{ github.event.pull_request.number }}}}\" {} \"$LABELS\"",
                    flag
                ),
            )
            .env("GH_TOKEN", "${{ secrets.GITHUB_TOKEN }}")
            .env("LABELS", labels)]
        }
        BlockKind::IntegrationDeployVercel => {
            let mut step = Step::uses(name, "amondnet/vercel-action@v25")
                .with("vercel-token", "${{ secrets.VERCEL_TOKEN }}")
                .with("vercel-org-id", text("orgId"))
                .with("vercel-project-id", text("projectId"));
            if block.config_bool("production").unwrap_or(false) {
                step = step.with("vercel-args", "--prod");
            }
            vec![step]
        }
        BlockKind::IntegrationDockerBuild => {
            let registry = block.config_str("registry").unwrap_or("ghcr.io");
            let image = text("imageName");
            let (login_registry, image_ref) = if registry == "custom" {
                let host = image.split('/').next().unwrap_or_default().to_string();
                (host, image.clone())
            } else {
                (registry.to_string(), format!("{}/{}", registry, image))
            };
            let tags = split_list(block.config_str("tags"))
                .iter()
                .map(|tag| format!("{}:{}", image_ref, tag))
                .collect::<Vec<_>>()
                .join(",");

            vec![
                Step::uses(naming::auxiliary_step_name(block, "login"), "docker/login-action@v3")
                    .with("registry", login_registry)
                    .with("username", "${{ github.actor }}")
                    .with("password", "${{ secrets.GITHUB_TOKEN }}"),
                Step::uses(name, "docker/build-push-action@v5")
                    .with("context", ".")
                    .with("file", text("dockerfile"))
                    .with("push", true)
                    .with("tags", tags),
            ]
        }
        BlockKind::IntegrationNotifySlack => {
            let mut step = Step::uses(name, "8398a7/action-slack@v3")
                .with("status", "${{ job.status }}")
                .with("text", text("message"))
                .env("SLACK_WEBHOOK_URL", text("webhookUrl"));
            if let Some(channel) = non_empty(block, "channel") {
                step = step.with("channel", channel);
            }
            vec![step]
        }
        BlockKind::IntegrationNpmPublish => vec![Step::run(
            name,
            format!(
                "npm publish --access {} --registry {}",
                block.config_str("access").unwrap_or("public"),
                text("registry")
            ),
        )
        .env("NODE_AUTH_TOKEN", "${{ secrets.NPM_TOKEN }}")],
        BlockKind::UtilityCache => {
            let mut step = Step::uses(name, "actions/cache@v4")
                .with("path", text("path"))
                .with("key", text("key"));
            if let Some(restore) = non_empty(block, "restoreKeys") {
                step = step.with("restore-keys", restore);
            }
            vec![step]
        }
        BlockKind::UtilityUploadArtifact => {
            let retention = block.config.get("retention").cloned().unwrap_or(json!(30));
            vec![Step::uses(name, "actions/upload-artifact@v4")
                .with("name", text("name"))
                .with("path", text("path"))
                .with("retention-days", retention)]
        }
        BlockKind::UtilityDownloadArtifact => {
            let mut step = Step::uses(name, "actions/download-artifact@v4").with("name", text("name"));
            if let Some(path) = non_empty(block, "path") {
                step = step.with("path", path);
            }
            vec![step]
        }
        BlockKind::UtilityEnv => {
            let mut lines = Vec::new();
            if let Some(variables) = non_empty(block, "variables") {
                if let serde_yaml_ng::Value::Mapping(map) = parse_yaml(variables)? {
                    for (key, value) in map {
                        lines.push(format!(
                            "echo \"{}={}\" >> \"$GITHUB_ENV\"",
                            yaml_scalar(&key),
                            yaml_scalar(&value)
                        ));
                    }
                }
            }
            if lines.is_empty() {
                lines.push("echo \"No variables to export\"".to_string());
            }
            vec![Step::run(name, lines.join("\n"))]
        }
        BlockKind::TriggerPush
        | BlockKind::TriggerPr
        | BlockKind::TriggerSchedule
        | BlockKind::TriggerManual
        | BlockKind::TriggerRelease
        | BlockKind::ControlCondition
        | BlockKind::ControlMatrix
        | BlockKind::ControlParallel
        | BlockKind::ControlWait => Vec::new(),
    };

    Ok(steps)
}

fn yaml_scalar(value: &serde_yaml_ng::Value) -> String {
    match value {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => serde_yaml_ng::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}
