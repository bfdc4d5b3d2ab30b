//! `flowctl`: command line front end for visual workflows
//!
//! Sub-commands:
//! - `blocks`   list the block catalog
//! - `validate` check a workflow file
//! - `compile`  emit the GitHub Actions YAML
//! - `deploy`   push the compiled file to the configured repository
//! - `undeploy` remove it again
//! - `run`      dispatch a run and follow it
//! - `watch`    follow an existing run

mod error;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use workflow_engine::{
    validate, BlockCategory, BlockRegistry, ChannelEventSink, Workflow, WorkflowEditor,
    WorkflowEvent, WorkflowExecution,
};
use workflow_sync::{
    deploy_workflow, dispatch_run, undeploy_workflow, ConflictPolicy, DispatchOptions,
    ExecutionTracker, GitHubClient, PipelineRemote, SyncConfig,
};

use crate::error::{CliError, Result};

#[derive(Parser)]
#[command(name = "flowctl", about = "Build and run GitHub Actions workflows from block graphs", version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, default_value = "flowctl.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available block types
    Blocks {
        /// Only show one category (trigger, job, action, control, integration, utility)
        #[arg(long)]
        category: Option<BlockCategory>,
    },
    /// Validate a workflow file and report every problem
    Validate {
        file: PathBuf,
        /// Print errors as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compile a workflow file to pipeline YAML
    Compile {
        file: PathBuf,
        /// Write to this path instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Push the compiled workflow to the repository
    Deploy {
        file: PathBuf,
        /// Replace remote edits instead of failing
        #[arg(long)]
        overwrite: bool,
        /// Sha of the remote file as of the last deploy
        #[arg(long)]
        expected_sha: Option<String>,
    },
    /// Remove the workflow's pipeline file from the repository
    Undeploy { file: PathBuf },
    /// Dispatch a run of a deployed workflow and follow it
    Run {
        file: PathBuf,
        /// Git ref to run on (defaults to the configured branch)
        #[arg(long = "ref")]
        git_ref: Option<String>,
    },
    /// Follow an existing run, printing block state changes
    Watch {
        file: PathBuf,
        #[arg(long)]
        run_id: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Invalid(result)) => {
            for error in &result.errors {
                eprintln!("error: {}", error);
            }
            ExitCode::from(1)
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let registry = BlockRegistry::builtin();

    match cli.command {
        Command::Blocks { category } => {
            let definitions = match category {
                Some(category) => registry.list_by_category(category),
                None => registry.all().iter().collect(),
            };
            for definition in definitions {
                println!(
                    "{:<28} {:<12} {}",
                    definition.block_type(),
                    definition.category.as_str(),
                    definition.description
                );
            }
            Ok(())
        }
        Command::Validate { file, json } => {
            let workflow = load_workflow(&file, registry).await?;
            let result = validate(&workflow, registry);
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            if result.is_valid() {
                if !json {
                    println!("{}: ok", file.display());
                }
                Ok(())
            } else {
                Err(CliError::Invalid(result))
            }
        }
        Command::Compile { file, output } => {
            let workflow = load_workflow(&file, registry).await?;
            let document = checked_compile(&workflow, registry)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &document.text)
                        .await
                        .map_err(|source| CliError::Write {
                            path: path.clone(),
                            source,
                        })?;
                    log::info!("Wrote {}", path.display());
                }
                None => print!("{}", document.text),
            }
            Ok(())
        }
        Command::Deploy {
            file,
            overwrite,
            expected_sha,
        } => {
            let workflow = load_workflow(&file, registry).await?;
            checked_compile(&workflow, registry)?;
            let (remote, _) = connect(&cli.config).await?;
            let policy = if overwrite {
                ConflictPolicy::Overwrite
            } else {
                ConflictPolicy::Fail
            };

            let report = deploy_workflow(
                remote.as_ref(),
                &workflow,
                registry,
                expected_sha.as_deref(),
                policy,
            )
            .await?;
            println!("{}", serde_json::to_string(&report.outcome)?);
            Ok(())
        }
        Command::Undeploy { file } => {
            let workflow = load_workflow(&file, registry).await?;
            let (remote, _) = connect(&cli.config).await?;
            if undeploy_workflow(remote.as_ref(), &workflow).await? {
                println!("removed");
            } else {
                println!("not deployed");
            }
            Ok(())
        }
        Command::Run { file, git_ref } => {
            let workflow = load_workflow(&file, registry).await?;
            let (remote, config) = connect(&cli.config).await?;
            let git_ref = git_ref.unwrap_or_else(|| config.github.branch.clone());

            let run_id = dispatch_run(
                remote.as_ref(),
                &workflow,
                &git_ref,
                Default::default(),
                &DispatchOptions::default(),
            )
            .await?;
            println!("{}", serde_json::json!({ "runId": run_id }));
            follow(&workflow, registry, remote, &config, run_id).await
        }
        Command::Watch { file, run_id } => {
            let workflow = load_workflow(&file, registry).await?;
            let (remote, config) = connect(&cli.config).await?;
            follow(&workflow, registry, remote, &config, run_id).await
        }
    }
}

async fn load_workflow(path: &Path, registry: &BlockRegistry) -> Result<Workflow> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CliError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let value: serde_json::Value =
        serde_json::from_str(&contents).map_err(|e| CliError::Load {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
    WorkflowEditor::deserialize(value, registry).map_err(|source| CliError::Load {
        path: path.to_path_buf(),
        source,
    })
}

/// Compile, reporting validation errors the same way `validate` does
fn checked_compile(
    workflow: &Workflow,
    registry: &BlockRegistry,
) -> Result<workflow_engine::PipelineDocument> {
    let result = validate(workflow, registry);
    if !result.is_valid() {
        return Err(CliError::Invalid(result));
    }
    Ok(workflow_engine::compile(workflow, registry)?)
}

async fn connect(config_path: &Path) -> Result<(Arc<dyn PipelineRemote>, SyncConfig)> {
    let config = SyncConfig::load(config_path)
        .await
        .map_err(workflow_sync::SyncError::from)?;
    let client = GitHubClient::new(config.github.clone())?;
    Ok((Arc::new(client), config))
}

/// Track a run until it finishes, printing events as JSON lines
async fn follow(
    workflow: &Workflow,
    registry: &BlockRegistry,
    remote: Arc<dyn PipelineRemote>,
    config: &SyncConfig,
    run_id: u64,
) -> Result<()> {
    let names = checked_compile(workflow, registry)?.names;
    let (sink, mut events) = ChannelEventSink::new();

    let tracker = Arc::new(ExecutionTracker::new(
        WorkflowExecution::start(workflow, registry, run_id, Utc::now()),
        names,
        remote,
        config.tracker.clone(),
        Arc::new(sink),
    ));

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    tracker.clone().start().join().await;
    let state = tracker.state();
    // Last sink holder; closes the channel so the printer drains and exits
    drop(tracker);
    if let Err(e) = printer.await {
        log::warn!("Event printer failed: {}", e);
    }

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn print_event(event: &WorkflowEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => log::warn!("Unprintable event: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NIGHTLY: &str = r#"{
        "id": "wf-1",
        "name": "Nightly",
        "blocks": [
            {"id": "t1", "type": "trigger-schedule", "position": {"x": 0, "y": 0}, "config": {"cron": "0 2 * * *"}},
            {"id": "c1", "type": "job-checkout", "position": {"x": 200, "y": 0}, "config": {}}
        ],
        "connections": [
            {"id": "e1", "sourceBlockId": "t1", "sourcePortId": "out", "targetBlockId": "c1", "targetPortId": "in"}
        ]
    }"#;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["flowctl", "blocks", "--category", "control"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Blocks {
                category: Some(BlockCategory::Control)
            }
        ));

        let cli = Cli::try_parse_from(["flowctl", "watch", "wf.json", "--run-id", "42"]).unwrap();
        assert!(matches!(cli.command, Command::Watch { run_id: 42, .. }));
        assert_eq!(cli.config, PathBuf::from("flowctl.json"));

        assert!(Cli::try_parse_from(["flowctl", "blocks", "--category", "widgets"]).is_err());
    }

    #[tokio::test]
    async fn test_load_and_compile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightly.json");
        tokio::fs::write(&path, NIGHTLY).await.unwrap();

        let registry = BlockRegistry::builtin();
        let workflow = load_workflow(&path, registry).await.unwrap();
        assert_eq!(workflow.blocks.len(), 2);

        let document = checked_compile(&workflow, registry).unwrap();
        assert!(document.text.contains("actions/checkout@v4"));
    }

    #[tokio::test]
    async fn test_load_rejects_unknown_block_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, NIGHTLY.replace("job-checkout", "job-teleport"))
            .await
            .unwrap();

        let err = load_workflow(&path, BlockRegistry::builtin()).await.unwrap_err();
        assert!(matches!(err, CliError::Load { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_invalid_workflow_is_not_compiled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orphan.json");
        let orphan = NIGHTLY.replace(r#""sourceBlockId": "t1""#, r#""sourceBlockId": "c1""#);
        tokio::fs::write(&path, orphan).await.unwrap();

        let registry = BlockRegistry::builtin();
        let workflow = load_workflow(&path, registry).await.unwrap();
        let err = checked_compile(&workflow, registry).unwrap_err();
        assert!(matches!(err, CliError::Invalid(_)));
    }
}
