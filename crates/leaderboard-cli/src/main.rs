//! Leaderboard CI command-line interface
//!
//! The `leaderboard` command drives the submission pipeline from a CI job.
//!
//! ## Commands
//!
//! - `run`: Run every stage the triggering event calls for
//! - `resolve`: Print the submission identity for the event
//! - `validate`: Check a submission's on-disk shape
//! - `evaluate`: Fetch the dataset and evaluate a submission
//! - `publish`: Upsert an evaluation result into the leaderboard and push it
//! - `cleanup`: Replace an evaluated model with a tombstone and push it

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use leaderboard_ci::{
    Annotation, CiGate, CleanupOutcome, EvaluationResult, EventContext, PipelineConfig,
    PipelineError, PipelineReport, StageOutputs, StageStatus, SubmissionIdentity,
    SubmissionPipeline,
};

#[derive(Parser)]
#[command(name = "leaderboard")]
#[command(version = leaderboard_ci::VERSION)]
#[command(about = "Evaluate model submissions and publish them to the leaderboard", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Repository checkout holding submissions and the leaderboard
    #[arg(short, long, global = true, env = "LEADERBOARD_WORKSPACE")]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for the event described by the CI environment
    Run {
        /// Override the dispatch username input
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Resolve the submission identity for the current event
    Resolve {
        /// Override the dispatch username input
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Validate a submission directory
    Validate {
        #[arg(short, long)]
        identity: String,
    },

    /// Acquire the dataset and evaluate a submission
    Evaluate {
        #[arg(short, long)]
        identity: String,
    },

    /// Publish an evaluation result file to the leaderboard
    Publish {
        #[arg(short, long)]
        identity: String,

        /// Result document written by the evaluator
        #[arg(short, long)]
        result: PathBuf,
    },

    /// Remove an evaluated model artifact
    Cleanup {
        #[arg(short, long)]
        identity: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    leaderboard_ci::init_tracing(cli.json, level);

    let config = load_config(cli.workspace.as_deref())?;
    info!(workspace = %config.workspace.display(), "loaded configuration");
    let pipeline =
        SubmissionPipeline::from_config(config).context("Failed to set up pipeline backends")?;

    match cli.command {
        Commands::Run { username } => cmd_run(&pipeline, username).await,
        Commands::Resolve { username } => cmd_resolve(&pipeline, username).await,
        Commands::Validate { identity } => cmd_validate(&pipeline, &parse_identity(&identity)?),
        Commands::Evaluate { identity } => {
            cmd_evaluate(&pipeline, &parse_identity(&identity)?).await
        }
        Commands::Publish { identity, result } => {
            cmd_publish(&pipeline, &parse_identity(&identity)?, &result).await
        }
        Commands::Cleanup { identity } => cmd_cleanup(&pipeline, &parse_identity(&identity)?).await,
    }
}

/// Environment configuration with the workspace made absolute, so the
/// evaluator sees the same paths regardless of its working directory.
fn load_config(workspace: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    if let Some(workspace) = workspace {
        config.workspace = workspace.to_path_buf();
    }
    config.workspace = config
        .workspace
        .canonicalize()
        .with_context(|| format!("Workspace not found: {:?}", config.workspace))?;
    Ok(config)
}

fn parse_identity(raw: &str) -> Result<SubmissionIdentity> {
    SubmissionIdentity::new(raw.trim()).context("Invalid submission identity")
}

fn load_event(username: Option<String>) -> Result<EventContext> {
    let mut event = EventContext::from_env().context("Failed to read CI event")?;
    if let Some(username) = username {
        event.username = Some(username);
    }
    Ok(event)
}

/// Hand workflow commands and step outputs to the CI host.
fn publish_to_host(annotations: &[Annotation], outputs: &StageOutputs) -> Result<()> {
    for annotation in annotations {
        println!("{annotation}");
    }
    outputs.emit().context("Failed to write step outputs")?;
    Ok(())
}

/// Report a single-stage failure to the host and turn it into the exit error.
fn stage_failed(err: PipelineError, outputs: &StageOutputs) -> anyhow::Error {
    let annotation = Annotation::from(&err);
    if let Err(emit_err) = publish_to_host(std::slice::from_ref(&annotation), outputs) {
        return emit_err;
    }
    anyhow::Error::new(err).context(annotation.title)
}

/// Run every planned stage and gate the result
async fn cmd_run(pipeline: &SubmissionPipeline, username: Option<String>) -> Result<()> {
    let event = load_event(username)?;
    let report = pipeline
        .run(&event)
        .await
        .context("Pipeline failed to run")?;

    print_report(&report);
    publish_to_host(&report.annotations, &report.outputs)?;

    let verdict = CiGate::evaluate(&report);
    println!("Gate: {}", if verdict.passed { "✓ PASSED" } else { "✗ FAILED" });
    if !verdict.violations.is_empty() {
        println!("Violations:");
        for violation in &verdict.violations {
            println!("  - {}", violation);
        }
    }

    if report.success && verdict.passed {
        Ok(())
    } else {
        anyhow::bail!("Submission pipeline failed")
    }
}

fn print_report(report: &PipelineReport) {
    println!("Run ID: {}", report.run_id);
    println!("Event: {}", report.event.name());
    if let Some(identity) = &report.identity {
        println!("Submission: {}", identity);
    }
    println!("Status: {}", if report.success { "✓ PASSED" } else { "✗ FAILED" });
    println!("Duration: {}ms", report.duration_ms);
    println!();

    for stage in &report.stages {
        let status = match stage.status {
            StageStatus::Passed => "✓",
            StageStatus::Failed => "✗",
            StageStatus::Skipped => "-",
        };
        println!(
            "  {} {} ({}ms) {}",
            status, stage.stage, stage.duration_ms, stage.detail
        );
    }

    println!();
    println!(
        "Summary: {}/{} stages passed",
        report.passed_count(),
        report.stages.len()
    );
}

async fn cmd_resolve(pipeline: &SubmissionPipeline, username: Option<String>) -> Result<()> {
    let event = load_event(username)?;
    let mut outputs = StageOutputs::new();
    let resolution = pipeline
        .resolve(&event)
        .await
        .map_err(|e| stage_failed(e, &outputs))?;

    outputs.set("identity", &resolution.identity);
    outputs.set("resolved_by", resolution.resolved_by.label());

    let mut annotations = Vec::new();
    if resolution.resolved_by == leaderboard_ci::ResolvedBy::Fallback {
        annotations.push(Annotation::warning(
            "Submission identity ambiguous",
            "no identity signal matched the event; using the baseline submission",
        ));
    }

    println!("{}", serde_json::to_string_pretty(&resolution)?);
    publish_to_host(&annotations, &outputs)
}

fn cmd_validate(pipeline: &SubmissionPipeline, identity: &SubmissionIdentity) -> Result<()> {
    let report = pipeline.validate(identity);

    let mut outputs = StageOutputs::new();
    outputs.set("valid", report.valid);
    outputs.set("reason", report.reason_code());

    let annotations: Vec<Annotation> = pipeline.validation_warning(&report).into_iter().collect();

    println!("{}", serde_json::to_string_pretty(&report)?);
    match report.into_result() {
        Ok(()) => publish_to_host(&annotations, &outputs),
        Err(e) => Err(stage_failed(e.into(), &outputs)),
    }
}

async fn cmd_evaluate(pipeline: &SubmissionPipeline, identity: &SubmissionIdentity) -> Result<()> {
    let outputs = StageOutputs::new();

    let dataset = pipeline
        .acquire_dataset()
        .await
        .map_err(|e| stage_failed(e, &outputs))?;
    info!(dataset = %dataset.display(), "dataset ready");

    let result = pipeline
        .evaluate(identity)
        .await
        .map_err(|e| stage_failed(e, &outputs))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    publish_to_host(&[], &result_outputs(&result))
}

fn result_outputs(result: &EvaluationResult) -> StageOutputs {
    let mut outputs = StageOutputs::new();
    outputs.set("model_size", result.model_size);
    outputs.set("latency", result.latency);
    outputs.set("accuracy", result.accuracy);
    outputs.set("total_score", result.total_score);
    outputs
}

async fn cmd_publish(
    pipeline: &SubmissionPipeline,
    identity: &SubmissionIdentity,
    result_path: &Path,
) -> Result<()> {
    let mut outputs = StageOutputs::new();

    let result = EvaluationResult::from_file(result_path)
        .map_err(|e| stage_failed(e.into(), &outputs))?;
    let outcome = pipeline
        .publish(identity, result)
        .await
        .map_err(|e| stage_failed(e, &outputs))?;

    outputs.set("leaderboard_digest", &outcome.digest);
    outputs.set("rank", outcome.rank);

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    publish_to_host(&[], &outputs)
}

async fn cmd_cleanup(pipeline: &SubmissionPipeline, identity: &SubmissionIdentity) -> Result<()> {
    let mut outputs = StageOutputs::new();

    let outcome = pipeline
        .cleanup(identity)
        .await
        .map_err(|e| stage_failed(e, &outputs))?;
    outputs.set("cleanup", outcome.label());

    match &outcome {
        CleanupOutcome::Skipped { reason } => println!("Cleanup skipped: {:?}", reason),
        CleanupOutcome::Removed { files, .. } => {
            for file in files {
                println!("Removed {}", file.display());
            }
        }
    }
    publish_to_host(&[], &outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_publish_requires_result_file() {
        assert!(Cli::try_parse_from(["leaderboard", "publish", "--identity", "alice"]).is_err());

        let cli = Cli::try_parse_from([
            "leaderboard",
            "publish",
            "--identity",
            "alice",
            "--result",
            "evaluation_result.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Publish { identity, result } => {
                assert_eq!(identity, "alice");
                assert_eq!(result, PathBuf::from("evaluation_result.json"));
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["leaderboard", "run", "--verbose", "--json"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.json);
    }

    #[test]
    fn test_parse_identity_trims_and_rejects_paths() {
        assert_eq!(parse_identity(" alice ").unwrap().as_str(), "alice");
        assert!(parse_identity("../etc").is_err());
    }

    #[test]
    fn test_load_config_canonicalizes_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("repo");
        std::fs::create_dir_all(&nested).unwrap();

        let config = load_config(Some(&nested.join("..").join("repo"))).unwrap();
        assert!(config.workspace.is_absolute());
        assert_eq!(config.workspace, nested.canonicalize().unwrap());

        assert!(load_config(Some(&dir.path().join("missing"))).is_err());
    }

    #[test]
    fn test_result_outputs() {
        let result = EvaluationResult {
            model_size: 12.5,
            latency: 18.0,
            accuracy: 61.25,
            total_score: 1.8,
        };
        let outputs = result_outputs(&result);
        assert_eq!(outputs.get("accuracy"), Some("61.25"));
        assert_eq!(outputs.get("total_score"), Some("1.8"));
    }
}
