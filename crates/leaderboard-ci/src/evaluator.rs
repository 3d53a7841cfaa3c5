//! Evaluator adapter.
//!
//! The evaluation procedure itself is an external program. This module fixes
//! its contract: what it is given, which baseline constants it normalizes
//! against, and the JSON it must leave behind.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::dataset::dir_is_empty;
use crate::error::{EvaluationError, PipelineError, Result};
use crate::runner::{CommandRunner, CommandSpec};
use crate::submission::SubmissionLayout;

/// Reference values every score is normalized against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineConstants {
    pub size: f64,
    pub latency: f64,
    pub accuracy: f64,
}

impl Default for BaselineConstants {
    fn default() -> Self {
        Self {
            size: 44.7,
            latency: 30.0,
            accuracy: 40.00,
        }
    }
}

/// Scores produced by one evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub model_size: f64,
    pub latency: f64,
    pub accuracy: f64,
    pub total_score: f64,
}

impl EvaluationResult {
    pub const FIELDS: [&'static str; 4] = ["model_size", "latency", "accuracy", "total_score"];

    /// Extract the four required numeric fields.
    pub fn from_json(value: &Value) -> std::result::Result<Self, EvaluationError> {
        let field = |name: &'static str| -> std::result::Result<f64, EvaluationError> {
            match value.get(name) {
                None | Some(Value::Null) => Err(EvaluationError::MissingField(name)),
                Some(v) => v.as_f64().ok_or(EvaluationError::InvalidField(name)),
            }
        };

        Ok(Self {
            model_size: field("model_size")?,
            latency: field("latency")?,
            accuracy: field("accuracy")?,
            total_score: field("total_score")?,
        })
    }

    /// Read and parse a result file.
    pub fn from_file(path: &Path) -> std::result::Result<Self, EvaluationError> {
        let unreadable = |reason: String| EvaluationError::ResultUnreadable {
            path: path.to_path_buf(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        let value: Value = serde_json::from_str(&raw).map_err(|e| unreadable(e.to_string()))?;
        Self::from_json(&value)
    }
}

/// What to do with a submission that already carries a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReevaluationPolicy {
    /// Refuse: the submission was evaluated before.
    #[default]
    Reject,

    /// Evaluate the new artifact; cleanup rewrites the tombstone.
    Allow,
}

impl FromStr for ReevaluationPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(ReevaluationPolicy::Reject),
            "allow" => Ok(ReevaluationPolicy::Allow),
            other => Err(PipelineError::Config(format!(
                "unknown re-evaluation policy '{other}' (expected reject or allow)"
            ))),
        }
    }
}

/// Inputs handed to the evaluation procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    pub submission_dir: PathBuf,
    pub dataset_dir: PathBuf,
    pub baseline: BaselineConstants,
    pub output_path: PathBuf,
}

impl EvaluationRequest {
    /// `(flag, env var, value)` triples of the invocation contract.
    pub fn parameters(&self) -> Vec<(&'static str, &'static str, String)> {
        vec![
            (
                "--submission-dir",
                "EVALUATION_SUBMISSION_DIR",
                self.submission_dir.to_string_lossy().to_string(),
            ),
            (
                "--dataset-dir",
                "EVALUATION_DATASET_DIR",
                self.dataset_dir.to_string_lossy().to_string(),
            ),
            (
                "--baseline-size",
                "EVALUATION_BASELINE_SIZE",
                self.baseline.size.to_string(),
            ),
            (
                "--baseline-latency",
                "EVALUATION_BASELINE_LATENCY",
                self.baseline.latency.to_string(),
            ),
            (
                "--baseline-accuracy",
                "EVALUATION_BASELINE_ACCURACY",
                format!("{:.2}", self.baseline.accuracy),
            ),
            (
                "--output",
                "EVALUATION_OUTPUT",
                self.output_path.to_string_lossy().to_string(),
            ),
        ]
    }
}

/// Runs the evaluation procedure, which writes its JSON to `output_path`.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn run(&self, request: &EvaluationRequest) -> Result<()>;
}

/// [`Evaluator`] that runs an external command.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    command: CommandSpec,
}

impl CommandEvaluator {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    async fn run(&self, request: &EvaluationRequest) -> Result<()> {
        let mut spec = self.command.clone();
        for (flag, var, value) in request.parameters() {
            spec = spec.arg(flag).arg(value.clone()).env(var, value);
        }

        let output = CommandRunner::execute(&spec)
            .await
            .map_err(|e| EvaluationError::Spawn(e.to_string()))?;
        if !output.passed() {
            return Err(EvaluationError::ProcessFailed {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Gates and invokes the evaluator once, then parses its result.
pub struct EvaluatorAdapter {
    evaluator: Arc<dyn Evaluator>,
    baseline: BaselineConstants,
    policy: ReevaluationPolicy,
}

impl EvaluatorAdapter {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        baseline: BaselineConstants,
        policy: ReevaluationPolicy,
    ) -> Self {
        Self {
            evaluator,
            baseline,
            policy,
        }
    }

    /// Evaluate a submission. Every failure is terminal; nothing is retried.
    #[instrument(skip_all, fields(identity = %layout.identity))]
    pub async fn evaluate(
        &self,
        layout: &SubmissionLayout,
        dataset_dir: &Path,
        output_path: &Path,
    ) -> Result<EvaluationResult> {
        if self.policy == ReevaluationPolicy::Reject && layout.has_tombstone() {
            return Err(EvaluationError::AlreadyEvaluated {
                identity: layout.identity.to_string(),
            }
            .into());
        }

        if dir_is_empty(dataset_dir)? {
            return Err(EvaluationError::EmptyDataset {
                path: dataset_dir.to_path_buf(),
            }
            .into());
        }

        // A stale file from an earlier run must never be mistaken for output.
        match std::fs::remove_file(output_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let request = EvaluationRequest {
            submission_dir: layout.dir.clone(),
            dataset_dir: dataset_dir.to_path_buf(),
            baseline: self.baseline,
            output_path: output_path.to_path_buf(),
        };
        self.evaluator.run(&request).await?;

        let result = EvaluationResult::from_file(output_path)?;
        info!(
            model_size = result.model_size,
            latency = result.latency,
            accuracy = result.accuracy,
            total_score = result.total_score,
            "evaluation complete"
        );
        Ok(result)
    }
}
