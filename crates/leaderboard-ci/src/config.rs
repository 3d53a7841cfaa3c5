//! Pipeline configuration.
//!
//! Every setting has a default and can be overridden through a
//! `LEADERBOARD_*` environment variable. Relative paths resolve against the
//! workspace (the repository checkout).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dataset::{CommandDatasetSource, CredentialNames};
use crate::error::{PipelineError, Result};
use crate::evaluator::{BaselineConstants, ReevaluationPolicy};
use crate::runner::CommandSpec;
use crate::transaction::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Repository checkout the pipeline operates on.
    pub workspace: PathBuf,

    pub submissions_dir: PathBuf,
    pub leaderboard_file: PathBuf,
    pub dataset_dir: PathBuf,
    /// Where the evaluator writes its JSON result.
    pub result_file: PathBuf,

    /// Evaluator command line; the contract flags are appended.
    pub evaluator: String,
    /// 0 = bounded by the host job timeout only.
    pub eval_timeout_secs: u64,
    pub baseline: BaselineConstants,
    pub reevaluation: ReevaluationPolicy,

    pub push_attempts: u32,
    pub push_delay_ms: u64,
    pub git_remote: String,
    pub git_branch: String,

    /// Optional connectivity probe command for the dataset host.
    pub dataset_probe: Option<String>,
    /// Optional download command; receives `DATASET_DIR`.
    pub dataset_download: Option<String>,
    pub dataset_username_var: String,
    pub dataset_key_var: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let credentials = CredentialNames::default();
        Self {
            workspace: PathBuf::from("."),
            submissions_dir: PathBuf::from("submissions"),
            leaderboard_file: PathBuf::from("LEADERBOARD.md"),
            dataset_dir: PathBuf::from("dataset"),
            result_file: PathBuf::from("evaluation_result.json"),
            evaluator: "python evaluate.py".to_string(),
            eval_timeout_secs: 0,
            baseline: BaselineConstants::default(),
            reevaluation: ReevaluationPolicy::default(),
            push_attempts: 3,
            push_delay_ms: 2000,
            git_remote: "origin".to_string(),
            git_branch: "main".to_string(),
            dataset_probe: None,
            dataset_download: None,
            dataset_username_var: credentials.username,
            dataset_key_var: credentials.key,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("LEADERBOARD_WORKSPACE") {
            config.workspace = PathBuf::from(v);
        }
        if let Some(v) = get("LEADERBOARD_SUBMISSIONS_DIR") {
            config.submissions_dir = PathBuf::from(v);
        }
        if let Some(v) = get("LEADERBOARD_FILE") {
            config.leaderboard_file = PathBuf::from(v);
        }
        if let Some(v) = get("LEADERBOARD_DATASET_DIR") {
            config.dataset_dir = PathBuf::from(v);
        }
        if let Some(v) = get("LEADERBOARD_RESULT_FILE") {
            config.result_file = PathBuf::from(v);
        }
        if let Some(v) = get("LEADERBOARD_EVALUATOR") {
            config.evaluator = v;
        }
        if let Some(v) = get("LEADERBOARD_EVAL_TIMEOUT_SECS") {
            config.eval_timeout_secs = parse_number("LEADERBOARD_EVAL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("LEADERBOARD_PUSH_ATTEMPTS") {
            config.push_attempts = parse_number("LEADERBOARD_PUSH_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("LEADERBOARD_PUSH_DELAY_MS") {
            config.push_delay_ms = parse_number("LEADERBOARD_PUSH_DELAY_MS", &v)?;
        }
        if let Some(v) = get("LEADERBOARD_REEVALUATION") {
            config.reevaluation = v.parse()?;
        }
        if let Some(v) = get("LEADERBOARD_GIT_REMOTE") {
            config.git_remote = v;
        }
        if let Some(v) = get("LEADERBOARD_GIT_BRANCH") {
            config.git_branch = v;
        }
        config.dataset_probe = get("LEADERBOARD_DATASET_PROBE");
        config.dataset_download = get("LEADERBOARD_DATASET_DOWNLOAD");

        Ok(config)
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    pub fn submissions_root(&self) -> PathBuf {
        self.resolve(&self.submissions_dir)
    }

    pub fn leaderboard_path(&self) -> PathBuf {
        self.resolve(&self.leaderboard_file)
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.resolve(&self.dataset_dir)
    }

    pub fn result_path(&self) -> PathBuf {
        self.resolve(&self.result_file)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.push_attempts,
            Duration::from_millis(self.push_delay_ms),
        )
    }

    pub fn credentials(&self) -> CredentialNames {
        CredentialNames {
            username: self.dataset_username_var.clone(),
            key: self.dataset_key_var.clone(),
        }
    }

    /// Evaluator command, run from the workspace.
    pub fn evaluator_command(&self) -> Result<CommandSpec> {
        let spec = CommandSpec::from_command_line("evaluate", &self.evaluator);
        if spec.command.is_empty() {
            return Err(PipelineError::Command(
                "evaluator command is empty".to_string(),
            ));
        }
        Ok(spec
            .current_dir(&self.workspace)
            .timeout_secs(self.eval_timeout_secs))
    }

    pub fn dataset_source(&self) -> CommandDatasetSource {
        let command = |name: &str, line: &Option<String>| {
            line.as_deref()
                .map(|l| CommandSpec::from_command_line(name, l).current_dir(&self.workspace))
        };
        CommandDatasetSource {
            probe: command("dataset-probe", &self.dataset_probe),
            download: command("dataset-download", &self.dataset_download),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{key} must be a number, got '{value}'")))
}
