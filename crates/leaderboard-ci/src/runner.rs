//! External command execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;

use crate::error::{PipelineError, Result};

/// An external command to run as one blocking pipeline step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Human-readable step name used in logs.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,

    /// Working directory (inherited when `None`).
    pub working_dir: Option<PathBuf>,

    /// Timeout in seconds, 0 = bounded by the host only.
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            env: Vec::new(),
            working_dir: None,
            timeout_secs: 0,
        }
    }

    /// Parse a whitespace-separated command line such as `python evaluate.py`.
    pub fn from_command_line(name: impl Into<String>, line: &str) -> Self {
        Self::new(name, line.split_whitespace().map(str::to_string).collect())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Step name.
    pub name: String,

    /// Exit code (0 = success, -1 = killed by signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the process exited successfully.
    pub success: bool,
}

impl CommandOutput {
    /// Whether this command passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }
}

/// Runs external commands to completion.
pub struct CommandRunner;

impl CommandRunner {
    /// Execute a command and capture its output.
    ///
    /// A non-zero exit is reported through [`CommandOutput`]; only spawn
    /// failures and timeouts are errors.
    pub async fn execute(spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();

        let Some((exe, args)) = spec.command.split_first() else {
            return Err(PipelineError::Command(format!(
                "step {} has empty command",
                spec.name
            )));
        };

        let mut command = Command::new(exe);
        command
            .args(args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            PipelineError::Command(format!("step {} failed to start {}: {}", spec.name, exe, e))
        })?;

        let output = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                PipelineError::Command(format!(
                    "step {} timed out after {} seconds",
                    spec.name, spec.timeout_secs
                ))
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(CommandOutput {
            name: spec.name.clone(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
        })
    }
}
