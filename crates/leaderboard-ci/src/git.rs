//! Git CLI backend for [`VersionControl`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{GitError, PipelineError, Result};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::vcs::{PushOutcome, SyncOutcome, VersionControl};

/// Markers git prints when a push loses a race with another writer.
const REJECTION_MARKERS: &[&str] = &["[rejected]", "non-fast-forward", "fetch first"];

/// Markers git prints when a rebase stops on a conflict.
const CONFLICT_MARKERS: &[&str] = &["CONFLICT", "could not apply", "Resolve all conflicts"];

/// Identity used for commits made by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CommitAuthor {
    name: String,
    email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: "github-actions[bot]".to_string(),
            email: "41898282+github-actions[bot]@users.noreply.github.com".to_string(),
        }
    }
}

/// Runs `git` in a working tree tracking `remote/branch`.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
    remote: String,
    branch: String,
    author: CommitAuthor,
}

impl GitCli {
    pub fn new(workdir: impl Into<PathBuf>, remote: &str, branch: &str) -> Self {
        Self {
            workdir: workdir.into(),
            remote: remote.to_string(),
            branch: branch.to_string(),
            author: CommitAuthor::default(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn git(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut command = vec![
            "git".to_string(),
            "-c".to_string(),
            format!("user.name={}", self.author.name),
            "-c".to_string(),
            format!("user.email={}", self.author.email),
        ];
        command.extend(args.iter().map(|a| a.to_string()));

        let spec = CommandSpec::new(format!("git {}", args.first().unwrap_or(&"")), command)
            .current_dir(&self.workdir);
        let output = CommandRunner::execute(&spec)
            .await
            .map_err(|e| GitError::Spawn(e.to_string()))?;
        debug!(command = ?args, exit_code = output.exit_code, "git");
        Ok(output)
    }

    /// Run git and fail unless it exits 0.
    async fn git_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.git(args).await?;
        if !output.passed() {
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(output)
    }

    async fn has_commit(&self, rev: &str) -> Result<bool> {
        let output = self
            .git(&["rev-parse", "--verify", "--quiet", &format!("{rev}^{{commit}}")])
            .await?;
        Ok(output.passed())
    }

    /// Parents recorded in the commit object itself. Unlike `rev-list`, this
    /// sees through the grafts a shallow clone places at its boundary.
    async fn parent_count(&self, sha: &str) -> Result<usize> {
        let output = self.git_checked(&["cat-file", "-p", sha]).await?;
        Ok(output
            .stdout
            .lines()
            .take_while(|l| !l.is_empty())
            .filter(|l| l.starts_with("parent "))
            .count())
    }

    async fn is_shallow(&self) -> Result<bool> {
        let output = self
            .git_checked(&["rev-parse", "--is-shallow-repository"])
            .await?;
        Ok(output.stdout.trim() == "true")
    }
}

fn lines(output: &CommandOutput) -> Vec<String> {
    output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_any(output: &CommandOutput, markers: &[&str]) -> bool {
    markers
        .iter()
        .any(|m| output.stderr.contains(m) || output.stdout.contains(m))
}

#[async_trait]
impl VersionControl for GitCli {
    async fn head_sha(&self) -> Result<String> {
        let output = self.git_checked(&["rev-parse", "HEAD"]).await?;
        let sha = output.stdout.trim().to_string();
        if sha.is_empty() {
            return Err(GitError::CommandFailed {
                command: "rev-parse HEAD".to_string(),
                stderr: "empty output".to_string(),
            }
            .into());
        }
        Ok(sha)
    }

    async fn commit_message(&self, sha: &str) -> Result<String> {
        let output = self.git_checked(&["log", "-1", "--format=%B", sha]).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn changed_files(&self, sha: &str) -> Result<Vec<String>> {
        let parent = format!("{sha}^1");

        if !self.has_commit(&parent).await? && self.is_shallow().await? {
            debug!(sha, "parent missing from shallow history, deepening");
            let deepen = self
                .git(&["fetch", "--deepen=1", &self.remote, &self.branch])
                .await?;
            if !deepen.passed() {
                warn!(stderr = %deepen.stderr.trim(), "failed to deepen history");
            }
        }

        let output = if self.has_commit(&parent).await? {
            self.git_checked(&["diff", "--name-only", &parent, sha]).await?
        } else if self.parent_count(sha).await? == 0 {
            self.git_checked(&[
                "diff-tree",
                "--no-commit-id",
                "--name-only",
                "-r",
                "--root",
                sha,
            ])
            .await?
        } else {
            return Err(GitError::ShallowHistory {
                sha: sha.to_string(),
            }
            .into());
        };
        Ok(lines(&output))
    }

    async fn sync(&self) -> Result<SyncOutcome> {
        let output = self
            .git(&["pull", "--rebase", &self.remote, &self.branch])
            .await?;
        if output.passed() {
            return Ok(SyncOutcome::Synced);
        }
        if contains_any(&output, CONFLICT_MARKERS) {
            let abort = self.git(&["rebase", "--abort"]).await?;
            if !abort.passed() {
                warn!(stderr = %abort.stderr.trim(), "rebase --abort failed");
            }
            return Ok(SyncOutcome::Conflicted);
        }
        Err(PipelineError::Git(GitError::CommandFailed {
            command: format!("pull --rebase {} {}", self.remote, self.branch),
            stderr: output.stderr.trim().to_string(),
        }))
    }

    async fn reset_to_upstream(&self) -> Result<()> {
        self.git_checked(&["fetch", &self.remote, &self.branch]).await?;
        self.git_checked(&["reset", "--hard", "FETCH_HEAD"]).await?;
        Ok(())
    }

    async fn stage(&self, paths: &[PathBuf]) -> Result<()> {
        let mut args = vec!["add".to_string(), "-A".to_string(), "--".to_string()];
        args.extend(paths.iter().map(|p| p.to_string_lossy().to_string()));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.git_checked(&args).await?;
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<bool> {
        let staged = self.git(&["diff", "--cached", "--quiet"]).await?;
        if staged.passed() {
            return Ok(false);
        }
        self.git_checked(&["commit", "-m", message]).await?;
        Ok(true)
    }

    async fn push(&self) -> Result<PushOutcome> {
        let refspec = format!("HEAD:{}", self.branch);
        let output = self.git(&["push", &self.remote, &refspec]).await?;
        if output.passed() {
            return Ok(PushOutcome::Pushed);
        }
        if contains_any(&output, REJECTION_MARKERS) {
            return Ok(PushOutcome::Rejected(output.stderr.trim().to_string()));
        }
        Err(PipelineError::Git(GitError::CommandFailed {
            command: format!("push {} {}", self.remote, refspec),
            stderr: output.stderr.trim().to_string(),
        }))
    }
}
