//! Version-control operations the pipeline needs from the shared repository.
//!
//! The repository is the only coordination point between concurrent runs, so
//! every write path goes through [`VersionControl::sync`] before committing
//! and treats [`PushOutcome::Rejected`] as "retry with fresh state".

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;

/// Result of pulling and rebasing onto the latest upstream state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Local work now sits on top of upstream.
    Synced,

    /// The rebase hit a conflict and was aborted; local commits are unchanged.
    Conflicted,
}

/// Result of a push attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,

    /// Upstream moved underneath us (non-fast-forward).
    Rejected(String),
}

/// Backend for reading history and writing to the shared repository.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// SHA of the checked-out commit.
    async fn head_sha(&self) -> Result<String>;

    /// Full message of a commit.
    async fn commit_message(&self, sha: &str) -> Result<String>;

    /// Paths changed by a commit relative to its first parent.
    ///
    /// Implementations deepen shallow history when the parent is missing.
    async fn changed_files(&self, sha: &str) -> Result<Vec<String>>;

    /// Pull and rebase onto the upstream branch.
    async fn sync(&self) -> Result<SyncOutcome>;

    /// Discard local commits and changes, matching upstream exactly.
    async fn reset_to_upstream(&self) -> Result<()>;

    /// Stage additions, modifications and deletions under `paths`.
    async fn stage(&self, paths: &[PathBuf]) -> Result<()>;

    /// Commit staged changes. Returns `false` when nothing was staged.
    async fn commit(&self, message: &str) -> Result<bool>;

    /// Push the current branch upstream.
    async fn push(&self) -> Result<PushOutcome>;
}
