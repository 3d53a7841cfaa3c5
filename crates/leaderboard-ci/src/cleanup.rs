//! Post-evaluation artifact removal.
//!
//! The model artifact is deleted and replaced with a tombstone recording when
//! it was removed. Deletion and tombstone land in one commit, published
//! through the shared-state transaction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::Result;
use crate::submission::{SubmissionIdentity, SubmissionLayout};
use crate::transaction::{RetryPolicy, SharedStateTransaction, TransactionOutcome};
use crate::vcs::VersionControl;

/// Why cleanup did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    BaselineIdentity,
    NoArtifact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupOutcome {
    Skipped { reason: SkipReason },
    Removed {
        files: Vec<PathBuf>,
        transaction: TransactionOutcome,
    },
}

impl CleanupOutcome {
    /// Value for the `cleanup` stage output.
    pub fn label(&self) -> &'static str {
        match self {
            CleanupOutcome::Skipped { .. } => "skipped",
            CleanupOutcome::Removed { .. } => "removed",
        }
    }
}

pub struct ArtifactCleanup {
    vcs: Arc<dyn VersionControl>,
    submissions_root: PathBuf,
    retry: RetryPolicy,
}

impl ArtifactCleanup {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        submissions_root: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            vcs,
            submissions_root: submissions_root.into(),
            retry,
        }
    }

    /// Remove `model.*` for `identity`, write the tombstone and commit.
    ///
    /// The baseline identity and submissions without an artifact are no-ops:
    /// no sync, no commit, no push.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn cleanup(&self, identity: &SubmissionIdentity) -> Result<CleanupOutcome> {
        if identity.is_baseline() {
            info!("baseline identity, nothing to clean up");
            return Ok(CleanupOutcome::Skipped {
                reason: SkipReason::BaselineIdentity,
            });
        }

        let layout = SubmissionLayout::new(&self.submissions_root, identity);
        if artifacts(&layout)?.is_empty() {
            info!(dir = %layout.dir.display(), "no model artifact found");
            return Ok(CleanupOutcome::Skipped {
                reason: SkipReason::NoArtifact,
            });
        }

        let transaction = SharedStateTransaction::new(self.vcs.clone(), self.retry);
        let message = format!("chore: remove evaluated model for {identity} [skip ci]");
        let mut removed = Vec::new();

        let outcome = transaction
            .run(&message, &[layout.dir.clone()], || {
                let files = artifacts(&layout)?;
                if files.is_empty() {
                    return Ok(false);
                }
                for file in &files {
                    remove(file)?;
                }
                write_tombstone(&layout)?;
                removed = files;
                Ok(true)
            })
            .await?;

        if outcome == TransactionOutcome::NoChange {
            return Ok(CleanupOutcome::Skipped {
                reason: SkipReason::NoArtifact,
            });
        }

        info!(files = removed.len(), "model artifact removed");
        Ok(CleanupOutcome::Removed {
            files: removed,
            transaction: outcome,
        })
    }
}

fn artifacts(layout: &SubmissionLayout) -> std::io::Result<Vec<PathBuf>> {
    match layout.model_files() {
        Ok(files) => Ok(files),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn remove(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn write_tombstone(layout: &SubmissionLayout) -> std::io::Result<()> {
    let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
    std::fs::write(
        layout.tombstone_path(),
        format!("Model evaluated and removed on {stamp} UTC\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::fakes::FakeRepository;
    use std::time::Duration;

    struct Fixture {
        root: tempfile::TempDir,
        repo: Arc<FakeRepository>,
    }

    impl Fixture {
        fn new(repo: FakeRepository) -> Self {
            Self {
                root: tempfile::tempdir().unwrap(),
                repo: Arc::new(repo),
            }
        }

        fn submission(&self, identity: &str, files: &[&str]) -> SubmissionLayout {
            let layout =
                SubmissionLayout::new(self.root.path(), &SubmissionIdentity::new(identity).unwrap());
            std::fs::create_dir_all(&layout.dir).unwrap();
            for name in files {
                std::fs::write(layout.dir.join(name), "x").unwrap();
            }
            layout
        }

        fn cleanup(&self) -> ArtifactCleanup {
            ArtifactCleanup::new(
                self.repo.clone(),
                self.root.path(),
                RetryPolicy::new(3, Duration::ZERO),
            )
        }
    }

    #[tokio::test]
    async fn removes_artifact_and_writes_tombstone() {
        let fx = Fixture::new(FakeRepository::new());
        let layout = fx.submission("alice", &["model.pt", "metadata.json"]);

        let outcome = fx
            .cleanup()
            .cleanup(&SubmissionIdentity::new("alice").unwrap())
            .await
            .unwrap();

        assert_eq!(outcome.label(), "removed");
        assert!(!layout.dir.join("model.pt").exists());
        assert!(layout.metadata_path().exists());
        let tombstone = std::fs::read_to_string(layout.tombstone_path()).unwrap();
        assert!(tombstone.starts_with("Model evaluated and removed on "));
        assert_eq!(fx.repo.staged_paths(), vec![layout.dir.clone()]);
        assert_eq!(
            fx.repo.commit_messages(),
            vec!["chore: remove evaluated model for alice [skip ci]".to_string()]
        );
    }

    #[tokio::test]
    async fn baseline_is_never_touched() {
        let fx = Fixture::new(FakeRepository::new());
        let layout = fx.submission("baseline", &["model.pt"]);

        let outcome = fx.cleanup().cleanup(&SubmissionIdentity::baseline()).await.unwrap();
        assert_eq!(
            outcome,
            CleanupOutcome::Skipped {
                reason: SkipReason::BaselineIdentity
            }
        );
        assert!(layout.dir.join("model.pt").exists());
        assert_eq!(fx.repo.sync_count(), 0);
        assert_eq!(fx.repo.commit_count(), 0);
    }

    #[tokio::test]
    async fn already_cleaned_submission_is_a_no_op() {
        let fx = Fixture::new(FakeRepository::new());
        fx.submission("bob", &["model.evaluated", "metadata.json"]);

        let outcome = fx
            .cleanup()
            .cleanup(&SubmissionIdentity::new("bob").unwrap())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CleanupOutcome::Skipped {
                reason: SkipReason::NoArtifact
            }
        );
        assert_eq!(fx.repo.push_count(), 0);
    }

    #[tokio::test]
    async fn saved_model_directory_is_removed() {
        let fx = Fixture::new(FakeRepository::new());
        let layout = fx.submission("carol", &["metadata.json"]);
        let export = layout.dir.join("model.saved_model");
        std::fs::create_dir_all(export.join("variables")).unwrap();
        std::fs::write(export.join("saved_model.pb"), "graph").unwrap();

        fx.cleanup()
            .cleanup(&SubmissionIdentity::new("carol").unwrap())
            .await
            .unwrap();
        assert!(!export.exists());
        assert!(layout.has_tombstone());
    }

    #[tokio::test]
    async fn exhausted_retries_leave_commit_local() {
        let fx = Fixture::new(FakeRepository::new().reject_pushes(3));
        let layout = fx.submission("dave", &["model.h5"]);

        let err = fx
            .cleanup()
            .cleanup(&SubmissionIdentity::new("dave").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PublishConflict { attempts: 3, .. }));
        assert!(layout.has_tombstone());
        assert_eq!(fx.repo.commit_count(), 1);
        assert_eq!(fx.repo.unpushed_commits(), 1);
    }
}
