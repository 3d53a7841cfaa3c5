//! Read-rebase-write transaction over the shared repository.
//!
//! Concurrent pipeline runs coordinate only through the remote branch. A
//! transaction applies a working-tree mutation on top of fresh upstream
//! state, commits it once and pushes with bounded retry:
//!
//! 1. sync (pull --rebase)
//! 2. apply the mutation; nothing changed means nothing to commit
//! 3. stage the named paths and commit
//! 4. push; on rejection wait, sync again and retry. A conflicting rebase is
//!    aborted, the tree reset to upstream and the mutation re-applied.
//!
//! After `max_attempts` rejected pushes the transaction fails with
//! [`PipelineError::PublishConflict`]. The local commit is left in place.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::vcs::{PushOutcome, SyncOutcome, VersionControl};

/// How many pushes to try and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(2000))
    }
}

/// Result of a successful transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionOutcome {
    /// The mutation produced no change; nothing was committed or pushed.
    NoChange,

    /// Pushed on the given attempt (1-based).
    Committed { attempts: u32 },
}

pub struct SharedStateTransaction {
    vcs: Arc<dyn VersionControl>,
    retry: RetryPolicy,
}

impl SharedStateTransaction {
    pub fn new(vcs: Arc<dyn VersionControl>, retry: RetryPolicy) -> Self {
        Self { vcs, retry }
    }

    /// Run `apply` against fresh shared state and publish its effect.
    ///
    /// `apply` returns whether it changed the working tree. It may run more
    /// than once, so it must re-read whatever it depends on.
    pub async fn run<F>(
        &self,
        message: &str,
        paths: &[PathBuf],
        mut apply: F,
    ) -> Result<TransactionOutcome>
    where
        F: FnMut() -> Result<bool> + Send,
    {
        if self.vcs.sync().await? == SyncOutcome::Conflicted {
            self.vcs.reset_to_upstream().await?;
        }
        if !self.apply_and_commit(message, paths, &mut apply).await? {
            debug!("no change to commit");
            return Ok(TransactionOutcome::NoChange);
        }

        let max = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let reason = match self.vcs.push().await? {
                PushOutcome::Pushed => {
                    info!(attempt, "pushed shared state");
                    return Ok(TransactionOutcome::Committed { attempts: attempt });
                }
                PushOutcome::Rejected(reason) => reason,
            };

            warn!(attempt, max_attempts = max, reason = %reason, "push rejected");
            if attempt >= max {
                return Err(PipelineError::PublishConflict {
                    attempts: attempt,
                    reason,
                });
            }
            attempt += 1;

            tokio::time::sleep(self.retry.delay).await;
            match self.vcs.sync().await? {
                SyncOutcome::Synced => {}
                SyncOutcome::Conflicted => {
                    warn!(attempt, "rebase conflicted, re-applying onto upstream");
                    self.vcs.reset_to_upstream().await?;
                    if !self.apply_and_commit(message, paths, &mut apply).await? {
                        info!("upstream already contains the change");
                        return Ok(TransactionOutcome::NoChange);
                    }
                }
            }
        }
    }

    async fn apply_and_commit<F>(
        &self,
        message: &str,
        paths: &[PathBuf],
        apply: &mut F,
    ) -> Result<bool>
    where
        F: FnMut() -> Result<bool> + Send,
    {
        if !apply()? {
            return Ok(false);
        }
        self.vcs.stage(paths).await?;
        self.vcs.commit(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeRepository;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    fn paths() -> Vec<PathBuf> {
        vec![PathBuf::from("LEADERBOARD.md")]
    }

    #[tokio::test]
    async fn pushes_on_first_attempt() {
        let repo = Arc::new(FakeRepository::new());
        let tx = SharedStateTransaction::new(repo.clone(), fast());

        let outcome = tx.run("update", &paths(), || Ok(true)).await.unwrap();
        assert_eq!(outcome, TransactionOutcome::Committed { attempts: 1 });
        assert_eq!(repo.sync_count(), 1);
        assert_eq!(repo.commit_count(), 1);
        assert_eq!(repo.push_count(), 1);
    }

    #[tokio::test]
    async fn no_change_skips_commit_and_push() {
        let repo = Arc::new(FakeRepository::new());
        let tx = SharedStateTransaction::new(repo.clone(), fast());

        let outcome = tx.run("update", &paths(), || Ok(false)).await.unwrap();
        assert_eq!(outcome, TransactionOutcome::NoChange);
        assert_eq!(repo.commit_count(), 0);
        assert_eq!(repo.push_count(), 0);
    }

    #[tokio::test]
    async fn retries_with_sync_between_rejections() {
        let repo = Arc::new(FakeRepository::new().reject_pushes(2));
        let tx = SharedStateTransaction::new(repo.clone(), fast());

        let outcome = tx.run("update", &paths(), || Ok(true)).await.unwrap();
        assert_eq!(outcome, TransactionOutcome::Committed { attempts: 3 });
        assert_eq!(repo.push_count(), 3);
        assert_eq!(repo.sync_count(), 3);
        assert_eq!(repo.commit_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_with_conflict() {
        let repo = Arc::new(FakeRepository::new().reject_pushes(3));
        let tx = SharedStateTransaction::new(repo.clone(), fast());

        let err = tx.run("update", &paths(), || Ok(true)).await.unwrap_err();
        assert!(matches!(err, PipelineError::PublishConflict { attempts: 3, .. }));
        assert_eq!(repo.push_count(), 3);
        assert_eq!(repo.unpushed_commits(), 1);
    }

    #[tokio::test]
    async fn conflicting_rebase_reapplies_mutation() {
        let repo = Arc::new(
            FakeRepository::new()
                .reject_pushes(1)
                .with_sync_outcomes(&[SyncOutcome::Synced, SyncOutcome::Conflicted]),
        );
        let tx = SharedStateTransaction::new(repo.clone(), fast());
        let applied = AtomicUsize::new(0);

        let outcome = tx
            .run("update", &paths(), || {
                applied.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })
            .await
            .unwrap();
        assert_eq!(outcome, TransactionOutcome::Committed { attempts: 2 });
        assert_eq!(applied.load(Ordering::SeqCst), 2);
        assert_eq!(repo.reset_count(), 1);
        assert_eq!(repo.commit_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_fixed_delay_between_attempts() {
        let repo = Arc::new(FakeRepository::new().reject_pushes(2));
        let tx = SharedStateTransaction::new(repo.clone(), RetryPolicy::default());

        let start = tokio::time::Instant::now();
        tx.run("update", &paths(), || Ok(true)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(4000));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
