//! Leaderboard publishing.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::Result;
use crate::evaluator::EvaluationResult;
use crate::leaderboard::{content_digest, Leaderboard, LeaderboardEntry, UpsertOutcome};
use crate::submission::SubmissionIdentity;
use crate::transaction::{RetryPolicy, SharedStateTransaction, TransactionOutcome};
use crate::vcs::VersionControl;

/// What a publish did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    /// Effect of the last applied upsert.
    pub upsert: UpsertOutcome,
    pub transaction: TransactionOutcome,
    /// Rank of the submitter after the update.
    pub rank: usize,
    /// SHA-256 of the leaderboard document as committed.
    pub digest: String,
}

/// Upserts one row into the leaderboard file and commits it.
pub struct LeaderboardPublisher {
    vcs: Arc<dyn VersionControl>,
    path: PathBuf,
    retry: RetryPolicy,
}

impl LeaderboardPublisher {
    pub fn new(vcs: Arc<dyn VersionControl>, path: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            vcs,
            path: path.into(),
            retry,
        }
    }

    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn publish(
        &self,
        identity: &SubmissionIdentity,
        result: EvaluationResult,
        submitted_at: DateTime<Utc>,
    ) -> Result<PublishOutcome> {
        let transaction = SharedStateTransaction::new(self.vcs.clone(), self.retry);
        let message = format!("chore: update leaderboard for {identity} [skip ci]");
        let mut last: Option<(UpsertOutcome, usize, String)> = None;

        let outcome = transaction
            .run(&message, &[self.path.clone()], || {
                let mut board = Leaderboard::load(&self.path)?;
                let upsert = board.upsert(LeaderboardEntry::new(
                    identity.clone(),
                    result,
                    submitted_at,
                ));
                let rank = board.rank_of(identity).unwrap_or(0);
                let changed = board.save(&self.path)?;
                last = Some((upsert, rank, content_digest(&board.render())));
                Ok(changed)
            })
            .await?;

        let (upsert, rank, digest) = match last {
            Some(last) => last,
            None => {
                let board = Leaderboard::load(&self.path)?;
                (
                    UpsertOutcome::Unchanged,
                    board.rank_of(identity).unwrap_or(0),
                    content_digest(&board.render()),
                )
            }
        };

        info!(
            upsert = ?upsert,
            rank,
            digest = %digest,
            outcome = ?outcome,
            "leaderboard published"
        );
        Ok(PublishOutcome {
            upsert,
            transaction: outcome,
            rank,
            digest,
        })
    }
}
