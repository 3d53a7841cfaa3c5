//! Pipeline stages and the per-event stage plan.

use serde::{Deserialize, Serialize};

use crate::event::EventKind;

/// One step of the submission pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Work out which submission the event concerns.
    ResolveIdentity,

    /// Check the submission's on-disk shape.
    Validate,

    /// Fetch the held-out dataset.
    AcquireDataset,

    /// Run the external evaluator.
    Evaluate,

    /// Upsert the leaderboard row and push it.
    Publish,

    /// Replace the model artifact with a tombstone and push.
    Cleanup,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::ResolveIdentity => "resolve_identity",
            Stage::Validate => "validate",
            Stage::AcquireDataset => "acquire_dataset",
            Stage::Evaluate => "evaluate",
            Stage::Publish => "publish",
            Stage::Cleanup => "cleanup",
        }
    }

    /// Stages run for an event, in order.
    ///
    /// Pull requests are only validated; evaluation happens once the
    /// submission reaches the main branch or is dispatched by hand. Cleanup
    /// follows merges only.
    pub fn plan(event: EventKind) -> Vec<Stage> {
        match event {
            EventKind::PullRequest => vec![Stage::ResolveIdentity, Stage::Validate],
            EventKind::Push => vec![
                Stage::ResolveIdentity,
                Stage::AcquireDataset,
                Stage::Evaluate,
                Stage::Publish,
                Stage::Cleanup,
            ],
            EventKind::WorkflowDispatch => vec![
                Stage::ResolveIdentity,
                Stage::AcquireDataset,
                Stage::Evaluate,
                Stage::Publish,
            ],
        }
    }

    /// Whether the stage writes to the shared repository.
    pub fn mutates_shared_state(&self) -> bool {
        matches!(self, Stage::Publish | Stage::Cleanup)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a stage ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
    /// Not run because an earlier stage failed.
    Skipped,
}

/// Record of one stage in a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    /// Human-readable summary or error message.
    pub detail: String,
    pub duration_ms: u64,
}

impl StageReport {
    pub fn passed(stage: Stage, detail: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Passed,
            detail: detail.into(),
            duration_ms,
        }
    }

    pub fn failed(stage: Stage, detail: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            detail: detail.into(),
            duration_ms,
        }
    }

    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            detail: String::new(),
            duration_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_never_evaluates() {
        let plan = Stage::plan(EventKind::PullRequest);
        assert_eq!(plan, vec![Stage::ResolveIdentity, Stage::Validate]);
        assert!(!plan.iter().any(|s| s.mutates_shared_state()));
    }

    #[test]
    fn test_only_push_cleans_up() {
        assert_eq!(Stage::plan(EventKind::Push).last(), Some(&Stage::Cleanup));
        assert!(!Stage::plan(EventKind::WorkflowDispatch).contains(&Stage::Cleanup));
    }

    #[test]
    fn test_every_plan_starts_with_identity() {
        for event in [
            EventKind::PullRequest,
            EventKind::Push,
            EventKind::WorkflowDispatch,
        ] {
            assert_eq!(Stage::plan(event)[0], Stage::ResolveIdentity);
        }
    }

    #[test]
    fn test_stage_serialization() {
        let json = serde_json::to_string(&Stage::AcquireDataset).unwrap();
        assert_eq!(json, "\"acquire_dataset\"");
        assert_eq!(Stage::Publish.to_string(), "publish");
    }
}
