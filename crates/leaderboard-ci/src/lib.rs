//! Leaderboard CI - submission evaluation pipeline
//!
//! Drives a model submission from pull request to leaderboard:
//! - resolves which submission an event concerns
//! - validates the submission's on-disk shape
//! - evaluates it against a held-out dataset
//! - publishes the result and removes the evaluated artifact, pushing both
//!   through a retrying read-rebase-write transaction

pub mod annotations;
pub mod cleanup;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod fakes;
pub mod gate;
pub mod git;
pub mod github;
pub mod identity;
pub mod leaderboard;
pub mod pipeline;
pub mod publisher;
pub mod runner;
pub mod stage;
pub mod submission;
pub mod telemetry;
pub mod transaction;
pub mod validator;
pub mod vcs;

// Re-export key types
pub use annotations::{Annotation, StageOutputs};
pub use cleanup::{ArtifactCleanup, CleanupOutcome};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use evaluator::{BaselineConstants, EvaluationResult, ReevaluationPolicy};
pub use event::{EventContext, EventKind};
pub use gate::{CiGate, GateVerdict};
pub use identity::{IdentityResolver, Resolution, ResolvedBy};
pub use leaderboard::{Leaderboard, LeaderboardEntry, UpsertOutcome};
pub use pipeline::{PipelineReport, SubmissionPipeline};
pub use publisher::{LeaderboardPublisher, PublishOutcome};
pub use stage::{Stage, StageReport, StageStatus};
pub use submission::SubmissionIdentity;
pub use telemetry::init_tracing;
pub use transaction::{RetryPolicy, SharedStateTransaction, TransactionOutcome};
pub use validator::{SubmissionValidator, ValidationReport};

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
