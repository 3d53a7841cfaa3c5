//! Submission pipeline orchestration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::annotations::{Annotation, StageOutputs};
use crate::cleanup::{ArtifactCleanup, CleanupOutcome};
use crate::config::PipelineConfig;
use crate::dataset::{DatasetAcquirer, DatasetSource};
use crate::error::{PipelineError, Result};
use crate::evaluator::{
    CommandEvaluator, EvaluationResult, Evaluator, EvaluatorAdapter, ReevaluationPolicy,
};
use crate::event::{EventContext, EventKind};
use crate::git::GitCli;
use crate::github::{GithubClient, GithubConfig, PullRequestApi};
use crate::identity::{IdentityResolver, Resolution, ResolvedBy};
use crate::publisher::{LeaderboardPublisher, PublishOutcome};
use crate::stage::{Stage, StageReport, StageStatus};
use crate::submission::{SubmissionIdentity, SubmissionLayout};
use crate::validator::{SubmissionValidator, ValidationReport};
use crate::vcs::VersionControl;

/// Source of dataset credentials, usually the process environment.
pub type CredentialLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Result of a complete pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub event: EventKind,
    pub identity: Option<SubmissionIdentity>,
    pub resolved_by: Option<ResolvedBy>,
    pub validation: Option<ValidationReport>,
    pub evaluation: Option<EvaluationResult>,
    pub publish: Option<PublishOutcome>,
    pub cleanup: Option<CleanupOutcome>,

    /// One report per planned stage, in order.
    pub stages: Vec<StageReport>,

    pub annotations: Vec<Annotation>,
    pub outputs: StageOutputs,

    /// Whether every planned stage passed.
    pub success: bool,
    pub duration_ms: u64,
}

impl PipelineReport {
    pub(crate) fn new(event: EventKind) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            event,
            identity: None,
            resolved_by: None,
            validation: None,
            evaluation: None,
            publish: None,
            cleanup: None,
            stages: Vec::new(),
            annotations: Vec::new(),
            outputs: StageOutputs::new(),
            success: false,
            duration_ms: 0,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.count(StageStatus::Passed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(StageStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(StageStatus::Skipped)
    }

    /// The stage that halted the run, if any.
    pub fn failed_stage(&self) -> Option<&StageReport> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)
    }

    fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }

    fn identity(&self) -> Result<&SubmissionIdentity> {
        self.identity
            .as_ref()
            .ok_or_else(|| PipelineError::Event("submission identity not resolved".to_string()))
    }
}

/// Validate, evaluate, publish and clean up one submission.
///
/// Stages run strictly in sequence. The first failing stage halts the run;
/// the rest are reported as skipped.
pub struct SubmissionPipeline {
    config: PipelineConfig,
    resolver: IdentityResolver,
    acquirer: DatasetAcquirer,
    evaluator: EvaluatorAdapter,
    publisher: LeaderboardPublisher,
    cleanup: ArtifactCleanup,
    credentials: CredentialLookup,
}

impl SubmissionPipeline {
    pub fn new(
        config: PipelineConfig,
        vcs: Arc<dyn VersionControl>,
        api: Option<Arc<dyn PullRequestApi>>,
        dataset: Arc<dyn DatasetSource>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        let retry = config.retry_policy();
        Self {
            resolver: IdentityResolver::standard(vcs.clone(), api),
            acquirer: DatasetAcquirer::new(config.credentials(), dataset),
            evaluator: EvaluatorAdapter::new(evaluator, config.baseline, config.reevaluation),
            publisher: LeaderboardPublisher::new(vcs.clone(), config.leaderboard_path(), retry),
            cleanup: ArtifactCleanup::new(vcs, config.submissions_root(), retry),
            credentials: Arc::new(|name: &str| std::env::var(name).ok()),
            config,
        }
    }

    /// Wire the production backends: git CLI, GitHub API (when a repository
    /// is configured), command-based dataset source and evaluator.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let vcs: Arc<dyn VersionControl> = Arc::new(GitCli::new(
            config.workspace.clone(),
            &config.git_remote,
            &config.git_branch,
        ));
        let api: Option<Arc<dyn PullRequestApi>> = match GithubConfig::from_env() {
            Some(github) => {
                let client: Arc<dyn PullRequestApi> = Arc::new(GithubClient::new(github)?);
                Some(client)
            }
            None => {
                warn!("GITHUB_REPOSITORY not set, pull request lookups disabled");
                None
            }
        };
        let dataset = Arc::new(config.dataset_source());
        let evaluator = Arc::new(CommandEvaluator::new(config.evaluator_command()?));
        Ok(Self::new(config, vcs, api, dataset, evaluator))
    }

    /// Replace the credential source (defaults to the process environment).
    pub fn with_credentials<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.credentials = Arc::new(lookup);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn resolve(&self, event: &EventContext) -> Result<Resolution> {
        self.resolver.resolve(event).await
    }

    pub fn validate(&self, identity: &SubmissionIdentity) -> ValidationReport {
        SubmissionValidator::validate(&self.config.submissions_root(), identity)
    }

    /// Warning for a valid submission that evaluation is going to refuse.
    pub fn validation_warning(&self, validation: &ValidationReport) -> Option<Annotation> {
        let refused = validation.valid
            && validation.already_evaluated
            && self.config.reevaluation == ReevaluationPolicy::Reject;
        refused.then(|| {
            Annotation::warning(
                "Submission already evaluated",
                format!(
                    "{} carries a tombstone and will not be re-evaluated \
                     unless LEADERBOARD_REEVALUATION=allow",
                    validation.identity
                ),
            )
        })
    }

    pub async fn acquire_dataset(&self) -> Result<PathBuf> {
        let credentials = self.credentials.clone();
        self.acquirer
            .acquire_with(&self.config.dataset_path(), move |name| credentials(name))
            .await
    }

    pub async fn evaluate(&self, identity: &SubmissionIdentity) -> Result<EvaluationResult> {
        let layout = SubmissionLayout::new(&self.config.submissions_root(), identity);
        self.evaluator
            .evaluate(&layout, &self.config.dataset_path(), &self.config.result_path())
            .await
    }

    pub async fn publish(
        &self,
        identity: &SubmissionIdentity,
        result: EvaluationResult,
    ) -> Result<PublishOutcome> {
        self.publisher.publish(identity, result, Utc::now()).await
    }

    pub async fn cleanup(&self, identity: &SubmissionIdentity) -> Result<CleanupOutcome> {
        self.cleanup.cleanup(identity).await
    }

    /// Run every stage planned for the event.
    ///
    /// Stage failures are captured in the report; `Err` means the event
    /// itself could not be interpreted.
    pub async fn run(&self, event: &EventContext) -> Result<PipelineReport> {
        let start = Instant::now();
        let kind = event.event_kind()?;
        let mut report = PipelineReport::new(kind);

        info!(run_id = %report.run_id, event = kind.name(), "starting submission pipeline");

        let mut halted = false;
        for stage in Stage::plan(kind) {
            if halted {
                report.stages.push(StageReport::skipped(stage));
                continue;
            }

            let stage_start = Instant::now();
            let result = self.run_stage(stage, event, &mut report).await;
            let duration_ms = stage_start.elapsed().as_millis() as u64;

            match result {
                Ok(detail) => {
                    info!(stage = stage.name(), duration_ms, "{}", detail);
                    report
                        .stages
                        .push(StageReport::passed(stage, detail, duration_ms));
                }
                Err(e) => {
                    error!(stage = stage.name(), error = %e, "stage failed");
                    report.annotations.push(Annotation::from(&e));
                    report
                        .stages
                        .push(StageReport::failed(stage, e.to_string(), duration_ms));
                    halted = true;
                }
            }
        }

        report.success = !halted;
        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            run_id = %report.run_id,
            success = report.success,
            passed = report.passed_count(),
            failed = report.failed_count(),
            "submission pipeline finished"
        );
        Ok(report)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        event: &EventContext,
        report: &mut PipelineReport,
    ) -> Result<String> {
        match stage {
            Stage::ResolveIdentity => {
                let resolution = self.resolve(event).await?;
                report.outputs.set("identity", &resolution.identity);
                report
                    .outputs
                    .set("resolved_by", resolution.resolved_by.label());
                if resolution.resolved_by == ResolvedBy::Fallback {
                    report.annotations.push(Annotation::warning(
                        "Submission identity ambiguous",
                        "no identity signal matched the event; using the baseline submission",
                    ));
                }
                let detail = format!(
                    "identity {} ({})",
                    resolution.identity,
                    resolution.resolved_by.label()
                );
                report.identity = Some(resolution.identity);
                report.resolved_by = Some(resolution.resolved_by);
                Ok(detail)
            }
            Stage::Validate => {
                let validation = self.validate(report.identity()?);
                report.outputs.set("valid", validation.valid);
                report.outputs.set("reason", validation.reason_code());
                report.validation = Some(validation.clone());
                if let Some(warning) = self.validation_warning(&validation) {
                    report.annotations.push(warning);
                }
                validation.into_result()?;
                Ok("submission is valid".to_string())
            }
            Stage::AcquireDataset => {
                let path = self.acquire_dataset().await?;
                Ok(format!("dataset ready at {}", path.display()))
            }
            Stage::Evaluate => {
                let identity = report.identity()?.clone();
                let result = self.evaluate(&identity).await?;
                report.outputs.set("model_size", result.model_size);
                report.outputs.set("latency", result.latency);
                report.outputs.set("accuracy", result.accuracy);
                report.outputs.set("total_score", result.total_score);
                report.evaluation = Some(result);
                Ok(format!("total score {}", result.total_score))
            }
            Stage::Publish => {
                let identity = report.identity()?.clone();
                let result = report.evaluation.ok_or_else(|| {
                    PipelineError::Event("no evaluation result to publish".to_string())
                })?;
                let outcome = self.publish(&identity, result).await?;
                report.outputs.set("leaderboard_digest", &outcome.digest);
                let detail = format!("{:?} at rank {}", outcome.upsert, outcome.rank);
                report.publish = Some(outcome);
                Ok(detail)
            }
            Stage::Cleanup => {
                let identity = report.identity()?.clone();
                let outcome = self.cleanup(&identity).await?;
                report.outputs.set("cleanup", outcome.label());
                let detail = match &outcome {
                    CleanupOutcome::Skipped { reason } => format!("skipped ({reason:?})"),
                    CleanupOutcome::Removed { files, .. } => {
                        format!("removed {} artifact(s)", files.len())
                    }
                };
                report.cleanup = Some(outcome);
                Ok(detail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeDatasetSource, FakeEvaluator, FakePullRequestApi, FakeRepository};
    use serde_json::json;

    struct Fixture {
        _root: tempfile::TempDir,
        config: PipelineConfig,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default().with_workspace(root.path());
        config.push_delay_ms = 0;

        let alice = root.path().join("submissions/alice");
        std::fs::create_dir_all(&alice).unwrap();
        std::fs::write(alice.join("model.pt"), "weights").unwrap();
        std::fs::write(alice.join("metadata.json"), "{}").unwrap();

        Fixture {
            _root: root,
            config,
        }
    }

    fn pipeline(fx: &Fixture, repo: Arc<FakeRepository>, evaluator: FakeEvaluator) -> SubmissionPipeline {
        let api: Arc<dyn PullRequestApi> = Arc::new(
            FakePullRequestApi::new().with_files(4, &["submissions/alice/model.pt"]),
        );
        SubmissionPipeline::new(
            fx.config.clone(),
            repo,
            Some(api),
            Arc::new(FakeDatasetSource::new().with_files(&["test.csv"])),
            Arc::new(evaluator),
        )
        .with_credentials(|name| Some(format!("{name}-value")))
    }

    fn scores() -> FakeEvaluator {
        FakeEvaluator::writing(json!({
            "model_size": 10.0, "latency": 20.0, "accuracy": 55.0, "total_score": 1.5
        }))
    }

    #[tokio::test]
    async fn pull_request_validates_without_evaluating() {
        let fx = fixture();
        let repo = Arc::new(FakeRepository::new());
        let evaluator = scores();
        let calls = evaluator.calls_handle();
        let pipeline = pipeline(&fx, repo.clone(), evaluator);

        let event = EventContext::new(EventKind::PullRequest).with_pull_request(4);
        let report = pipeline.run(&event).await.unwrap();

        assert!(report.success);
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.outputs.get("valid"), Some("true"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(repo.commit_count(), 0);
    }

    #[tokio::test]
    async fn push_runs_every_stage() {
        let fx = fixture();
        let repo = Arc::new(FakeRepository::new().with_commit(
            "abc",
            "Merge pull request #4 from alice/submit",
            &[],
        ));
        let pipeline = pipeline(&fx, repo.clone(), scores());

        let event = EventContext::new(EventKind::Push).with_sha("abc");
        let report = pipeline.run(&event).await.unwrap();

        assert!(report.success, "{:?}", report.stages);
        assert_eq!(report.passed_count(), 5);
        assert_eq!(report.identity.as_ref().unwrap().as_str(), "alice");
        assert_eq!(report.outputs.get("total_score"), Some("1.5"));
        assert_eq!(report.outputs.get("cleanup"), Some("removed"));
        assert!(report.outputs.get("leaderboard_digest").is_some());
        assert_eq!(repo.commit_count(), 2);
    }

    #[tokio::test]
    async fn evaluator_failure_skips_publish_and_cleanup() {
        let fx = fixture();
        let repo = Arc::new(FakeRepository::new());
        let pipeline = pipeline(&fx, repo.clone(), FakeEvaluator::failing(1, "CUDA out of memory"));

        let event = EventContext::new(EventKind::WorkflowDispatch).with_username("alice");
        let report = pipeline.run(&event).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.failed_stage().unwrap().stage, Stage::Evaluate);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.annotations[0].title, "Evaluation failed");
        assert!(report.annotations[0].message.contains("CUDA out of memory"));
        assert_eq!(repo.commit_count(), 0);
    }

    #[tokio::test]
    async fn missing_credentials_fail_acquisition() {
        let fx = fixture();
        let repo = Arc::new(FakeRepository::new());
        let pipeline = pipeline(&fx, repo, scores()).with_credentials(|_| None);

        let event = EventContext::new(EventKind::WorkflowDispatch).with_username("alice");
        let report = pipeline.run(&event).await.unwrap();

        assert_eq!(report.failed_stage().unwrap().stage, Stage::AcquireDataset);
        assert_eq!(report.annotations[0].title, "Dataset acquisition failed");
    }

    #[tokio::test]
    async fn unusable_dispatch_username_fails_resolution() {
        let fx = fixture();
        let repo = Arc::new(FakeRepository::new());
        let evaluator = scores();
        let calls = evaluator.calls_handle();
        let pipeline = pipeline(&fx, repo.clone(), evaluator);

        let event = EventContext::new(EventKind::WorkflowDispatch).with_username("a|b");
        let report = pipeline.run(&event).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.failed_stage().unwrap().stage, Stage::ResolveIdentity);
        assert_eq!(report.skipped_count(), 3);
        assert!(report.identity.is_none());
        assert_eq!(report.annotations[0].title, "Invalid submission identity");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(repo.sync_count(), 0);
        assert!(!fx.config.leaderboard_path().exists());
    }

    #[tokio::test]
    async fn tombstone_is_flagged_at_validation() {
        let fx = fixture();
        let tombstone = fx.config.submissions_root().join("alice/model.evaluated");
        std::fs::write(&tombstone, "Model evaluated and removed on 2026-10-01").unwrap();
        let event = EventContext::new(EventKind::PullRequest).with_pull_request(4);

        let pipeline = pipeline(&fx, Arc::new(FakeRepository::new()), scores());
        let report = pipeline.run(&event).await.unwrap();
        assert!(report.success);
        assert_eq!(report.annotations.len(), 1);
        assert_eq!(report.annotations[0].level, crate::annotations::AnnotationLevel::Warning);
        assert_eq!(report.annotations[0].title, "Submission already evaluated");
        assert!(report.annotations[0].message.contains("alice"));

        let mut allowing = fx.config.clone();
        allowing.reevaluation = ReevaluationPolicy::Allow;
        let pipeline = SubmissionPipeline::new(
            allowing,
            Arc::new(FakeRepository::new()),
            None,
            Arc::new(FakeDatasetSource::new()),
            Arc::new(scores()),
        );
        let report = pipeline.validate(&SubmissionIdentity::new("alice").unwrap());
        assert!(report.already_evaluated);
        assert!(pipeline.validation_warning(&report).is_none());
    }

    #[tokio::test]
    async fn event_without_kind_is_an_error() {
        let fx = fixture();
        let pipeline = pipeline(&fx, Arc::new(FakeRepository::new()), scores());
        assert!(pipeline.run(&EventContext::default()).await.is_err());
    }
}
