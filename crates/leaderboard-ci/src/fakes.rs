//! In-memory fakes for the pipeline's trait seams (testing only)
//!
//! Provides `FakeRepository`, `FakePullRequestApi`, `FakeDatasetSource` and
//! `FakeEvaluator`, scriptable stand-ins for git, the hosting API, the
//! dataset host and the external evaluator.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::dataset::DatasetSource;
use crate::error::{AcquisitionError, EvaluationError, GitError, PipelineError, Result};
use crate::evaluator::{EvaluationRequest, Evaluator};
use crate::github::PullRequestApi;
use crate::vcs::{PushOutcome, SyncOutcome, VersionControl};

// ---------------------------------------------------------------------------
// FakeRepository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FakeCommit {
    message: String,
    files: Vec<String>,
}

#[derive(Default)]
struct RepoState {
    commits: HashMap<String, FakeCommit>,
    head: Option<String>,
    sync_script: VecDeque<SyncOutcome>,
    push_script: VecDeque<PushOutcome>,
    staged: Vec<PathBuf>,
    staged_history: Vec<PathBuf>,
    commit_messages: Vec<String>,
    unpushed: usize,
    sync_count: usize,
    push_count: usize,
    reset_count: usize,
}

type ResetHook = Box<dyn FnMut() + Send>;

/// Scriptable [`VersionControl`]: history lookups come from registered
/// commits, sync and push results from queued outcomes (default: success).
#[derive(Default)]
pub struct FakeRepository {
    state: Mutex<RepoState>,
    on_reset: Mutex<Option<ResetHook>>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a commit; the last one registered becomes HEAD.
    pub fn with_commit(self, sha: &str, message: &str, files: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.commits.insert(
                sha.to_string(),
                FakeCommit {
                    message: message.to_string(),
                    files: files.iter().map(|f| f.to_string()).collect(),
                },
            );
            state.head = Some(sha.to_string());
        }
        self
    }

    /// Reject the next `n` pushes as non-fast-forward.
    pub fn reject_pushes(self, n: usize) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for _ in 0..n {
                state
                    .push_script
                    .push_back(PushOutcome::Rejected("! [rejected] (fetch first)".to_string()));
            }
        }
        self
    }

    /// Accept the next `n` pushes; used to queue rejections for a later writer.
    pub fn accept_pushes(self, n: usize) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for _ in 0..n {
                state.push_script.push_back(PushOutcome::Pushed);
            }
        }
        self
    }

    /// Queue sync outcomes, consumed in order.
    pub fn with_sync_outcomes(self, outcomes: &[SyncOutcome]) -> Self {
        self.state
            .lock()
            .unwrap()
            .sync_script
            .extend(outcomes.iter().cloned());
        self
    }

    /// Run `hook` whenever the tree is reset to upstream, e.g. to simulate
    /// another writer's change landing in the working tree.
    pub fn on_reset(self, hook: impl FnMut() + Send + 'static) -> Self {
        *self.on_reset.lock().unwrap() = Some(Box::new(hook));
        self
    }

    pub fn sync_count(&self) -> usize {
        self.state.lock().unwrap().sync_count
    }

    pub fn push_count(&self) -> usize {
        self.state.lock().unwrap().push_count
    }

    pub fn reset_count(&self) -> usize {
        self.state.lock().unwrap().reset_count
    }

    pub fn commit_count(&self) -> usize {
        self.state.lock().unwrap().commit_messages.len()
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.state.lock().unwrap().commit_messages.clone()
    }

    /// Every path ever passed to `stage`.
    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().staged_history.clone()
    }

    /// Local commits not yet pushed.
    pub fn unpushed_commits(&self) -> usize {
        self.state.lock().unwrap().unpushed
    }

    fn missing(command: &str, sha: &str) -> PipelineError {
        PipelineError::Git(GitError::CommandFailed {
            command: format!("{command} {sha}"),
            stderr: format!("fatal: bad object {sha}"),
        })
    }
}

#[async_trait]
impl VersionControl for FakeRepository {
    async fn head_sha(&self) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .head
            .clone()
            .ok_or_else(|| Self::missing("rev-parse", "HEAD"))
    }

    async fn commit_message(&self, sha: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        state
            .commits
            .get(sha)
            .map(|c| c.message.clone())
            .ok_or_else(|| Self::missing("log", sha))
    }

    async fn changed_files(&self, sha: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .commits
            .get(sha)
            .map(|c| c.files.clone())
            .ok_or_else(|| Self::missing("diff", sha))
    }

    async fn sync(&self) -> Result<SyncOutcome> {
        let mut state = self.state.lock().unwrap();
        state.sync_count += 1;
        Ok(state.sync_script.pop_front().unwrap_or(SyncOutcome::Synced))
    }

    async fn reset_to_upstream(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.reset_count += 1;
            state.unpushed = 0;
            state.staged.clear();
        }
        if let Some(hook) = self.on_reset.lock().unwrap().as_mut() {
            hook();
        }
        Ok(())
    }

    async fn stage(&self, paths: &[PathBuf]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.staged.extend(paths.iter().cloned());
        state.staged_history.extend(paths.iter().cloned());
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.staged.is_empty() {
            return Ok(false);
        }
        state.staged.clear();
        state.commit_messages.push(message.to_string());
        state.unpushed += 1;
        Ok(true)
    }

    async fn push(&self) -> Result<PushOutcome> {
        let mut state = self.state.lock().unwrap();
        state.push_count += 1;
        let outcome = state.push_script.pop_front().unwrap_or(PushOutcome::Pushed);
        if outcome == PushOutcome::Pushed {
            state.unpushed = 0;
        }
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// FakePullRequestApi
// ---------------------------------------------------------------------------

/// [`PullRequestApi`] backed by maps. Unknown pull requests are an error,
/// unknown commits have no associated pull requests.
#[derive(Debug, Default)]
pub struct FakePullRequestApi {
    files: HashMap<u64, Vec<String>>,
    commit_pulls: HashMap<String, Vec<u64>>,
}

impl FakePullRequestApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(mut self, number: u64, files: &[&str]) -> Self {
        self.files
            .insert(number, files.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn with_commit_pulls(mut self, sha: &str, numbers: &[u64]) -> Self {
        self.commit_pulls.insert(sha.to_string(), numbers.to_vec());
        self
    }
}

#[async_trait]
impl PullRequestApi for FakePullRequestApi {
    async fn changed_files(&self, number: u64) -> Result<Vec<String>> {
        self.files
            .get(&number)
            .cloned()
            .ok_or_else(|| PipelineError::Api(format!("pull request #{number} not found")))
    }

    async fn pull_requests_for_commit(&self, sha: &str) -> Result<Vec<u64>> {
        Ok(self.commit_pulls.get(sha).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// FakeDatasetSource
// ---------------------------------------------------------------------------

/// [`DatasetSource`] that writes a fixed set of files on download.
#[derive(Debug, Default)]
pub struct FakeDatasetSource {
    files: Vec<String>,
    fail_probe: bool,
    downloads: AtomicUsize,
}

impl FakeDatasetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(mut self, files: &[&str]) -> Self {
        self.files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetSource for FakeDatasetSource {
    async fn probe(&self) -> Result<()> {
        if self.fail_probe {
            return Err(AcquisitionError::ProbeFailed("host unreachable".to_string()).into());
        }
        Ok(())
    }

    async fn download(&self, dest: &Path) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        for name in &self.files {
            std::fs::write(dest.join(name), "0,1\n")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeEvaluator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Behaviour {
    Write(Value),
    WriteNothing,
    Fail { exit_code: i32, stderr: String },
}

/// [`Evaluator`] that writes a canned result document.
#[derive(Debug)]
pub struct FakeEvaluator {
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
    last_request: Mutex<Option<EvaluationRequest>>,
}

impl FakeEvaluator {
    fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(AtomicUsize::new(0)),
            last_request: Mutex::new(None),
        }
    }

    /// Write `document` to the requested output path.
    pub fn writing(document: Value) -> Self {
        Self::with_behaviour(Behaviour::Write(document))
    }

    /// Exit successfully without producing output.
    pub fn writing_nothing() -> Self {
        Self::with_behaviour(Behaviour::WriteNothing)
    }

    pub fn failing(exit_code: i32, stderr: &str) -> Self {
        Self::with_behaviour(Behaviour::Fail {
            exit_code,
            stderr: stderr.to_string(),
        })
    }

    /// Shared call counter, usable after the evaluator has been moved.
    pub fn calls_handle(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn last_request(&self) -> Option<EvaluationRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl Evaluator for FakeEvaluator {
    async fn run(&self, request: &EvaluationRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        match &self.behaviour {
            Behaviour::Write(document) => {
                std::fs::write(&request.output_path, serde_json::to_vec(document)?)?;
                Ok(())
            }
            Behaviour::WriteNothing => Ok(()),
            Behaviour::Fail { exit_code, stderr } => Err(EvaluationError::ProcessFailed {
                exit_code: *exit_code,
                stderr: stderr.clone(),
            }
            .into()),
        }
    }
}
