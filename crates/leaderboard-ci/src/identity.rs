//! Submission identity resolution.
//!
//! An ordered list of [`IdentityStrategy`] implementations is tried in turn;
//! the first one that yields an identity wins. Strategy failures (API or git
//! errors) count as "no signal" and the cascade continues, except for an
//! authoritative strategy, whose failure ends resolution. When nothing
//! matches, the sentinel `baseline` identity is returned.
//!
//! Default order:
//! 1. explicit username on a manual dispatch
//! 2. files of the pull request behind the event
//! 3. files changed by the triggering commit
//! 4. `from|by|for <name>` in the commit message

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::event::{EventContext, EventKind};
use crate::github::PullRequestApi;
use crate::submission::{identity_from_paths, SubmissionIdentity};
use crate::vcs::VersionControl;

const MERGE_SUBJECT_PATTERN: &str = r"^Merge pull request #(\d+)";
const SQUASH_SUBJECT_PATTERN: &str = r"\(#(\d+)\)\s*$";
const CONNECTIVE_PATTERN: &str = r"(?i)\b(?:from|by|for)\s+@?([A-Za-z0-9][A-Za-z0-9_.-]*)";
const CONNECTIVES: &[&str] = &["from", "by", "for"];

/// Which signal produced the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolvedBy {
    /// Username input of a manual dispatch.
    ExplicitInput,

    /// Files of the pull request under review.
    PullRequestDiff { number: u64 },

    /// Files of the pull request merged by the triggering commit.
    MergeCommit { pull_request: u64 },

    /// Files changed by the triggering commit itself.
    DirectPush,

    /// Name found in the commit message.
    Heuristic,

    /// No signal; sentinel identity.
    Fallback,
}

impl ResolvedBy {
    pub fn label(&self) -> &'static str {
        match self {
            ResolvedBy::ExplicitInput => "explicit_input",
            ResolvedBy::PullRequestDiff { .. } => "pull_request_diff",
            ResolvedBy::MergeCommit { .. } => "merge_commit",
            ResolvedBy::DirectPush => "direct_push",
            ResolvedBy::Heuristic => "heuristic",
            ResolvedBy::Fallback => "fallback",
        }
    }
}

/// Outcome of identity resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub identity: SubmissionIdentity,
    pub resolved_by: ResolvedBy,
}

/// One signal in the resolution cascade.
#[async_trait]
pub trait IdentityStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a failure of this signal must not be papered over by the
    /// signals after it.
    fn authoritative(&self) -> bool {
        false
    }

    /// `Ok(None)` means this signal has nothing to say about the event.
    async fn resolve(&self, event: &EventContext) -> Result<Option<Resolution>>;
}

/// Ordered cascade of strategies with first-success semantics.
pub struct IdentityResolver {
    strategies: Vec<Box<dyn IdentityStrategy>>,
}

impl IdentityResolver {
    pub fn new(strategies: Vec<Box<dyn IdentityStrategy>>) -> Self {
        Self { strategies }
    }

    /// The standard cascade. The pull-request strategy is only included when
    /// an API client is available.
    pub fn standard(
        vcs: Arc<dyn VersionControl>,
        api: Option<Arc<dyn PullRequestApi>>,
    ) -> Self {
        let mut strategies: Vec<Box<dyn IdentityStrategy>> = vec![Box::new(ExplicitInput)];
        if let Some(api) = api {
            strategies.push(Box::new(PullRequestFiles::new(api, Some(vcs.clone()))));
        }
        strategies.push(Box::new(CommitFiles::new(vcs.clone())));
        strategies.push(Box::new(CommitMessage::new(Some(vcs))));
        Self::new(strategies)
    }

    /// Resolve the identity for an event.
    ///
    /// Fails only when an authoritative signal is present but unusable, such
    /// as a dispatch username that cannot name a submission.
    pub async fn resolve(&self, event: &EventContext) -> Result<Resolution> {
        for strategy in &self.strategies {
            match strategy.resolve(event).await {
                Ok(Some(resolution)) => {
                    info!(
                        identity = %resolution.identity,
                        signal = resolution.resolved_by.label(),
                        strategy = strategy.name(),
                        "resolved submission identity"
                    );
                    return Ok(resolution);
                }
                Ok(None) => debug!(strategy = strategy.name(), "no identity signal"),
                Err(e) if strategy.authoritative() => return Err(e),
                Err(e) => warn!(strategy = strategy.name(), error = %e, "identity signal failed"),
            }
        }

        warn!("no identity signal matched, falling back to baseline");
        Ok(Resolution {
            identity: SubmissionIdentity::baseline(),
            resolved_by: ResolvedBy::Fallback,
        })
    }
}

/// Username supplied to a manual dispatch, used verbatim. An unusable
/// username is an error rather than a reason to guess.
pub struct ExplicitInput;

#[async_trait]
impl IdentityStrategy for ExplicitInput {
    fn name(&self) -> &'static str {
        "explicit_input"
    }

    fn authoritative(&self) -> bool {
        true
    }

    async fn resolve(&self, event: &EventContext) -> Result<Option<Resolution>> {
        if event.kind != Some(EventKind::WorkflowDispatch) {
            return Ok(None);
        }
        let Some(username) = event.username.as_deref() else {
            return Ok(None);
        };
        let identity = SubmissionIdentity::new(username)?;
        Ok(Some(Resolution {
            identity,
            resolved_by: ResolvedBy::ExplicitInput,
        }))
    }
}

/// Changed files of the pull request behind the event.
///
/// For pull-request events the number comes from the payload. For pushes the
/// triggering commit must be a PR merge: the number is read from the commit
/// subject, then asked of the API.
pub struct PullRequestFiles {
    api: Arc<dyn PullRequestApi>,
    vcs: Option<Arc<dyn VersionControl>>,
}

impl PullRequestFiles {
    pub fn new(api: Arc<dyn PullRequestApi>, vcs: Option<Arc<dyn VersionControl>>) -> Self {
        Self { api, vcs }
    }

    async fn merged_pull_request(&self, event: &EventContext) -> Result<Option<u64>> {
        if let Some(message) = commit_message(event, self.vcs.as_deref()).await? {
            if let Some(number) = pull_request_from_message(&message) {
                return Ok(Some(number));
            }
        }
        let Some(sha) = event.sha.as_deref() else {
            return Ok(None);
        };
        let pulls = self.api.pull_requests_for_commit(sha).await?;
        Ok(pulls.into_iter().min())
    }
}

#[async_trait]
impl IdentityStrategy for PullRequestFiles {
    fn name(&self) -> &'static str {
        "pull_request_files"
    }

    async fn resolve(&self, event: &EventContext) -> Result<Option<Resolution>> {
        let (number, resolved_by) = match event.kind {
            Some(EventKind::PullRequest) => match event.pull_request {
                Some(number) => (number, ResolvedBy::PullRequestDiff { number }),
                None => return Ok(None),
            },
            Some(EventKind::Push) => match self.merged_pull_request(event).await? {
                Some(number) => (
                    number,
                    ResolvedBy::MergeCommit {
                        pull_request: number,
                    },
                ),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };

        let files = self.api.changed_files(number).await?;
        Ok(identity_from_paths(&files).map(|identity| Resolution {
            identity,
            resolved_by,
        }))
    }
}

/// Files changed by the triggering commit.
pub struct CommitFiles {
    vcs: Arc<dyn VersionControl>,
}

impl CommitFiles {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self { vcs }
    }
}

#[async_trait]
impl IdentityStrategy for CommitFiles {
    fn name(&self) -> &'static str {
        "commit_files"
    }

    async fn resolve(&self, event: &EventContext) -> Result<Option<Resolution>> {
        let files = match &event.changed_files {
            Some(files) => files.clone(),
            None => {
                let sha = match &event.sha {
                    Some(sha) => sha.clone(),
                    None => self.vcs.head_sha().await?,
                };
                self.vcs.changed_files(&sha).await?
            }
        };

        Ok(identity_from_paths(&files).map(|identity| Resolution {
            identity,
            resolved_by: ResolvedBy::DirectPush,
        }))
    }
}

/// `from|by|for <name>` in the commit message. Low confidence.
pub struct CommitMessage {
    vcs: Option<Arc<dyn VersionControl>>,
}

impl CommitMessage {
    pub fn new(vcs: Option<Arc<dyn VersionControl>>) -> Self {
        Self { vcs }
    }
}

#[async_trait]
impl IdentityStrategy for CommitMessage {
    fn name(&self) -> &'static str {
        "commit_message"
    }

    async fn resolve(&self, event: &EventContext) -> Result<Option<Resolution>> {
        let Some(message) = commit_message(event, self.vcs.as_deref()).await? else {
            return Ok(None);
        };
        Ok(identity_from_message(&message).map(|identity| Resolution {
            identity,
            resolved_by: ResolvedBy::Heuristic,
        }))
    }
}

async fn commit_message(
    event: &EventContext,
    vcs: Option<&dyn VersionControl>,
) -> Result<Option<String>> {
    if let Some(message) = &event.commit_message {
        return Ok(Some(message.clone()));
    }
    match (vcs, event.sha.as_deref()) {
        (Some(vcs), Some(sha)) => Ok(Some(vcs.commit_message(sha).await?)),
        (Some(vcs), None) => {
            let sha = vcs.head_sha().await?;
            Ok(Some(vcs.commit_message(&sha).await?))
        }
        (None, _) => Ok(None),
    }
}

/// PR number from a merge (`Merge pull request #N …`) or squash (`… (#N)`) subject.
pub fn pull_request_from_message(message: &str) -> Option<u64> {
    static MERGE: OnceLock<Option<Regex>> = OnceLock::new();
    static SQUASH: OnceLock<Option<Regex>> = OnceLock::new();

    let subject = message.lines().next()?.trim();
    [
        compiled(&MERGE, MERGE_SUBJECT_PATTERN),
        compiled(&SQUASH, SQUASH_SUBJECT_PATTERN),
    ]
    .into_iter()
    .flatten()
    .find_map(|re| {
        re.captures(subject)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

/// First plausible name following a connective word.
pub fn identity_from_message(message: &str) -> Option<SubmissionIdentity> {
    static CONNECTIVE: OnceLock<Option<Regex>> = OnceLock::new();

    let re = compiled(&CONNECTIVE, CONNECTIVE_PATTERN)?;
    re.captures_iter(message)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches(|c| c == '.' || c == '-'))
        .filter(|token| !CONNECTIVES.contains(&token.to_ascii_lowercase().as_str()))
        .find_map(|token| SubmissionIdentity::new(token).ok())
}

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}
