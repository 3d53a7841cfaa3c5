//! Triggering event description.
//!
//! The host CI hands the pipeline an event name, the triggering commit and a
//! JSON payload. [`EventContext`] is the subset the pipeline relies on.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, Result};

/// Kind of event that started the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Pull request opened or updated.
    PullRequest,

    /// Push to the main branch (typically a merge).
    Push,

    /// Manual dispatch, optionally with an explicit username.
    WorkflowDispatch,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PullRequest => "pull_request",
            EventKind::Push => "push",
            EventKind::WorkflowDispatch => "workflow_dispatch",
        }
    }

    /// Map a host event name onto a kind.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "pull_request" | "pull_request_target" => Ok(EventKind::PullRequest),
            "push" => Ok(EventKind::Push),
            "workflow_dispatch" => Ok(EventKind::WorkflowDispatch),
            other => Err(PipelineError::Event(format!("unsupported event: {other}"))),
        }
    }
}

/// Everything the pipeline knows about the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventContext {
    pub kind: Option<EventKind>,

    /// Explicit username input (manual dispatch only).
    pub username: Option<String>,

    /// Triggering commit SHA.
    pub sha: Option<String>,

    /// Triggering commit message.
    pub commit_message: Option<String>,

    /// Pull request number for pull-request events.
    pub pull_request: Option<u64>,

    /// Changed paths already known from the trigger (pull-request diff).
    pub changed_files: Option<Vec<String>>,
}

impl EventContext {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    pub fn with_commit_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = Some(message.into());
        self
    }

    pub fn with_pull_request(mut self, number: u64) -> Self {
        self.pull_request = Some(number);
        self
    }

    pub fn with_changed_files(mut self, files: Vec<String>) -> Self {
        self.changed_files = Some(files);
        self
    }

    pub fn event_kind(&self) -> Result<EventKind> {
        self.kind
            .ok_or_else(|| PipelineError::Event("event kind not set".to_string()))
    }

    /// Build a context from a host event name, SHA and payload.
    pub fn from_payload(event_name: &str, sha: Option<String>, payload: &Value) -> Result<Self> {
        let kind = EventKind::parse(event_name)?;

        let username = payload["inputs"]["username"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let commit_message = payload["head_commit"]["message"]
            .as_str()
            .map(str::to_string);

        let pull_request = payload["pull_request"]["number"]
            .as_u64()
            .or_else(|| payload["number"].as_u64());

        let sha = sha.or_else(|| payload["after"].as_str().map(str::to_string));

        Ok(Self {
            kind: Some(kind),
            username,
            sha,
            commit_message,
            pull_request,
            changed_files: None,
        })
    }

    /// Load the context from the GitHub Actions environment.
    pub fn from_env() -> Result<Self> {
        let event_name = std::env::var("GITHUB_EVENT_NAME")
            .map_err(|_| PipelineError::Event("GITHUB_EVENT_NAME is not set".to_string()))?;
        let sha = std::env::var("GITHUB_SHA").ok().filter(|s| !s.is_empty());
        let payload = match std::env::var("GITHUB_EVENT_PATH") {
            Ok(path) if !path.is_empty() => read_payload(Path::new(&path))?,
            _ => Value::Null,
        };
        Self::from_payload(&event_name, sha, &payload)
    }
}

fn read_payload(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Event(format!("read {}: {e}", path.display())))?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(EventKind::parse("push").unwrap(), EventKind::Push);
        assert_eq!(
            EventKind::parse("pull_request").unwrap(),
            EventKind::PullRequest
        );
        assert_eq!(
            EventKind::parse("workflow_dispatch").unwrap(),
            EventKind::WorkflowDispatch
        );
        assert!(EventKind::parse("schedule").is_err());
    }

    #[test]
    fn test_dispatch_payload_username() {
        let payload = json!({ "inputs": { "username": " alice " } });
        let ctx = EventContext::from_payload("workflow_dispatch", None, &payload).unwrap();
        assert_eq!(ctx.kind, Some(EventKind::WorkflowDispatch));
        assert_eq!(ctx.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_blank_username_is_ignored() {
        let payload = json!({ "inputs": { "username": "" } });
        let ctx = EventContext::from_payload("workflow_dispatch", None, &payload).unwrap();
        assert!(ctx.username.is_none());
    }

    #[test]
    fn test_push_payload_commit() {
        let payload = json!({
            "after": "deadbeef",
            "head_commit": { "message": "Merge pull request #12 from alice/submit" }
        });
        let ctx = EventContext::from_payload("push", None, &payload).unwrap();
        assert_eq!(ctx.sha.as_deref(), Some("deadbeef"));
        assert_eq!(
            ctx.commit_message.as_deref(),
            Some("Merge pull request #12 from alice/submit")
        );
    }

    #[test]
    fn test_pull_request_payload_number() {
        let payload = json!({ "number": 7, "pull_request": { "number": 7 } });
        let ctx = EventContext::from_payload("pull_request", Some("abc".into()), &payload).unwrap();
        assert_eq!(ctx.pull_request, Some(7));
        assert_eq!(ctx.sha.as_deref(), Some("abc"));
    }

    #[test]
    fn test_null_payload_is_empty_context() {
        let ctx = EventContext::from_payload("push", None, &Value::Null).unwrap();
        assert_eq!(ctx.kind, Some(EventKind::Push));
        assert!(ctx.username.is_none());
        assert!(ctx.commit_message.is_none());
    }
}
