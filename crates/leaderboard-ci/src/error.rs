//! Error taxonomy for the submission pipeline.

use std::path::PathBuf;

/// A submission failed a structural check. Terminal, reported to the PR author.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("submission directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("expected exactly one model.* file in {path}, found {found}")]
    ModelFileMissing { path: PathBuf, found: usize },

    #[error("unsupported model format '.{extension}' (allowed: {allowed})")]
    UnsupportedFormat { extension: String, allowed: String },

    #[error("metadata.json not found in {path}")]
    MetadataMissing { path: PathBuf },

    #[error("metadata.json is not well-formed JSON: {reason}")]
    MetadataMalformed { reason: String },
}

impl ValidationError {
    /// Stable machine-readable code for the violation.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::DirectoryNotFound { .. } => "DirectoryNotFound",
            ValidationError::ModelFileMissing { .. } => "ModelFileMissing",
            ValidationError::UnsupportedFormat { .. } => "UnsupportedFormat",
            ValidationError::MetadataMissing { .. } => "MetadataMissing",
            ValidationError::MetadataMalformed { .. } => "MetadataMalformed",
        }
    }
}

/// Dataset or credentials unavailable. Terminal.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("dataset credential {name} is not set")]
    MissingCredential { name: String },

    #[error("dataset credential {name} is empty")]
    EmptyCredential { name: String },

    #[error("dataset connectivity probe failed: {0}")]
    ProbeFailed(String),

    #[error("dataset download failed: {0}")]
    DownloadFailed(String),

    #[error("dataset directory is empty after acquisition: {path}")]
    EmptyDataset { path: PathBuf },
}

/// The evaluator crashed or produced an incomplete result. Terminal, never retried.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("dataset directory is empty: {path}")]
    EmptyDataset { path: PathBuf },

    #[error("evaluator exited with code {exit_code}: {stderr}")]
    ProcessFailed { exit_code: i32, stderr: String },

    #[error("evaluator could not be started: {0}")]
    Spawn(String),

    #[error("evaluation result file unreadable at {path}: {reason}")]
    ResultUnreadable { path: PathBuf, reason: String },

    #[error("evaluation result is missing field '{0}'")]
    MissingField(&'static str),

    #[error("evaluation result field '{0}' is not a number")]
    InvalidField(&'static str),

    #[error("submission '{identity}' was already evaluated (tombstone present)")]
    AlreadyEvaluated { identity: String },
}

/// The persisted leaderboard could not be read or written.
#[derive(Debug, thiserror::Error)]
pub enum LeaderboardError {
    #[error("malformed leaderboard row {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("leaderboard table header not found")]
    MissingHeader,
}

/// Git command failures that are not push rejections.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("failed to run git: {0}")]
    Spawn(String),

    #[error("parent of {sha} is not available in shallow history")]
    ShallowHistory { sha: String },
}

/// Pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("leaderboard error: {0}")]
    Leaderboard(#[from] LeaderboardError),

    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("push rejected after {attempts} attempt(s): {reason}")]
    PublishConflict { attempts: u32, reason: String },

    #[error("invalid submission identity: {0:?}")]
    InvalidIdentity(String),

    #[error("event context error: {0}")]
    Event(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("hosting API error: {0}")]
    Api(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Annotation title used when the error is surfaced to the host CI.
    pub fn title(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "Submission validation failed",
            PipelineError::Acquisition(_) => "Dataset acquisition failed",
            PipelineError::Evaluation(_) => "Evaluation failed",
            PipelineError::PublishConflict { .. } => "Push retries exhausted",
            PipelineError::InvalidIdentity(_) => "Invalid submission identity",
            _ => "Pipeline error",
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_codes() {
        let err = ValidationError::MetadataMissing {
            path: PathBuf::from("submissions/alice"),
        };
        assert_eq!(err.code(), "MetadataMissing");
        assert!(err.to_string().contains("submissions/alice"));

        let err = ValidationError::UnsupportedFormat {
            extension: "onnx".to_string(),
            allowed: "pt, pth".to_string(),
        };
        assert_eq!(err.code(), "UnsupportedFormat");
        assert!(err.to_string().contains(".onnx"));
    }

    #[test]
    fn test_publish_conflict_display() {
        let err = PipelineError::PublishConflict {
            attempts: 3,
            reason: "non-fast-forward".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("non-fast-forward"));
        assert_eq!(err.title(), "Push retries exhausted");
    }

    #[test]
    fn test_wrapped_errors_keep_titles() {
        let err: PipelineError = EvaluationError::MissingField("latency").into();
        assert_eq!(err.title(), "Evaluation failed");
        assert!(err.to_string().contains("latency"));
    }
}
