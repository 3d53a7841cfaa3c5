//! Structural validation of a submission directory.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::ValidationError;
use crate::submission::{model_extension, SubmissionIdentity, SubmissionLayout, ALLOWED_EXTENSIONS};

/// Pass/fail verdict for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub identity: SubmissionIdentity,
    pub valid: bool,
    /// First violation found (checks stop there).
    pub reason: Option<ValidationError>,
    /// A tombstone from an earlier evaluation sits beside the model.
    pub already_evaluated: bool,
}

impl ValidationReport {
    /// Reason code, empty when valid.
    pub fn reason_code(&self) -> &'static str {
        self.reason.as_ref().map(|r| r.code()).unwrap_or("")
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        match self.reason {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

#[derive(Serialize)]
struct ReportView<'a> {
    identity: &'a str,
    valid: bool,
    reason: &'a str,
    message: Option<String>,
    already_evaluated: bool,
}

impl Serialize for ValidationReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ReportView {
            identity: self.identity.as_str(),
            valid: self.valid,
            reason: self.reason_code(),
            message: self.reason.as_ref().map(|r| r.to_string()),
            already_evaluated: self.already_evaluated,
        }
        .serialize(serializer)
    }
}

/// Checks a submission's on-disk shape. Never mutates the submission.
pub struct SubmissionValidator;

impl SubmissionValidator {
    /// Validate `submissions_root/<identity>`.
    ///
    /// Checks, stopping at the first violation:
    /// 1. the directory exists
    /// 2. exactly one `model.*` file sits directly inside it
    /// 3. its extension is allow-listed
    /// 4. `metadata.json` exists
    /// 5. `metadata.json` is well-formed JSON
    ///
    /// A tombstone never fails validation; it is reported so callers can
    /// decide against the re-evaluation policy.
    pub fn validate(submissions_root: &Path, identity: &SubmissionIdentity) -> ValidationReport {
        let layout = SubmissionLayout::new(submissions_root, identity);
        let reason = Self::check(&layout).err();
        let already_evaluated = layout.has_tombstone();
        if already_evaluated {
            warn!(identity = %identity, "submission carries a tombstone from an earlier evaluation");
        }

        match &reason {
            None => info!(identity = %identity, "submission is valid"),
            Some(r) => warn!(identity = %identity, reason = r.code(), "submission rejected: {}", r),
        }

        ValidationReport {
            identity: identity.clone(),
            valid: reason.is_none(),
            reason,
            already_evaluated,
        }
    }

    fn check(layout: &SubmissionLayout) -> Result<(), ValidationError> {
        if !layout.dir.is_dir() {
            return Err(ValidationError::DirectoryNotFound {
                path: layout.dir.clone(),
            });
        }

        let models = layout
            .model_files()
            .map_err(|_| ValidationError::DirectoryNotFound {
                path: layout.dir.clone(),
            })?;
        let [model] = models.as_slice() else {
            return Err(ValidationError::ModelFileMissing {
                path: layout.dir.clone(),
                found: models.len(),
            });
        };

        let extension = model_extension(model).unwrap_or_default();
        if !is_allowed_extension(&extension) {
            return Err(ValidationError::UnsupportedFormat {
                extension,
                allowed: ALLOWED_EXTENSIONS.join(", "),
            });
        }

        let metadata_path = layout.metadata_path();
        if !metadata_path.is_file() {
            return Err(ValidationError::MetadataMissing {
                path: layout.dir.clone(),
            });
        }

        let raw = std::fs::read(&metadata_path).map_err(|e| ValidationError::MetadataMalformed {
            reason: e.to_string(),
        })?;
        serde_json::from_slice::<serde_json::Value>(&raw).map_err(|e| {
            ValidationError::MetadataMalformed {
                reason: e.to_string(),
            }
        })?;

        Ok(())
    }
}

fn is_allowed_extension(extension: &str) -> bool {
    ALLOWED_EXTENSIONS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct Tree {
        root: tempfile::TempDir,
    }

    impl Tree {
        fn new() -> Self {
            Self {
                root: tempfile::tempdir().unwrap(),
            }
        }

        fn dir(&self, identity: &str) -> PathBuf {
            let dir = self.root.path().join(identity);
            std::fs::create_dir_all(&dir).unwrap();
            dir
        }

        fn file(&self, identity: &str, name: &str, content: &str) {
            std::fs::write(self.dir(identity).join(name), content).unwrap();
        }

        fn validate(&self, identity: &str) -> ValidationReport {
            SubmissionValidator::validate(
                self.root.path(),
                &SubmissionIdentity::new(identity).unwrap(),
            )
        }
    }

    #[test]
    fn test_valid_submission() {
        let tree = Tree::new();
        tree.file("alice", "model.pt", "weights");
        tree.file("alice", "metadata.json", r#"{"name": "alice-net"}"#);

        let report = tree.validate("alice");
        assert!(report.valid);
        assert!(report.reason.is_none());
        assert_eq!(report.reason_code(), "");
        assert!(!report.already_evaluated);
    }

    #[test]
    fn test_missing_directory() {
        let tree = Tree::new();
        let report = tree.validate("ghost");
        assert!(!report.valid);
        assert_eq!(report.reason_code(), "DirectoryNotFound");
    }

    #[test]
    fn test_no_model_file() {
        let tree = Tree::new();
        tree.file("bob", "metadata.json", "{}");
        let report = tree.validate("bob");
        assert!(matches!(
            report.reason,
            Some(ValidationError::ModelFileMissing { found: 0, .. })
        ));
    }

    #[test]
    fn test_two_model_files() {
        let tree = Tree::new();
        tree.file("bob", "model.pt", "a");
        tree.file("bob", "model.h5", "b");
        tree.file("bob", "metadata.json", "{}");
        let report = tree.validate("bob");
        assert!(matches!(
            report.reason,
            Some(ValidationError::ModelFileMissing { found: 2, .. })
        ));
    }

    #[test]
    fn test_tombstone_does_not_count_as_model() {
        let tree = Tree::new();
        tree.file("carol", "model.evaluated", "removed");
        tree.file("carol", "model.tflite", "weights");
        tree.file("carol", "metadata.json", "{}");
        let report = tree.validate("carol");
        assert!(report.valid);
        assert!(report.already_evaluated);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["already_evaluated"], true);
        assert_eq!(json["reason"], "");
    }

    #[test]
    fn test_unsupported_format_checked_before_metadata() {
        let tree = Tree::new();
        tree.file("dave", "model.onnx", "weights");
        // no metadata.json at all
        let report = tree.validate("dave");
        assert_eq!(report.reason_code(), "UnsupportedFormat");
    }

    #[test]
    fn test_extension_case_insensitive() {
        let tree = Tree::new();
        tree.file("erin", "model.PT", "weights");
        tree.file("erin", "metadata.json", "{}");
        assert!(tree.validate("erin").valid);
    }

    #[test]
    fn test_missing_metadata() {
        let tree = Tree::new();
        tree.file("frank", "model.h5", "weights");
        let report = tree.validate("frank");
        assert_eq!(report.reason_code(), "MetadataMissing");
    }

    #[test]
    fn test_malformed_metadata() {
        let tree = Tree::new();
        tree.file("gina", "model.pb", "weights");
        tree.file("gina", "metadata.json", "{ not json");
        let report = tree.validate("gina");
        assert_eq!(report.reason_code(), "MetadataMalformed");
        assert!(report.clone().into_result().is_err());
    }

    #[test]
    fn test_report_serializes_reason_code() {
        let tree = Tree::new();
        let report = tree.validate("nobody");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["reason"], "DirectoryNotFound");
    }
}
