//! Submission identity and on-disk layout.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Path prefix under which every submission lives.
pub const SUBMISSIONS_PREFIX: &str = "submissions/";

/// Identity used when no resolution signal yields one.
pub const BASELINE_IDENTITY: &str = "baseline";

/// Model artifact extensions accepted by the validator.
pub const ALLOWED_EXTENSIONS: &[&str] = &["pt", "pth", "h5", "pb", "saved_model", "tflite"];

/// Stem shared by all model artifacts (`model.<ext>`).
pub const MODEL_STEM: &str = "model";

/// Marker file left behind once the artifact has been evaluated and removed.
pub const TOMBSTONE_FILE: &str = "model.evaluated";

/// Submission metadata descriptor.
pub const METADATA_FILE: &str = "metadata.json";

/// Token identifying a submitter. Always names exactly one directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubmissionIdentity(String);

impl SubmissionIdentity {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(PipelineError::InvalidIdentity(value))
        }
    }

    /// The sentinel identity.
    pub fn baseline() -> Self {
        Self(BASELINE_IDENTITY.to_string())
    }

    pub fn is_baseline(&self) -> bool {
        self.0 == BASELINE_IDENTITY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `value` can name a single directory under the submissions root
    /// and sit in a leaderboard cell unescaped: ASCII letters, digits, `.`,
    /// `_` and `-` only.
    pub fn is_valid(value: &str) -> bool {
        !value.is_empty()
            && value != "."
            && value != ".."
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    }
}

impl fmt::Display for SubmissionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubmissionIdentity {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SubmissionIdentity> for String {
    fn from(identity: SubmissionIdentity) -> Self {
        identity.0
    }
}

/// Resolved paths of one submission under a submissions root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionLayout {
    pub identity: SubmissionIdentity,
    pub dir: PathBuf,
}

impl SubmissionLayout {
    pub fn new(submissions_root: &Path, identity: &SubmissionIdentity) -> Self {
        Self {
            identity: identity.clone(),
            dir: submissions_root.join(identity.as_str()),
        }
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn tombstone_path(&self) -> PathBuf {
        self.dir.join(TOMBSTONE_FILE)
    }

    pub fn has_tombstone(&self) -> bool {
        self.tombstone_path().is_file()
    }

    /// Entries directly inside the submission matching `model.*`, sorted.
    ///
    /// Directories count too (a `model.saved_model` export is a directory).
    /// The tombstone is not an artifact and is never returned.
    pub fn model_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if !(file_type.is_file() || file_type.is_dir()) {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_model_file_name(&name) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }
}

/// `model.<ext>` with a non-empty extension, excluding the tombstone.
pub fn is_model_file_name(name: &str) -> bool {
    match name.strip_prefix(MODEL_STEM) {
        Some(rest) => rest.len() > 1 && rest.starts_with('.') && name != TOMBSTONE_FILE,
        None => false,
    }
}

/// Extension of a model file name (everything after `model.`).
pub fn model_extension(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(MODEL_STEM)
        .and_then(|rest| rest.strip_prefix('.'))
        .map(|ext| ext.to_string())
}

/// Submission directory named by a repository-relative path, if any.
///
/// `submissions/alice/model.pt` yields `alice`; files directly under the
/// submissions root do not name a submission.
pub fn identity_from_path(path: &str) -> Option<SubmissionIdentity> {
    let rest = path.trim_start_matches("./").strip_prefix(SUBMISSIONS_PREFIX)?;
    let (segment, remainder) = rest.split_once('/')?;
    if remainder.is_empty() {
        return None;
    }
    SubmissionIdentity::new(segment).ok()
}

/// First identity (in sorted path order) among a set of changed paths.
pub fn identity_from_paths<S: AsRef<str>>(paths: &[S]) -> Option<SubmissionIdentity> {
    let mut sorted: Vec<&str> = paths.iter().map(|p| p.as_ref()).collect();
    sorted.sort_unstable();
    sorted.into_iter().find_map(identity_from_path)
}
