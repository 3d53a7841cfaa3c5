//! GitHub Actions workflow commands and step outputs.

use std::fmt;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationLevel {
    Error,
    Warning,
}

impl AnnotationLevel {
    fn command(&self) -> &'static str {
        match self {
            AnnotationLevel::Error => "error",
            AnnotationLevel::Warning => "warning",
        }
    }
}

/// A workflow-command annotation (`::error title=..::message`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub level: AnnotationLevel,
    pub title: String,
    pub message: String,
}

impl Annotation {
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: AnnotationLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: AnnotationLevel::Warning,
            title: title.into(),
            message: message.into(),
        }
    }
}

impl From<&PipelineError> for Annotation {
    fn from(err: &PipelineError) -> Self {
        Annotation::error(err.title(), err.to_string())
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "::{} title={}::{}",
            self.level.command(),
            escape_property(&self.title),
            escape_data(&self.message)
        )
    }
}

/// Escape a command message.
pub fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Escape a command property; `:` and `,` delimit properties.
pub fn escape_property(value: &str) -> String {
    escape_data(value).replace(':', "%3A").replace(',', "%2C")
}

/// Named values handed to later workflow steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageOutputs {
    values: Vec<(String, String)>,
}

impl StageOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing an earlier value.
    pub fn set(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.values.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `key=value` lines; multi-line values use a heredoc delimiter.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.values {
            if value.contains('\n') || value.contains('\r') {
                let delimiter = format!("ghadelimiter_{}", uuid::Uuid::new_v4());
                out.push_str(&format!("{key}<<{delimiter}\n{value}\n{delimiter}\n"));
            } else {
                out.push_str(&format!("{key}={value}\n"));
            }
        }
        out
    }

    /// Append to the file named by `GITHUB_OUTPUT`, or print to stdout when
    /// running outside Actions.
    pub fn emit(&self) -> Result<()> {
        match std::env::var_os("GITHUB_OUTPUT") {
            Some(path) if !path.is_empty() => self.append_to(Path::new(&path)),
            _ => {
                print!("{}", self.render());
                Ok(())
            }
        }
    }

    pub fn append_to(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(self.render().as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn test_annotation_format_and_escaping() {
        let a = Annotation::error("Evaluation failed", "line one\nline two at 100%");
        assert_eq!(
            a.to_string(),
            "::error title=Evaluation failed::line one%0Aline two at 100%25"
        );

        let w = Annotation::warning("a: b, c", "x");
        assert_eq!(w.to_string(), "::warning title=a%3A b%2C c::x");
    }

    #[test]
    fn test_annotation_from_error_uses_title() {
        let err: PipelineError = ValidationError::MetadataMissing {
            path: "submissions/alice".into(),
        }
        .into();
        let a = Annotation::from(&err);
        assert_eq!(a.level, AnnotationLevel::Error);
        assert_eq!(a.title, "Submission validation failed");
        assert!(a.message.contains("metadata.json"));
    }

    #[test]
    fn test_outputs_set_replaces() {
        let mut outputs = StageOutputs::new();
        outputs.set("identity", "alice");
        outputs.set("valid", true);
        outputs.set("identity", "bob");
        assert_eq!(outputs.get("identity"), Some("bob"));
        assert_eq!(outputs.render(), "identity=bob\nvalid=true\n");
    }

    #[test]
    fn test_multiline_output_uses_delimiter() {
        let mut outputs = StageOutputs::new();
        outputs.set("reason", "a\nb");
        let rendered = outputs.render();
        assert!(rendered.starts_with("reason<<ghadelimiter_"));
        assert!(rendered.contains("\na\nb\n"));
    }

    #[test]
    fn test_append_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        std::fs::write(&path, "earlier=1\n").unwrap();

        let mut outputs = StageOutputs::new();
        outputs.set("cleanup", "removed");
        outputs.append_to(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "earlier=1\ncleanup=removed\n"
        );
    }
}
