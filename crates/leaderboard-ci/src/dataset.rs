//! Held-out dataset acquisition.
//!
//! Acquisition has three distinct fatal preconditions, checked in order:
//! credentials present and non-empty, connectivity probe succeeds, and the
//! destination directory is non-empty after the download.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::{AcquisitionError, Result};
use crate::runner::{CommandRunner, CommandSpec};

/// Names of the environment variables holding dataset credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialNames {
    pub username: String,
    pub key: String,
}

impl Default for CredentialNames {
    fn default() -> Self {
        Self {
            username: "DATASET_USERNAME".to_string(),
            key: "DATASET_KEY".to_string(),
        }
    }
}

impl CredentialNames {
    /// Check both credentials using `lookup` (usually the process environment).
    pub fn check<F>(&self, lookup: F) -> std::result::Result<(), AcquisitionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in [&self.username, &self.key] {
            match lookup(name.as_str()) {
                None => {
                    return Err(AcquisitionError::MissingCredential { name: name.clone() });
                }
                Some(value) if value.trim().is_empty() => {
                    return Err(AcquisitionError::EmptyCredential { name: name.clone() });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Where the dataset comes from.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Cheap connectivity check against the dataset host.
    async fn probe(&self) -> Result<()>;

    /// Download (or refresh) the dataset into `dest`.
    async fn download(&self, dest: &Path) -> Result<()>;
}

/// [`DatasetSource`] backed by external commands.
///
/// A missing probe command skips the probe; a missing download command uses
/// whatever already sits in the destination.
#[derive(Debug, Clone, Default)]
pub struct CommandDatasetSource {
    pub probe: Option<CommandSpec>,
    pub download: Option<CommandSpec>,
}

#[async_trait]
impl DatasetSource for CommandDatasetSource {
    async fn probe(&self) -> Result<()> {
        let Some(spec) = &self.probe else {
            return Ok(());
        };
        let output = CommandRunner::execute(spec)
            .await
            .map_err(|e| AcquisitionError::ProbeFailed(e.to_string()))?;
        if !output.passed() {
            return Err(AcquisitionError::ProbeFailed(format!(
                "exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            ))
            .into());
        }
        Ok(())
    }

    async fn download(&self, dest: &Path) -> Result<()> {
        let Some(spec) = &self.download else {
            return Ok(());
        };
        let spec = spec
            .clone()
            .env("DATASET_DIR", dest.to_string_lossy().to_string());
        let output = CommandRunner::execute(&spec)
            .await
            .map_err(|e| AcquisitionError::DownloadFailed(e.to_string()))?;
        if !output.passed() {
            return Err(AcquisitionError::DownloadFailed(format!(
                "exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            ))
            .into());
        }
        Ok(())
    }
}

/// Runs the acquisition preconditions and download.
pub struct DatasetAcquirer {
    credentials: CredentialNames,
    source: Arc<dyn DatasetSource>,
}

impl DatasetAcquirer {
    pub fn new(credentials: CredentialNames, source: Arc<dyn DatasetSource>) -> Self {
        Self {
            credentials,
            source,
        }
    }

    /// Acquire into `dest`, reading credentials from the process environment.
    pub async fn acquire(&self, dest: &Path) -> Result<PathBuf> {
        self.acquire_with(dest, |name| std::env::var(name).ok()).await
    }

    #[instrument(skip(self, lookup), fields(dest = %dest.display()))]
    pub async fn acquire_with<F>(&self, dest: &Path, lookup: F) -> Result<PathBuf>
    where
        F: Fn(&str) -> Option<String> + Send,
    {
        self.credentials.check(lookup)?;
        self.source.probe().await?;

        std::fs::create_dir_all(dest)?;
        self.source.download(dest).await?;

        if dir_is_empty(dest)? {
            return Err(AcquisitionError::EmptyDataset {
                path: dest.to_path_buf(),
            }
            .into());
        }

        info!("dataset ready");
        Ok(dest.to_path_buf())
    }
}

/// A missing directory counts as empty.
pub fn dir_is_empty(dir: &Path) -> std::io::Result<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::fakes::FakeDatasetSource;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + Send {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    fn creds() -> Vec<(&'static str, &'static str)> {
        vec![("DATASET_USERNAME", "user"), ("DATASET_KEY", "secret")]
    }

    #[test]
    fn test_credentials_missing_and_empty() {
        let names = CredentialNames::default();
        assert!(matches!(
            names.check(env(&[("DATASET_USERNAME", "u")])),
            Err(AcquisitionError::MissingCredential { name }) if name == "DATASET_KEY"
        ));
        assert!(matches!(
            names.check(env(&[("DATASET_USERNAME", " "), ("DATASET_KEY", "k")])),
            Err(AcquisitionError::EmptyCredential { name }) if name == "DATASET_USERNAME"
        ));
        assert!(names.check(env(&creds())).is_ok());
    }

    #[test]
    fn test_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(dir_is_empty(dir.path()).unwrap());
        assert!(dir_is_empty(&dir.path().join("missing")).unwrap());
        std::fs::write(dir.path().join("x.csv"), "1").unwrap();
        assert!(!dir_is_empty(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn acquire_succeeds_with_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeDatasetSource::new().with_files(&["test.csv"]));
        let acquirer = DatasetAcquirer::new(CredentialNames::default(), source);

        let dest = dir.path().join("dataset");
        let path = acquirer.acquire_with(&dest, env(&creds())).await.unwrap();
        assert!(path.join("test.csv").exists());
    }

    #[tokio::test]
    async fn probe_failure_is_fatal_before_download() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(
            FakeDatasetSource::new()
                .with_files(&["test.csv"])
                .failing_probe(),
        );
        let acquirer = DatasetAcquirer::new(CredentialNames::default(), source.clone());

        let err = acquirer
            .acquire_with(&dir.path().join("dataset"), env(&creds()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Acquisition(AcquisitionError::ProbeFailed(_))
        ));
        assert_eq!(source.downloads(), 0);
    }

    #[tokio::test]
    async fn empty_download_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeDatasetSource::new());
        let acquirer = DatasetAcquirer::new(CredentialNames::default(), source);

        let err = acquirer
            .acquire_with(&dir.path().join("dataset"), env(&creds()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Acquisition(AcquisitionError::EmptyDataset { .. })
        ));
    }

    #[tokio::test]
    async fn command_source_reports_failed_download() {
        let dir = tempfile::tempdir().unwrap();
        let source = CommandDatasetSource {
            probe: Some(CommandSpec::new("probe", vec!["true".to_string()])),
            download: Some(CommandSpec::new("download", vec!["false".to_string()])),
        };
        source.probe().await.unwrap();
        let err = source.download(dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Acquisition(AcquisitionError::DownloadFailed(_))
        ));
    }

    #[tokio::test]
    async fn command_source_download_sees_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = CommandDatasetSource {
            probe: None,
            download: Some(CommandSpec::new(
                "download",
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "echo 1,2 > \"$DATASET_DIR/test.csv\"".to_string(),
                ],
            )),
        };
        source.download(dir.path()).await.unwrap();
        assert!(dir.path().join("test.csv").exists());
    }
}
