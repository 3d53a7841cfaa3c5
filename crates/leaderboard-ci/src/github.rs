//! Hosting API queries used for identity resolution.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// GitHub caps the pull-request files listing at 3000 entries.
const MAX_PAGES: u32 = 30;
const PER_PAGE: usize = 100;

/// Read-only pull-request queries.
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    /// Paths changed by a pull request.
    async fn changed_files(&self, number: u64) -> Result<Vec<String>>;

    /// Pull requests associated with a commit (e.g. the one it merged).
    async fn pull_requests_for_commit(&self, sha: &str) -> Result<Vec<u64>>;
}

/// Connection settings for the GitHub REST API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubConfig {
    /// API base URL.
    pub api_url: String,
    /// `owner/name`.
    pub repository: String,
    /// Token, if any. Public repositories work without one at a low rate limit.
    pub token: Option<String>,
}

impl GithubConfig {
    /// Read `GITHUB_API_URL`, `GITHUB_REPOSITORY` and `GITHUB_TOKEN`.
    pub fn from_env() -> Option<Self> {
        let repository = std::env::var("GITHUB_REPOSITORY")
            .ok()
            .filter(|r| !r.is_empty())?;
        Some(Self {
            api_url: std::env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),
            repository,
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PullRequestFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    number: u64,
}

/// [`PullRequestApi`] over the GitHub REST API.
pub struct GithubClient {
    config: GithubConfig,
    http_client: reqwest::Client,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("leaderboard-ci/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Api(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut request = self
            .http_client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Api(format!("GET {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Api(format!("GET {url}: HTTP {status}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| PipelineError::Api(format!("GET {url}: invalid body: {e}")))
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.repository,
            path
        )
    }
}

#[async_trait]
impl PullRequestApi for GithubClient {
    async fn changed_files(&self, number: u64) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for page in 1..=MAX_PAGES {
            let url = self.repo_url(&format!(
                "pulls/{number}/files?per_page={PER_PAGE}&page={page}"
            ));
            let batch: Vec<PullRequestFile> = self.get_json(&url).await?;
            let done = batch.len() < PER_PAGE;
            files.extend(batch.into_iter().map(|f| f.filename));
            if done {
                break;
            }
        }
        debug!(pr = number, count = files.len(), "listed pull request files");
        Ok(files)
    }

    async fn pull_requests_for_commit(&self, sha: &str) -> Result<Vec<u64>> {
        let url = self.repo_url(&format!("commits/{sha}/pulls"));
        let pulls: Vec<PullRequestRef> = self.get_json(&url).await?;
        Ok(pulls.into_iter().map(|p| p.number).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_url_joins_cleanly() {
        let client = GithubClient::new(GithubConfig {
            api_url: "https://api.github.com/".to_string(),
            repository: "org/leaderboard".to_string(),
            token: None,
        })
        .unwrap();
        assert_eq!(
            client.repo_url("pulls/4/files"),
            "https://api.github.com/repos/org/leaderboard/pulls/4/files"
        );
    }

    #[test]
    fn test_file_listing_deserializes() {
        let body = r#"[{"filename":"submissions/alice/model.pt","status":"added"}]"#;
        let files: Vec<PullRequestFile> = serde_json::from_str(body).unwrap();
        assert_eq!(files[0].filename, "submissions/alice/model.pt");
    }
}
