//! Bitbucket Cloud repositories and source commits.

use serde::Deserialize;
use tap_common::config::BitbucketSettings;
use tracing::debug;

use crate::client::{Auth, RestClient};
use crate::error::BackendError;

#[derive(Debug, Deserialize)]
struct CommitPage {
    values: Vec<CommitEntry>,
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    hash: String,
}

/// Commit hash from the `Location` header returned by `POST /src`.
pub fn commit_from_location(location: &str) -> Option<&str> {
    let hash = location.trim_end_matches('/').rsplit('/').next()?;
    (!hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit())).then_some(hash)
}

#[derive(Debug, Clone)]
pub struct BitbucketClient {
    rest: RestClient,
    workspace: String,
}

impl BitbucketClient {
    pub fn new(settings: &BitbucketSettings) -> Result<Self, BackendError> {
        let rest = RestClient::new(
            &settings.api_url,
            Auth::Basic {
                username: settings.username.clone(),
                password: settings.app_password.clone(),
            },
        )?;
        Ok(Self::from_rest(rest, &settings.workspace))
    }

    pub fn from_rest(rest: RestClient, workspace: impl Into<String>) -> Self {
        Self {
            rest,
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub(crate) fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub(crate) fn repo_path(&self, repo: &str) -> String {
        format!("/repositories/{}/{}", self.workspace, repo)
    }

    pub async fn delete_repository(&self, repo: &str) -> Result<bool, BackendError> {
        self.rest.delete(&self.repo_path(repo)).await
    }

    pub async fn read_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<Option<String>, BackendError> {
        self.rest
            .get_optional_text(&format!(
                "{}/src/{}/{}",
                self.repo_path(repo),
                urlencoding::encode(branch),
                path.trim_start_matches('/')
            ))
            .await
    }

    /// Commit `content` to `path` on `branch`; returns the commit hash.
    pub async fn write_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, BackendError> {
        let file_path = format!("/{}", path.trim_start_matches('/'));
        let response = self
            .rest
            .post_form(
                &format!("{}/src", self.repo_path(repo)),
                &[
                    (file_path.as_str(), content),
                    ("message", message),
                    ("branch", branch),
                ],
            )
            .await?;

        let from_header = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(commit_from_location)
            .map(str::to_string);
        let hash = match from_header {
            Some(hash) => hash,
            None => self.latest_commit(repo, branch).await?,
        };
        debug!(repo, path, sha = %hash, "Committed file to Bitbucket");
        Ok(hash)
    }

    pub async fn latest_commit(&self, repo: &str, branch: &str) -> Result<String, BackendError> {
        let path = format!(
            "{}/commits/{}?pagelen=1",
            self.repo_path(repo),
            urlencoding::encode(branch)
        );
        let page: CommitPage = self.rest.get_json(&path).await?;
        page.values
            .into_iter()
            .next()
            .map(|commit| commit.hash)
            .ok_or_else(|| BackendError::missing_field(format!("bitbucket repository {repo}"), "commits"))
    }
}
