//! Git hosting providers behind one dispatcher.

pub mod bitbucket;
pub mod github;
pub mod gitlab;

pub use bitbucket::BitbucketClient;
pub use github::{GitHubClient, WorkflowRun, WorkflowRunStatus, workflow_run_outcome};
pub use gitlab::{GitLabClient, Pipeline, PipelineStatus, pipeline_outcome};

use reqwest::StatusCode;
use tap_common::poll::PollOutcome;
use tap_common::types::GitProvider;

use crate::check::StatusCheck;
use crate::client::RestClient;
use crate::error::BackendError;

/// Branch the scaffolder templates push to.
pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone)]
pub enum GitHost {
    GitHub(GitHubClient),
    GitLab(GitLabClient),
    Bitbucket(BitbucketClient),
}

impl GitHost {
    pub fn provider(&self) -> GitProvider {
        match self {
            Self::GitHub(_) => GitProvider::GitHub,
            Self::GitLab(_) => GitProvider::GitLab,
            Self::Bitbucket(_) => GitProvider::Bitbucket,
        }
    }

    /// Organization, group or workspace that owns the repositories.
    pub fn owner(&self) -> &str {
        match self {
            Self::GitHub(c) => c.organization(),
            Self::GitLab(c) => c.group(),
            Self::Bitbucket(c) => c.workspace(),
        }
    }

    fn rest(&self) -> &RestClient {
        match self {
            Self::GitHub(c) => c.rest(),
            Self::GitLab(c) => c.rest(),
            Self::Bitbucket(c) => c.rest(),
        }
    }

    fn repository_path(&self, repo: &str) -> String {
        match self {
            Self::GitHub(c) => c.repo_path(repo),
            Self::GitLab(c) => c.project_path(repo),
            Self::Bitbucket(c) => c.repo_path(repo),
        }
    }

    pub async fn delete_repository(&self, repo: &str) -> Result<bool, BackendError> {
        match self {
            Self::GitHub(c) => c.delete_repository(repo).await,
            Self::GitLab(c) => c.delete_repository(repo).await,
            Self::Bitbucket(c) => c.delete_repository(repo).await,
        }
    }

    pub async fn read_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<Option<String>, BackendError> {
        match self {
            Self::GitHub(c) => c.read_file(repo, branch, path).await,
            Self::GitLab(c) => c.read_file(repo, branch, path).await,
            Self::Bitbucket(c) => c.read_file(repo, branch, path).await,
        }
    }

    /// Commit `content` to `path`; returns the commit sha.
    pub async fn write_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, BackendError> {
        match self {
            Self::GitHub(c) => c.write_file(repo, branch, path, content, message).await,
            Self::GitLab(c) => c.write_file(repo, branch, path, content, message).await,
            Self::Bitbucket(c) => c.write_file(repo, branch, path, content, message).await,
        }
    }

    pub async fn latest_commit(&self, repo: &str, branch: &str) -> Result<String, BackendError> {
        match self {
            Self::GitHub(c) => c.latest_commit(repo, branch).await,
            Self::GitLab(c) => c.latest_commit(repo, branch).await,
            Self::Bitbucket(c) => c.latest_commit(repo, branch).await,
        }
    }

    pub fn repository(&self, repo: impl Into<String>) -> RepositoryExists {
        RepositoryExists {
            host: self.clone(),
            repo: repo.into(),
        }
    }
}

/// 200 means the repository exists, 404 that it has not been created yet.
pub fn repository_outcome(status: StatusCode, url: &str) -> Result<PollOutcome, BackendError> {
    match status {
        StatusCode::OK => Ok(PollOutcome::Succeeded),
        StatusCode::NOT_FOUND => Ok(PollOutcome::Pending),
        other => Err(BackendError::http("GET", url, other.as_u16(), "")),
    }
}

/// Waits for a repository the scaffolder creates asynchronously.
pub struct RepositoryExists {
    host: GitHost,
    repo: String,
}

impl StatusCheck for RepositoryExists {
    fn resource(&self) -> String {
        format!(
            "{} repository {}/{}",
            self.host.provider(),
            self.host.owner(),
            self.repo
        )
    }

    async fn check(&self) -> Result<PollOutcome, BackendError> {
        let path = self.host.repository_path(&self.repo);
        let status = self.host.rest().status_of(&path).await?;
        repository_outcome(status, &self.host.rest().url(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_outcome() {
        assert_eq!(repository_outcome(StatusCode::OK, "u").unwrap(), PollOutcome::Succeeded);
        assert_eq!(
            repository_outcome(StatusCode::NOT_FOUND, "u").unwrap(),
            PollOutcome::Pending
        );
        let err = repository_outcome(StatusCode::UNAUTHORIZED, "u").unwrap_err();
        assert!(err.is_auth());
        let err = repository_outcome(StatusCode::BAD_GATEWAY, "u").unwrap_err();
        assert!(err.is_server_error());
    }
}
