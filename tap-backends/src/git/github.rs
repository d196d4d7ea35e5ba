//! GitHub repositories, contents and Actions runs.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tap_common::config::GitHubSettings;
use tap_common::poll::PollOutcome;
use tracing::debug;

use crate::check::StatusCheck;
use crate::client::{Auth, RestClient};
use crate::error::BackendError;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub status: String,
    pub conclusion: Option<String>,
    pub head_sha: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRuns {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct ContentUpdate<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentUpdateResponse {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

/// `completed` + `success` succeeds; any other conclusion fails.
pub fn workflow_run_outcome(run: &WorkflowRun) -> PollOutcome {
    if run.status != "completed" {
        return PollOutcome::Pending;
    }
    match run.conclusion.as_deref() {
        Some("success") => PollOutcome::Succeeded,
        Some(other) => PollOutcome::failed(other),
        None => PollOutcome::failed("completed without conclusion"),
    }
}

/// Decode the `content` field of the contents API (base64 with line breaks).
pub(crate) fn decode_content(encoded: &str) -> Result<String, String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    rest: RestClient,
    organization: String,
}

impl GitHubClient {
    pub fn new(settings: &GitHubSettings) -> Result<Self, BackendError> {
        let rest = RestClient::new(&settings.api_url, Auth::Bearer(settings.token.clone()))?;
        Ok(Self::from_rest(rest, &settings.organization))
    }

    pub fn from_rest(rest: RestClient, organization: impl Into<String>) -> Self {
        Self {
            rest,
            organization: organization.into(),
        }
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub(crate) fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub(crate) fn repo_path(&self, repo: &str) -> String {
        format!("/repos/{}/{}", self.organization, repo)
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
        let Some(entry) = self.content_entry(repo, branch, path).await? else {
            return Ok(None);
        };
        let url = self.rest.url(&self.repo_path(repo));
        decode_content(&entry.content)
            .map(Some)
            .map_err(|message| BackendError::Decode { url, message })
    }

    async fn content_entry(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<Option<ContentEntry>, BackendError> {
        self.rest
            .get_optional_json(&format!(
                "{}/contents/{}?ref={}",
                self.repo_path(repo),
                path.trim_start_matches('/'),
                urlencoding::encode(branch)
            ))
            .await
    }

    /// Create or replace a file; returns the new commit sha.
    pub async fn write_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, BackendError> {
        let existing = self.content_entry(repo, branch, path).await?;
        let body = ContentUpdate {
            message,
            content: STANDARD.encode(content),
            branch,
            sha: existing.map(|entry| entry.sha),
        };
        let response: ContentUpdateResponse = self
            .rest
            .put_json(
                &format!(
                    "{}/contents/{}",
                    self.repo_path(repo),
                    path.trim_start_matches('/')
                ),
                &body,
            )
            .await?;
        debug!(repo, path, sha = %response.commit.sha, "Committed file to GitHub");
        Ok(response.commit.sha)
    }

    pub async fn latest_commit(&self, repo: &str, branch: &str) -> Result<String, BackendError> {
        let commit: CommitRef = self
            .rest
            .get_json(&format!(
                "{}/commits/{}",
                self.repo_path(repo),
                urlencoding::encode(branch)
            ))
            .await?;
        Ok(commit.sha)
    }

    /// Newest workflow run for a commit, if Actions has registered one.
    pub async fn find_workflow_run(
        &self,
        repo: &str,
        head_sha: &str,
    ) -> Result<Option<WorkflowRun>, BackendError> {
        let runs: WorkflowRuns = self
            .rest
            .get_json(&format!(
                "{}/actions/runs?head_sha={}",
                self.repo_path(repo),
                urlencoding::encode(head_sha)
            ))
            .await?;
        Ok(runs
            .workflow_runs
            .into_iter()
            .filter(|run| run.head_sha == head_sha)
            .max_by_key(|run| run.id))
    }

    pub async fn workflow_run(&self, repo: &str, run_id: u64) -> Result<Option<WorkflowRun>, BackendError> {
        self.rest
            .get_optional_json(&format!("{}/actions/runs/{run_id}", self.repo_path(repo)))
            .await
    }

    pub fn workflow_status(&self, repo: impl Into<String>, run_id: u64) -> WorkflowRunStatus {
        WorkflowRunStatus {
            client: self.clone(),
            repo: repo.into(),
            run_id,
        }
    }
}

pub struct WorkflowRunStatus {
    client: GitHubClient,
    repo: String,
    run_id: u64,
}

impl StatusCheck for WorkflowRunStatus {
    fn resource(&self) -> String {
        format!(
            "github actions run {}/{} #{}",
            self.client.organization, self.repo, self.run_id
        )
    }

    async fn check(&self) -> Result<PollOutcome, BackendError> {
        Ok(match self.client.workflow_run(&self.repo, self.run_id).await? {
            Some(run) => workflow_run_outcome(&run),
            None => PollOutcome::Pending,
        })
    }
}
