//! GitLab projects, files and CI pipelines.

use serde::{Deserialize, Serialize};
use tap_common::config::GitLabSettings;
use tap_common::poll::PollOutcome;
use tracing::debug;

use super::github::decode_content;
use crate::check::StatusCheck;
use crate::client::{Auth, RestClient};
use crate::error::BackendError;

/// Pipeline statuses that have not reached a final state. `manual` waits for
/// a person to press play, so it also counts as not finished.
const PENDING_STATUSES: &[&str] = &[
    "created",
    "waiting_for_resource",
    "preparing",
    "pending",
    "running",
    "scheduled",
    "manual",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    pub id: u64,
    pub status: String,
    pub sha: String,
    #[serde(default)]
    pub web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Commit {
    id: String,
}

#[derive(Debug, Serialize)]
struct CommitAction<'a> {
    action: &'a str,
    file_path: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    branch: &'a str,
    commit_message: &'a str,
    actions: Vec<CommitAction<'a>>,
}

pub fn pipeline_outcome(pipeline: &Pipeline) -> PollOutcome {
    match pipeline.status.as_str() {
        "success" => PollOutcome::Succeeded,
        status if PENDING_STATUSES.contains(&status) => PollOutcome::Pending,
        other => PollOutcome::failed(other),
    }
}

#[derive(Debug, Clone)]
pub struct GitLabClient {
    rest: RestClient,
    group: String,
}

impl GitLabClient {
    pub fn new(settings: &GitLabSettings) -> Result<Self, BackendError> {
        let rest = RestClient::new(
            format!("{}/api/v4", settings.url),
            Auth::Header {
                name: "PRIVATE-TOKEN",
                value: settings.token.clone(),
            },
        )?;
        Ok(Self::from_rest(rest, &settings.group))
    }

    pub fn from_rest(rest: RestClient, group: impl Into<String>) -> Self {
        Self {
            rest,
            group: group.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub(crate) fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// `/projects/<url-encoded group/repo>`.
    pub(crate) fn project_path(&self, repo: &str) -> String {
        let full = format!("{}/{}", self.group, repo);
        format!("/projects/{}", urlencoding::encode(&full))
    }

    pub async fn delete_repository(&self, repo: &str) -> Result<bool, BackendError> {
        self.rest.delete(&self.project_path(repo)).await
    }

    pub async fn read_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<Option<String>, BackendError> {
        let file: Option<FileEntry> = self
            .rest
            .get_optional_json(&format!(
                "{}/repository/files/{}?ref={}",
                self.project_path(repo),
                urlencoding::encode(path.trim_start_matches('/')),
                urlencoding::encode(branch)
            ))
            .await?;
        let Some(file) = file else {
            return Ok(None);
        };
        let url = self.rest.url(&self.project_path(repo));
        decode_content(&file.content)
            .map(Some)
            .map_err(|message| BackendError::Decode { url, message })
    }

    /// Commit `content` to `path` on `branch`; returns the commit sha.
    pub async fn write_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, BackendError> {
        let exists = self.read_file(repo, branch, path).await?.is_some();
        let file_path = path.trim_start_matches('/');
        let request = CommitRequest {
            branch,
            commit_message: message,
            actions: vec![CommitAction {
                action: if exists { "update" } else { "create" },
                file_path,
                content,
            }],
        };
        let commit: Commit = self
            .rest
            .post_json(
                &format!("{}/repository/commits", self.project_path(repo)),
                &request,
            )
            .await?;
        debug!(repo, path, sha = %commit.id, "Committed file to GitLab");
        Ok(commit.id)
    }

    pub async fn latest_commit(&self, repo: &str, branch: &str) -> Result<String, BackendError> {
        let commit: Commit = self
            .rest
            .get_json(&format!(
                "{}/repository/commits/{}",
                self.project_path(repo),
                urlencoding::encode(branch)
            ))
            .await?;
        Ok(commit.id)
    }

    /// Newest pipeline for a commit, if GitLab has created one.
    pub async fn find_pipeline(&self, repo: &str, sha: &str) -> Result<Option<Pipeline>, BackendError> {
        let pipelines: Vec<Pipeline> = self
            .rest
            .get_json(&format!(
                "{}/pipelines?sha={}",
                self.project_path(repo),
                urlencoding::encode(sha)
            ))
            .await?;
        Ok(pipelines.into_iter().max_by_key(|p| p.id))
    }

    pub async fn pipeline(&self, repo: &str, id: u64) -> Result<Option<Pipeline>, BackendError> {
        self.rest
            .get_optional_json(&format!("{}/pipelines/{id}", self.project_path(repo)))
            .await
    }

    pub fn pipeline_status(&self, repo: impl Into<String>, pipeline_id: u64) -> PipelineStatus {
        PipelineStatus {
            client: self.clone(),
            repo: repo.into(),
            pipeline_id,
        }
    }
}

pub struct PipelineStatus {
    client: GitLabClient,
    repo: String,
    pipeline_id: u64,
}

impl StatusCheck for PipelineStatus {
    fn resource(&self) -> String {
        format!(
            "gitlab pipeline {}/{} #{}",
            self.client.group, self.repo, self.pipeline_id
        )
    }

    async fn check(&self) -> Result<PollOutcome, BackendError> {
        Ok(match self.client.pipeline(&self.repo, self.pipeline_id).await? {
            Some(pipeline) => pipeline_outcome(&pipeline),
            None => PollOutcome::Pending,
        })
    }
}
