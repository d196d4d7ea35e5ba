//! Jenkins job triggering and build status.

use serde::Deserialize;
use tap_common::config::JenkinsSettings;
use tap_common::poll::PollOutcome;
use tracing::info;

use crate::check::StatusCheck;
use crate::client::{Auth, RestClient};
use crate::error::BackendError;

const RESULT_SUCCESS: &str = "SUCCESS";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub next_build_number: u64,
    #[serde(default)]
    pub in_queue: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildInfo {
    pub number: u64,
    #[serde(default)]
    pub building: bool,
    /// `null` until the build finishes.
    pub result: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Map a build record onto a poll outcome.
pub fn build_outcome(build: &BuildInfo) -> PollOutcome {
    if build.building {
        return PollOutcome::Pending;
    }
    match build.result.as_deref() {
        None => PollOutcome::Pending,
        Some(RESULT_SUCCESS) => PollOutcome::Succeeded,
        Some(other) => PollOutcome::failed(other),
    }
}

/// URL path of a job. Folder jobs (`team/app`) nest as `/job/team/job/app`.
pub fn job_path(job: &str) -> String {
    job.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| format!("/job/{}", urlencoding::encode(segment)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct JenkinsClient {
    rest: RestClient,
}

impl JenkinsClient {
    pub fn new(settings: &JenkinsSettings) -> Result<Self, BackendError> {
        let auth = Auth::Basic {
            username: settings.username.clone(),
            password: settings.token.clone(),
        };
        Ok(Self::from_rest(RestClient::new(&settings.url, auth)?))
    }

    pub fn from_rest(rest: RestClient) -> Self {
        Self { rest }
    }

    pub async fn job(&self, job: &str) -> Result<Option<JobInfo>, BackendError> {
        self.rest
            .get_optional_json(&format!("{}/api/json", job_path(job)))
            .await
    }

    pub async fn build(&self, job: &str, number: u64) -> Result<Option<BuildInfo>, BackendError> {
        self.rest
            .get_optional_json(&format!("{}/{number}/api/json", job_path(job)))
            .await
    }

    /// Queue a build and return the number it will get.
    pub async fn trigger(&self, job: &str) -> Result<u64, BackendError> {
        let info = self.job(job).await?.ok_or_else(|| {
            BackendError::Precondition(format!("jenkins job {job} does not exist"))
        })?;
        self.rest
            .post_empty(&format!("{}/build", job_path(job)))
            .await?;
        info!(job, number = info.next_build_number, "Triggered Jenkins build");
        Ok(info.next_build_number)
    }

    /// Delete a job. Returns `false` if it did not exist.
    pub async fn delete_job(&self, job: &str) -> Result<bool, BackendError> {
        match self
            .rest
            .post_empty(&format!("{}/doDelete", job_path(job)))
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn build_status(&self, job: impl Into<String>, number: u64) -> JenkinsBuild {
        JenkinsBuild {
            client: self.clone(),
            job: job.into(),
            number,
        }
    }
}

/// Completion of one Jenkins build. A 404 right after triggering means the
/// build is still in the queue, so it counts as pending.
pub struct JenkinsBuild {
    client: JenkinsClient,
    job: String,
    number: u64,
}

impl StatusCheck for JenkinsBuild {
    fn resource(&self) -> String {
        format!("jenkins job {} #{}", self.job, self.number)
    }

    async fn check(&self) -> Result<PollOutcome, BackendError> {
        Ok(match self.client.build(&self.job, self.number).await? {
            Some(build) => build_outcome(&build),
            None => PollOutcome::Pending,
        })
    }
}
