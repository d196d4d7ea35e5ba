//! Tekton `PipelineRun` status, results, Chains signing and the
//! supply-chain evidence left by its tasks.

use kube::Client;
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use serde_json::Value;
use tap_common::poll::PollOutcome;
use tracing::debug;

use super::{STATUS_FALSE, STATUS_TRUE, build_api_resource, condition_field, dynamic_api, find_condition};
use crate::check::StatusCheck;
use crate::error::BackendError;

/// Label Pipelines-as-Code puts on runs it creates for a repository.
pub const PAC_REPOSITORY_LABEL: &str = "pipelinesascode.tekton.dev/repository";
/// Label carrying the triggering event type (`push`, `pull_request`, ...).
pub const PAC_EVENT_TYPE_LABEL: &str = "pipelinesascode.tekton.dev/event-type";
pub const CHAINS_SIGNED_ANNOTATION: &str = "chains.tekton.dev/signed";
/// Labels Tekton puts on every TaskRun of a pipeline.
pub const PIPELINE_RUN_LABEL: &str = "tekton.dev/pipelineRun";
pub const PIPELINE_TASK_LABEL: &str = "tekton.dev/pipelineTask";

/// Tekton condition reason for a run that finished unsuccessfully.
const REASON_FAILED: &str = "Failed";

pub fn pipeline_run_resource() -> ApiResource {
    build_api_resource("tekton.dev/v1", "PipelineRun", "pipelineruns")
}

pub fn task_run_resource() -> ApiResource {
    build_api_resource("tekton.dev/v1", "TaskRun", "taskruns")
}

/// A pipeline task whose success, and optionally one of its results, proves
/// a supply-chain property of the built image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evidence {
    pub name: &'static str,
    pub task: &'static str,
    pub result: Option<&'static str>,
}

pub const SBOM: Evidence = Evidence {
    name: "sbom",
    task: "build-container",
    result: Some("SBOM_BLOB_URL"),
};
pub const VULNERABILITY_SCAN: Evidence = Evidence {
    name: "vulnerability scan",
    task: "acs-image-scan",
    result: None,
};
pub const IMAGE_POLICY_CHECK: Evidence = Evidence {
    name: "image policy check",
    task: "acs-image-check",
    result: None,
};

/// Evidence every Tekton build is expected to leave behind.
pub const SUPPLY_CHAIN_EVIDENCE: [Evidence; 3] = [SBOM, VULNERABILITY_SCAN, IMAGE_POLICY_CHECK];

/// Map a PipelineRun (or TaskRun, which reports the same condition) onto a
/// poll outcome.
///
/// `Succeeded=True` succeeds, `Succeeded=False` with reason `Failed` fails,
/// and everything else (no condition yet, running, other false reasons) is
/// still pending.
pub fn pipeline_run_outcome(run: &DynamicObject) -> PollOutcome {
    let Some(condition) = find_condition(run, "Succeeded") else {
        return PollOutcome::Pending;
    };
    match condition_field(condition, "status") {
        Some(STATUS_TRUE) => PollOutcome::Succeeded,
        Some(STATUS_FALSE) if condition_field(condition, "reason") == Some(REASON_FAILED) => {
            let message = condition_field(condition, "message").unwrap_or(REASON_FAILED);
            PollOutcome::failed(message)
        }
        _ => PollOutcome::Pending,
    }
}

/// Value of a named entry in `status.results` (`IMAGE_URL`, `IMAGE_DIGEST`).
/// TaskRuns use the same layout.
pub fn pipeline_run_result<'a>(run: &'a DynamicObject, name: &str) -> Option<&'a str> {
    run.data
        .get("status")?
        .get("results")?
        .as_array()?
        .iter()
        .find(|r| r.get("name").and_then(Value::as_str) == Some(name))?
        .get("value")?
        .as_str()
}

fn creation_key(run: &DynamicObject) -> Option<String> {
    run.metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0.to_string())
}

/// Judge `evidence` from the TaskRuns that executed its task; the newest one
/// counts when the task was retried. Only called once the pipeline finished,
/// so a task that never ran is a failure.
pub fn evidence_outcome(evidence: &Evidence, task_runs: &[DynamicObject]) -> PollOutcome {
    let Some(task_run) = task_runs.iter().max_by_key(|run| creation_key(run)) else {
        return PollOutcome::failed(format!("pipeline never ran task {}", evidence.task));
    };
    match pipeline_run_outcome(task_run) {
        PollOutcome::Succeeded => {}
        other => return other,
    }
    match evidence.result {
        Some(result) if pipeline_run_result(task_run, result).is_none_or(str::is_empty) => {
            PollOutcome::failed(format!("task {} did not publish {result}", evidence.task))
        }
        _ => PollOutcome::Succeeded,
    }
}

/// Identity of a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRunRef {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for PipelineRunRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pipelinerun {}/{}", self.namespace, self.name)
    }
}

#[derive(Clone)]
pub struct PipelineRuns {
    client: Client,
    namespace: String,
    resource: ApiResource,
    task_resource: ApiResource,
}

impl PipelineRuns {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            resource: pipeline_run_resource(),
            task_resource: task_run_resource(),
        }
    }

    fn api(&self) -> Api<DynamicObject> {
        dynamic_api(&self.client, &self.namespace, &self.resource)
    }

    pub async fn get(&self, name: &str) -> Result<Option<DynamicObject>, BackendError> {
        self.api()
            .get_opt(name)
            .await
            .map_err(|e| BackendError::kube(self.describe(name), e))
    }

    /// Newest run created by Pipelines-as-Code for `repository` and `event_type`.
    pub async fn latest_for_repository(
        &self,
        repository: &str,
        event_type: &str,
    ) -> Result<Option<PipelineRunRef>, BackendError> {
        let selector =
            format!("{PAC_REPOSITORY_LABEL}={repository},{PAC_EVENT_TYPE_LABEL}={event_type}");
        let list = self
            .api()
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| BackendError::kube(format!("pipelineruns {selector}"), e))?;
        debug!(selector, count = list.items.len(), "Listed pipeline runs");

        let newest = list
            .items
            .into_iter()
            .max_by_key(creation_key)
            .and_then(|run| run.metadata.name);
        Ok(newest.map(|name| PipelineRunRef {
            namespace: self.namespace.clone(),
            name,
        }))
    }

    /// TaskRuns that executed pipeline task `task` of the run `run`.
    pub async fn task_runs(&self, run: &str, task: &str) -> Result<Vec<DynamicObject>, BackendError> {
        let selector = format!("{PIPELINE_RUN_LABEL}={run},{PIPELINE_TASK_LABEL}={task}");
        let list = dynamic_api(&self.client, &self.namespace, &self.task_resource)
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| BackendError::kube(format!("taskruns {selector}"), e))?;
        debug!(selector, count = list.items.len(), "Listed task runs");
        Ok(list.items)
    }

    pub fn status(&self, name: impl Into<String>) -> PipelineRunStatus {
        PipelineRunStatus {
            runs: self.clone(),
            name: name.into(),
        }
    }

    pub fn signature(&self, name: impl Into<String>) -> ChainsSignature {
        ChainsSignature {
            runs: self.clone(),
            name: name.into(),
        }
    }

    pub fn evidence(&self, name: impl Into<String>, evidence: Evidence) -> SupplyChainEvidence {
        SupplyChainEvidence {
            runs: self.clone(),
            name: name.into(),
            evidence,
        }
    }

    fn describe(&self, name: &str) -> String {
        PipelineRunRef {
            namespace: self.namespace.clone(),
            name: name.to_string(),
        }
        .to_string()
    }
}

/// Completion of a single PipelineRun. A missing run is pending, since
/// Pipelines-as-Code creates it asynchronously after the push.
pub struct PipelineRunStatus {
    runs: PipelineRuns,
    name: String,
}

impl StatusCheck for PipelineRunStatus {
    fn resource(&self) -> String {
        self.runs.describe(&self.name)
    }

    async fn check(&self) -> Result<PollOutcome, BackendError> {
        Ok(match self.runs.get(&self.name).await? {
            Some(run) => pipeline_run_outcome(&run),
            None => PollOutcome::Pending,
        })
    }
}

/// Tekton Chains signing state from the run's annotations.
pub fn signature_outcome(run: &DynamicObject) -> PollOutcome {
    let signed = run
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(CHAINS_SIGNED_ANNOTATION))
        .map(String::as_str);
    match signed {
        Some("true") => PollOutcome::Succeeded,
        Some("failed") => PollOutcome::failed("tekton chains failed to sign the pipeline run"),
        _ => PollOutcome::Pending,
    }
}

pub struct ChainsSignature {
    runs: PipelineRuns,
    name: String,
}

impl StatusCheck for ChainsSignature {
    fn resource(&self) -> String {
        format!("chains signature of {}", self.runs.describe(&self.name))
    }

    async fn check(&self) -> Result<PollOutcome, BackendError> {
        Ok(match self.runs.get(&self.name).await? {
            Some(run) => signature_outcome(&run),
            None => PollOutcome::Pending,
        })
    }
}

pub struct SupplyChainEvidence {
    runs: PipelineRuns,
    name: String,
    evidence: Evidence,
}

impl StatusCheck for SupplyChainEvidence {
    fn resource(&self) -> String {
        format!("{} of {}", self.evidence.name, self.runs.describe(&self.name))
    }

    async fn check(&self) -> Result<PollOutcome, BackendError> {
        let task_runs = self.runs.task_runs(&self.name, self.evidence.task).await?;
        Ok(evidence_outcome(&self.evidence, &task_runs))
    }
}
