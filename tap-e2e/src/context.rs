//! Explicit per-attempt scenario state.

use std::fmt;

use serde::Serialize;
use tap_common::types::{CiProvider, Environment, GitProvider, unique_component_name};

use crate::scenario::Scenario;

/// A CI run a step waits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildRef {
    PipelineRun { namespace: String, name: String },
    Jenkins { job: String, number: u64 },
    GitLab { project: String, pipeline_id: u64 },
    GitHubActions { owner: String, repo: String, run_id: u64 },
}

impl fmt::Display for BuildRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PipelineRun { namespace, name } => write!(f, "pipelinerun {namespace}/{name}"),
            Self::Jenkins { job, number } => write!(f, "jenkins job {job} #{number}"),
            Self::GitLab {
                project,
                pipeline_id,
            } => write!(f, "gitlab pipeline {project} #{pipeline_id}"),
            Self::GitHubActions {
                owner,
                repo,
                run_id,
            } => write!(f, "github actions run {owner}/{repo} #{run_id}"),
        }
    }
}

/// Remote objects a scenario created and owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum CreatedResource {
    Repository(String),
    Application(String),
    JenkinsJob(String),
}

/// State threaded through the steps of one scenario attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioContext {
    pub scenario: String,
    pub attempt: u32,
    pub git: GitProvider,
    pub ci: CiProvider,
    pub template: String,
    pub component: String,
    pub task_id: Option<String>,
    /// Last commit pushed to the source repository.
    pub commit_sha: Option<String>,
    pub build: Option<BuildRef>,
    /// Image produced by the last successful build or promotion.
    pub image: Option<String>,
    pub verified: Vec<Environment>,
    pub created: Vec<CreatedResource>,
}

impl ScenarioContext {
    pub fn new(scenario: &Scenario, attempt: u32) -> Self {
        Self::with_component(scenario, attempt, unique_component_name(&scenario.name_prefix()))
    }

    pub fn with_component(scenario: &Scenario, attempt: u32, component: impl Into<String>) -> Self {
        Self {
            scenario: scenario.name.clone(),
            attempt,
            git: scenario.git,
            ci: scenario.ci,
            template: scenario.template.clone(),
            component: component.into(),
            task_id: None,
            commit_sha: None,
            build: None,
            image: None,
            verified: Vec::new(),
            created: Vec::new(),
        }
    }

    pub fn source_repo(&self) -> &str {
        &self.component
    }

    pub fn gitops_repo(&self) -> String {
        format!("{}-gitops", self.component)
    }

    /// Record an owned resource once.
    pub fn track(&mut self, resource: CreatedResource) {
        if !self.created.contains(&resource) {
            self.created.push(resource);
        }
    }

    pub fn require_build(&self) -> Result<&BuildRef, crate::error::StepError> {
        self.build
            .as_ref()
            .ok_or_else(|| crate::error::StepError::assertion("no build has been recorded yet"))
    }

    pub fn require_commit(&self) -> Result<&str, crate::error::StepError> {
        self.commit_sha
            .as_deref()
            .ok_or_else(|| crate::error::StepError::assertion("no commit has been pushed yet"))
    }
}
