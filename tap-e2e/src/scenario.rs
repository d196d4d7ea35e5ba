//! Scenario scripts: fixed, linear step sequences.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tap_common::types::{CiProvider, Environment, GitProvider};

/// Delay after pushing a commit before looking for the build it triggers.
pub const BUILD_REGISTRATION_DELAY: Duration = Duration::from_secs(5);

pub const DEFAULT_TEMPLATE: &str = "go";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Create the component through the scaffolder and wait for the task.
    Scaffold,
    /// Wait for the source and GitOps repositories and the catalog entry.
    VerifyRepositories,
    /// Wait for the on-push pipeline run created by scaffolding.
    WaitForInitialBuild,
    /// Push a commit (or queue a Jenkins build).
    TriggerBuild,
    /// Fixed debounce delay.
    Settle {
        #[serde(with = "duration_ms")]
        duration: Duration,
    },
    WaitForBuild,
    /// Wait for Tekton Chains to sign the last run.
    VerifySignature,
    /// Check the SBOM and image scan tasks of the last run.
    VerifySupplyChain,
    VerifyDeployment { environment: Environment },
    Promote { from: Environment, to: Environment },
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}

impl Step {
    pub fn settle(duration: Duration) -> Self {
        Self::Settle { duration }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scaffold => f.write_str("scaffold"),
            Self::VerifyRepositories => f.write_str("verify-repositories"),
            Self::WaitForInitialBuild => f.write_str("wait-for-initial-build"),
            Self::TriggerBuild => f.write_str("trigger-build"),
            Self::Settle { duration } => {
                write!(f, "settle({})", humantime::format_duration(*duration))
            }
            Self::WaitForBuild => f.write_str("wait-for-build"),
            Self::VerifySignature => f.write_str("verify-signature"),
            Self::VerifySupplyChain => f.write_str("verify-supply-chain"),
            Self::VerifyDeployment { environment } => write!(f, "verify-deployment({environment})"),
            Self::Promote { from, to } => write!(f, "promote({from}->{to})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub name: String,
    pub git: GitProvider,
    pub ci: CiProvider,
    pub template: String,
    pub steps: Vec<Step>,
    /// Overrides the runner's retry count when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

fn ci_slug(ci: CiProvider) -> &'static str {
    match ci {
        CiProvider::GitHubActions => "actions",
        other => other.as_str(),
    }
}

impl Scenario {
    /// The standard script for a git/CI pairing.
    pub fn standard(git: GitProvider, ci: CiProvider, template: impl Into<String>) -> Self {
        let mut steps = vec![Step::Scaffold, Step::VerifyRepositories];
        if ci == CiProvider::Tekton {
            steps.push(Step::WaitForInitialBuild);
        }
        steps.push(Step::TriggerBuild);
        steps.push(Step::settle(BUILD_REGISTRATION_DELAY));
        steps.push(Step::WaitForBuild);
        if ci == CiProvider::Tekton {
            steps.push(Step::VerifySignature);
            steps.push(Step::VerifySupplyChain);
        }
        steps.push(Step::VerifyDeployment {
            environment: Environment::Development,
        });
        steps.push(Step::Promote {
            from: Environment::Development,
            to: Environment::Stage,
        });
        steps.push(Step::VerifyDeployment {
            environment: Environment::Stage,
        });

        Self {
            name: format!("{git}-{}", ci_slug(ci)),
            git,
            ci,
            template: template.into(),
            steps,
            retries: None,
        }
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Short prefix for randomized component names.
    pub fn name_prefix(&self) -> String {
        format!("e2e-{}", self.template)
    }
}

/// Built-in scenarios, one per supported git/CI pairing.
pub fn catalog(template: &str) -> Vec<Scenario> {
    [
        (GitProvider::GitHub, CiProvider::Tekton),
        (GitProvider::GitLab, CiProvider::Tekton),
        (GitProvider::Bitbucket, CiProvider::Tekton),
        (GitProvider::GitHub, CiProvider::Jenkins),
        (GitProvider::GitLab, CiProvider::GitLabCi),
        (GitProvider::GitHub, CiProvider::GitHubActions),
    ]
    .into_iter()
    .map(|(git, ci)| Scenario::standard(git, ci, template))
    .collect()
}

/// Pick scenarios by name; an empty selection means all of them.
pub fn select(catalog: Vec<Scenario>, names: &[String]) -> Result<Vec<Scenario>, String> {
    if names.is_empty() {
        return Ok(catalog);
    }
    let unknown: Vec<&str> = names
        .iter()
        .filter(|name| !catalog.iter().any(|s| &s.name == *name))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        let known: Vec<&str> = catalog.iter().map(|s| s.name.as_str()).collect();
        return Err(format!(
            "unknown scenario(s): {} (available: {})",
            unknown.join(", "),
            known.join(", ")
        ));
    }
    Ok(catalog
        .into_iter()
        .filter(|s| names.contains(&s.name))
        .collect())
}
