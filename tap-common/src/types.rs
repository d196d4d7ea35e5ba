//! Identifiers shared by backends and scenarios.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unknown value for one of the provider/environment enums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}' (expected one of: {expected})")]
pub struct ParseKindError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Git hosting provider that holds source and GitOps repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitProvider {
    GitHub,
    GitLab,
    Bitbucket,
}

impl GitProvider {
    pub const ALL: [GitProvider; 3] = [Self::GitHub, Self::GitLab, Self::Bitbucket];

    /// Value the scaffolder templates expect for `hostType`.
    pub fn scaffolder_host_type(&self) -> &'static str {
        match self {
            Self::GitHub => "GitHub",
            Self::GitLab => "GitLab",
            Self::Bitbucket => "Bitbucket",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::Bitbucket => "bitbucket",
        }
    }
}

impl fmt::Display for GitProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GitProvider {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "gitlab" => Ok(Self::GitLab),
            "bitbucket" => Ok(Self::Bitbucket),
            _ => Err(ParseKindError {
                kind: "git provider",
                value: s.to_string(),
                expected: "github, gitlab, bitbucket",
            }),
        }
    }
}

/// CI system that builds the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiProvider {
    /// Tekton pipelines triggered through Pipelines-as-Code.
    Tekton,
    Jenkins,
    GitLabCi,
    GitHubActions,
}

impl CiProvider {
    /// Value the scaffolder templates expect for `ciType`.
    pub fn scaffolder_ci_type(&self) -> &'static str {
        match self {
            Self::Tekton => "tekton",
            Self::Jenkins => "jenkins",
            Self::GitLabCi => "gitlabci",
            Self::GitHubActions => "githubactions",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.scaffolder_ci_type()
    }

    /// Whether this CI can run against repositories on `git`.
    pub fn supports(&self, git: GitProvider) -> bool {
        match self {
            Self::Tekton | Self::Jenkins => true,
            Self::GitLabCi => git == GitProvider::GitLab,
            Self::GitHubActions => git == GitProvider::GitHub,
        }
    }
}

impl fmt::Display for CiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CiProvider {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "tekton" => Ok(Self::Tekton),
            "jenkins" => Ok(Self::Jenkins),
            "gitlabci" => Ok(Self::GitLabCi),
            "githubactions" | "actions" => Ok(Self::GitHubActions),
            _ => Err(ParseKindError {
                kind: "ci provider",
                value: s.to_string(),
                expected: "tekton, jenkins, gitlabci, githubactions",
            }),
        }
    }
}

/// GitOps deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Stage,
    Prod,
}

impl Environment {
    pub const ALL: [Environment; 3] = [Self::Development, Self::Stage, Self::Prod];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Stage => "stage",
            Self::Prod => "prod",
        }
    }

    /// The environment an image is promoted to from this one.
    pub fn next(&self) -> Option<Environment> {
        match self {
            Self::Development => Some(Self::Stage),
            Self::Stage => Some(Self::Prod),
            Self::Prod => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "stage" | "staging" => Ok(Self::Stage),
            "prod" | "production" => Ok(Self::Prod),
            _ => Err(ParseKindError {
                kind: "environment",
                value: s.to_string(),
                expected: "development, stage, prod",
            }),
        }
    }
}

/// Randomized, DNS-label-safe component name: `<prefix>-<6 lowercase chars>`.
///
/// Remote resources are owned by the scenario that created them; the random
/// suffix is what keeps concurrent runs from colliding.
pub fn unique_component_name(prefix: &str) -> String {
    let suffix: String = std::iter::repeat_with(fastrand::lowercase)
        .take(6)
        .collect();
    let prefix: String = prefix
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let prefix = prefix.trim_matches('-');
    // Leave room for "-gitops" and environment suffixes within 63 chars.
    let prefix: String = prefix.chars().take(40).collect();
    if prefix.is_empty() {
        suffix
    } else {
        format!("{prefix}-{suffix}")
    }
}
