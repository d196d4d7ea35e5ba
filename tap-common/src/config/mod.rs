//! Configuration for the end-to-end suite.
//!
//! All settings are read once at process start into [`E2eConfig`] and passed
//! down explicitly. Invalid values are collected and reported together;
//! providers a scenario needs but that are not configured fail at scenario
//! setup with [`ConfigError::MissingProvider`].

pub mod env;
pub mod source;

pub use env::{ENV_PREFIX, EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::poll::PollConfig;

pub const DEFAULT_ARGOCD_NAMESPACE: &str = "tssc-gitops";
pub const DEFAULT_TEMPLATE: &str = "go";
pub const DEFAULT_IMAGE_REGISTRY: &str = "quay.io";
pub const DEFAULT_IMAGE_ORG: &str = "tap-e2e";
pub const DEFAULT_WORKERS: u32 = 2;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 15 * 60;

pub const MAX_WORKERS: u32 = 16;
pub const MAX_SCENARIO_RETRIES: u32 = 5;
/// Accepted worker counts, from the environment and the command line alike.
pub const WORKER_RANGE: RangeInclusive<u32> = 1..=MAX_WORKERS;
/// Accepted whole-scenario retry counts.
pub const RETRY_RANGE: RangeInclusive<u32> = 0..=MAX_SCENARIO_RETRIES;

/// Configuration errors. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {}", join_errors(.0))]
    Invalid(Vec<EnvError>),

    #[error("{provider} is not configured (set {hint})")]
    MissingProvider {
        provider: &'static str,
        hint: &'static str,
    },
}

fn join_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A credential. `Debug` and `Display` never print the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Log-safe rendering (see [`mask_secret`](crate::logging::mask_secret)).
    pub fn masked(&self) -> String {
        crate::logging::mask_secret(&self.0)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone)]
pub struct DeveloperHubSettings {
    pub url: String,
    pub token: Option<Secret>,
}

#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub api_url: String,
    pub token: Secret,
    pub organization: String,
}

#[derive(Debug, Clone)]
pub struct GitLabSettings {
    pub url: String,
    pub token: Secret,
    pub group: String,
}

#[derive(Debug, Clone)]
pub struct BitbucketSettings {
    pub api_url: String,
    pub username: String,
    pub app_password: Secret,
    pub workspace: String,
    pub project: String,
}

#[derive(Debug, Clone)]
pub struct JenkinsSettings {
    pub url: String,
    pub username: String,
    pub token: Secret,
}

#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub registry: String,
    pub organization: String,
}

/// One resolved setting, for `check-config` style reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub source: ConfigSource,
}

/// Command-line values that take precedence over the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub workers: Option<u32>,
    pub retries: Option<u32>,
    pub cleanup: Option<bool>,
}

/// Fully resolved suite configuration.
#[derive(Debug, Clone)]
pub struct E2eConfig {
    pub developer_hub: DeveloperHubSettings,
    /// Namespace where pipeline runs execute.
    pub namespace: String,
    /// Namespace holding ArgoCD `Application` resources.
    pub argocd_namespace: String,
    pub kubeconfig: Option<PathBuf>,
    /// Scaffolder template used by the built-in scenarios.
    pub template: String,
    pub github: Option<GitHubSettings>,
    pub gitlab: Option<GitLabSettings>,
    pub bitbucket: Option<BitbucketSettings>,
    pub jenkins: Option<JenkinsSettings>,
    pub image: ImageSettings,
    /// Delete remote repositories and applications after each scenario.
    pub cleanup: bool,
    pub poll: PollConfig,
    /// Extra whole-scenario attempts after a failure.
    pub scenario_retries: u32,
    /// Scenarios allowed to run concurrently.
    pub workers: u32,
    /// Scenario names selected through the environment (empty = all).
    pub scenarios: Vec<String>,
    entries: Vec<ConfigEntry>,
}

impl E2eConfig {
    /// Defaults everywhere, no git or CI providers configured.
    pub fn new(developer_hub_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            developer_hub: DeveloperHubSettings {
                url: developer_hub_url.into(),
                token: None,
            },
            namespace: namespace.into(),
            argocd_namespace: DEFAULT_ARGOCD_NAMESPACE.to_string(),
            kubeconfig: None,
            template: DEFAULT_TEMPLATE.to_string(),
            github: None,
            gitlab: None,
            bitbucket: None,
            jenkins: None,
            image: ImageSettings {
                registry: DEFAULT_IMAGE_REGISTRY.to_string(),
                organization: DEFAULT_IMAGE_ORG.to_string(),
            },
            cleanup: false,
            poll: PollConfig::new(
                Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
                Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
            ),
            scenario_retries: 0,
            workers: DEFAULT_WORKERS,
            scenarios: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Resolve configuration from `TAP_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_parser(&mut EnvParser::new())
    }

    /// Resolve configuration through an existing parser (custom prefix in tests).
    pub fn from_parser(env: &mut EnvParser) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        let mut record = |key: &str, value: String, source: ConfigSource| {
            entries.push(ConfigEntry {
                key: key.to_string(),
                value,
                source,
            });
        };

        let hub_url = env.url("DEVELOPER_HUB_URL", None);
        record("developer_hub.url", hub_url.value.clone(), hub_url.source);
        let hub_token = env.secret("DEVELOPER_HUB_TOKEN");
        record(
            "developer_hub.token",
            hub_token
                .value
                .as_ref()
                .map_or_else(|| "unset".to_string(), Secret::masked),
            hub_token.source,
        );
        let developer_hub = DeveloperHubSettings {
            url: hub_url.value,
            token: hub_token.value,
        };

        let namespace = env.required("NAMESPACE");
        record("namespace", namespace.value.clone(), namespace.source);
        let argocd_namespace = env.string("ARGOCD_NAMESPACE", DEFAULT_ARGOCD_NAMESPACE);
        record(
            "argocd_namespace",
            argocd_namespace.value.clone(),
            argocd_namespace.source,
        );
        let kubeconfig = env.path("KUBECONFIG", true);
        let template = env.string("TEMPLATE", DEFAULT_TEMPLATE);
        record("template", template.value.clone(), template.source);

        let github = env.secret("GITHUB_TOKEN").value.map(|token| {
            let organization = env.required("GITHUB_ORG");
            record("github.organization", organization.value.clone(), organization.source);
            GitHubSettings {
                api_url: env.url("GITHUB_API_URL", Some("https://api.github.com")).value,
                token,
                organization: organization.value,
            }
        });

        let gitlab = env.secret("GITLAB_TOKEN").value.map(|token| {
            let group = env.required("GITLAB_GROUP");
            record("gitlab.group", group.value.clone(), group.source);
            GitLabSettings {
                url: env.url("GITLAB_URL", Some("https://gitlab.com")).value,
                token,
                group: group.value,
            }
        });

        let bitbucket = env.secret("BITBUCKET_APP_PASSWORD").value.map(|app_password| {
            let workspace = env.required("BITBUCKET_WORKSPACE");
            record("bitbucket.workspace", workspace.value.clone(), workspace.source);
            BitbucketSettings {
                api_url: env
                    .url("BITBUCKET_API_URL", Some("https://api.bitbucket.org/2.0"))
                    .value,
                username: env.required("BITBUCKET_USERNAME").value,
                app_password,
                workspace: workspace.value,
                project: env.string("BITBUCKET_PROJECT", "TAP").value,
            }
        });

        let jenkins = env.secret("JENKINS_TOKEN").value.map(|token| {
            let url = env.url("JENKINS_URL", None);
            record("jenkins.url", url.value.clone(), url.source);
            JenkinsSettings {
                url: url.value,
                username: env.required("JENKINS_USERNAME").value,
                token,
            }
        });

        let image = ImageSettings {
            registry: env.string("IMAGE_REGISTRY", DEFAULT_IMAGE_REGISTRY).value,
            organization: env.string("IMAGE_ORG", DEFAULT_IMAGE_ORG).value,
        };

        let cleanup = env.flag("CLEANUP", false);
        record("cleanup", cleanup.value.to_string(), cleanup.source);

        let interval = env.seconds("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS, 1..=600);
        let timeout = env.seconds("POLL_TIMEOUT_SECS", DEFAULT_POLL_TIMEOUT_SECS, 0..=4 * 60 * 60);
        record(
            "poll.interval_secs",
            interval.value.as_secs().to_string(),
            interval.source,
        );
        record(
            "poll.timeout_secs",
            timeout.value.as_secs().to_string(),
            timeout.source,
        );
        let poll = PollConfig::new(interval.value, timeout.value);

        let scenario_retries = env.range("SCENARIO_RETRIES", 0, RETRY_RANGE);
        let workers = env.range("WORKERS", DEFAULT_WORKERS, WORKER_RANGE);
        let log_level = env.log_level("LOG_LEVEL", "info");
        let scenarios = env.list("SCENARIOS");
        record(
            "scenario_retries",
            scenario_retries.value.to_string(),
            scenario_retries.source,
        );
        record("workers", workers.value.to_string(), workers.source);
        record("log_level", log_level.value, log_level.source);

        env.finish().map_err(ConfigError::Invalid)?;

        for (key, configured) in [
            ("github", github.is_some()),
            ("gitlab", gitlab.is_some()),
            ("bitbucket", bitbucket.is_some()),
            ("jenkins", jenkins.is_some()),
        ] {
            record(
                key,
                if configured { "configured" } else { "not configured" }.to_string(),
                if configured {
                    ConfigSource::Environment
                } else {
                    ConfigSource::Default
                },
            );
        }

        Ok(Self {
            developer_hub,
            namespace: namespace.value,
            argocd_namespace: argocd_namespace.value,
            kubeconfig: kubeconfig.value,
            template: template.value,
            github,
            gitlab,
            bitbucket,
            jenkins,
            image,
            cleanup: cleanup.value,
            poll,
            scenario_retries: scenario_retries.value,
            workers: workers.value,
            scenarios: scenarios.value,
            entries,
        })
    }

    /// Resolved settings with their sources. Secrets are not included.
    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Apply command-line values, recording them as such in [`entries`](Self::entries).
    pub fn apply_overrides(&mut self, overrides: RunOverrides) {
        if let Some(workers) = overrides.workers.map(Sourced::from_cli) {
            self.set_entry("workers", &workers);
            self.workers = workers.value;
        }
        if let Some(retries) = overrides.retries.map(Sourced::from_cli) {
            self.set_entry("scenario_retries", &retries);
            self.scenario_retries = retries.value;
        }
        if let Some(cleanup) = overrides.cleanup.map(Sourced::from_cli) {
            self.set_entry("cleanup", &cleanup);
            self.cleanup = cleanup.value;
        }
    }

    fn set_entry<T: fmt::Display>(&mut self, key: &str, value: &Sourced<T>) {
        let entry = ConfigEntry {
            key: key.to_string(),
            value: value.value.to_string(),
            source: value.source,
        };
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn github(&self) -> Result<&GitHubSettings, ConfigError> {
        self.github.as_ref().ok_or(ConfigError::MissingProvider {
            provider: "GitHub",
            hint: "TAP_GITHUB_TOKEN and TAP_GITHUB_ORG",
        })
    }

    pub fn gitlab(&self) -> Result<&GitLabSettings, ConfigError> {
        self.gitlab.as_ref().ok_or(ConfigError::MissingProvider {
            provider: "GitLab",
            hint: "TAP_GITLAB_TOKEN and TAP_GITLAB_GROUP",
        })
    }

    pub fn bitbucket(&self) -> Result<&BitbucketSettings, ConfigError> {
        self.bitbucket.as_ref().ok_or(ConfigError::MissingProvider {
            provider: "Bitbucket",
            hint: "TAP_BITBUCKET_APP_PASSWORD, TAP_BITBUCKET_USERNAME and TAP_BITBUCKET_WORKSPACE",
        })
    }

    pub fn jenkins(&self) -> Result<&JenkinsSettings, ConfigError> {
        self.jenkins.as_ref().ok_or(ConfigError::MissingProvider {
            provider: "Jenkins",
            hint: "TAP_JENKINS_URL, TAP_JENKINS_USERNAME and TAP_JENKINS_TOKEN",
        })
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;

    const PREFIX: &str = "TAPCFG_";

    fn set_env(key: &str, value: &str) {
        // SAFETY: serialized via #[serial], no concurrent access to env vars
        unsafe { std::env::set_var(format!("{PREFIX}{key}"), value) };
    }

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with(PREFIX) {
                // SAFETY: serialized via #[serial], no concurrent access to env vars
                unsafe { std::env::remove_var(key) };
            }
        }
    }

    fn parse() -> Result<E2eConfig, ConfigError> {
        E2eConfig::from_parser(&mut EnvParser::with_prefix(PREFIX))
    }

    #[test]
    #[serial]
    fn test_minimal_config_uses_defaults() {
        clear_env();
        set_env("DEVELOPER_HUB_URL", "https://hub.example.com/");
        set_env("NAMESPACE", "tap-app-ci");

        let config = parse().unwrap();
        assert_eq!(config.developer_hub.url, "https://hub.example.com");
        assert_eq!(config.argocd_namespace, "tssc-gitops");
        assert_eq!(config.poll.interval, Duration::from_secs(10));
        assert_eq!(config.poll.timeout, Duration::from_secs(900));
        assert_eq!(config.workers, 2);
        assert!(!config.cleanup);
        assert!(config.github.is_none());
        assert!(matches!(
            config.github(),
            Err(ConfigError::MissingProvider { provider: "GitHub", .. })
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_required_values_reported_together() {
        clear_env();
        set_env("WORKERS", "99");

        let err = parse().unwrap_err();
        let ConfigError::Invalid(errors) = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(errors.len(), 3);
        let message = err.to_string();
        assert!(message.contains("TAPCFG_DEVELOPER_HUB_URL"));
        assert!(message.contains("TAPCFG_NAMESPACE"));
        assert!(message.contains("TAPCFG_WORKERS"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_partial_provider_config_is_invalid() {
        clear_env();
        set_env("DEVELOPER_HUB_URL", "https://hub");
        set_env("NAMESPACE", "ns");
        set_env("GITHUB_TOKEN", "ghp_secret");

        let err = parse().unwrap_err();
        assert!(err.to_string().contains("TAPCFG_GITHUB_ORG"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_provider_settings_and_zero_timeout() {
        clear_env();
        set_env("DEVELOPER_HUB_URL", "https://hub");
        set_env("NAMESPACE", "ns");
        set_env("GITLAB_TOKEN", "glpat-secret");
        set_env("GITLAB_GROUP", "tap-e2e");
        set_env("GITLAB_URL", "https://gitlab.internal/");
        set_env("POLL_TIMEOUT_SECS", "0");
        set_env("CLEANUP", "true");

        let config = parse().unwrap();
        let gitlab = config.gitlab().unwrap();
        assert_eq!(gitlab.url, "https://gitlab.internal");
        assert_eq!(gitlab.token.expose(), "glpat-secret");
        assert!(config.poll.is_unbounded());
        assert!(config.cleanup);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_entries_never_contain_secrets() {
        clear_env();
        set_env("DEVELOPER_HUB_URL", "https://hub");
        set_env("NAMESPACE", "ns");
        set_env("JENKINS_TOKEN", "jenkins-api-token");
        set_env("JENKINS_URL", "https://jenkins");
        set_env("JENKINS_USERNAME", "bot");

        let config = parse().unwrap();
        let rendered = format!("{config:?} {:?}", config.entries());
        assert!(!rendered.contains("jenkins-api-token"));
        assert!(
            config
                .entries()
                .iter()
                .any(|e| e.key == "jenkins" && e.value == "configured")
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_command_line_overrides_are_recorded() {
        clear_env();
        set_env("DEVELOPER_HUB_URL", "https://hub");
        set_env("NAMESPACE", "ns");
        set_env("WORKERS", "4");

        let mut config = parse().unwrap();
        config.apply_overrides(RunOverrides {
            workers: Some(8),
            retries: None,
            cleanup: Some(true),
        });

        assert_eq!(config.workers, 8);
        assert_eq!(config.scenario_retries, 0);
        assert!(config.cleanup);
        let entry = |key: &str| config.entries().iter().find(|e| e.key == key).unwrap().clone();
        assert_eq!(entry("workers").value, "8");
        assert_eq!(entry("workers").source, ConfigSource::CommandLine);
        assert_eq!(entry("cleanup").source, ConfigSource::CommandLine);
        assert_eq!(entry("scenario_retries").source, ConfigSource::Default);
        assert_eq!(
            config.entries().iter().filter(|e| e.key == "workers").count(),
            1
        );
        assert_eq!(entry("log_level").value, "info");
        clear_env();
    }

    #[test]
    fn test_programmatic_config_matches_env_defaults() {
        let config = E2eConfig::new("https://hub", "ns");
        assert_eq!(config.argocd_namespace, DEFAULT_ARGOCD_NAMESPACE);
        assert_eq!(config.template, "go");
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert!(WORKER_RANGE.contains(&config.workers));
        assert_eq!(config.poll.timeout, Duration::from_secs(900));
        assert!(config.github().is_err());
        assert!(config.entries().is_empty());
    }

    #[test]
    fn test_secret_formatting() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret}"), "***");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        assert_eq!(secret.expose(), "hunter2");
    }
}
