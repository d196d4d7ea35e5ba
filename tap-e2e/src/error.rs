//! Step failure taxonomy.

use std::time::Duration;

use tap_backends::BackendError;
use tap_common::config::ConfigError;
use tap_common::poll::{PollError, PollOutcome};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepError {
    /// The resource never reached a final state.
    #[error("{resource} did not finish within {} ({attempts} checks){}",
        humantime::format_duration(*elapsed),
        last_error.as_ref().map(|e| format!(", last error: {e}")).unwrap_or_default())]
    TimedOut {
        resource: String,
        elapsed: Duration,
        attempts: u32,
        last_error: Option<String>,
    },

    /// The resource finished badly.
    #[error("{resource} failed: {reason}")]
    Failed { resource: String, reason: String },

    /// Missing configuration or cluster state. Never retried.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error(transparent)]
    Backend(BackendError),

    /// A backend error that stopped a wait on `resource`.
    #[error("{resource}: {source}")]
    Aborted {
        resource: String,
        #[source]
        source: BackendError,
    },

    #[error("assertion failed: {0}")]
    Assertion(String),
}

impl StepError {
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Whether a whole-scenario re-run could change the result.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Precondition(_))
    }

    /// Short machine-readable kind for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TimedOut { .. } => "timed_out",
            Self::Failed { .. } => "failed",
            Self::Precondition(_) => "precondition",
            Self::Backend(_) | Self::Aborted { .. } => "backend",
            Self::Assertion(_) => "assertion",
        }
    }
}

impl From<BackendError> for StepError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Precondition(message) => Self::Precondition(message),
            other => Self::Backend(other),
        }
    }
}

impl From<ConfigError> for StepError {
    fn from(err: ConfigError) -> Self {
        Self::Precondition(err.to_string())
    }
}

impl From<PollError<BackendError>> for StepError {
    fn from(err: PollError<BackendError>) -> Self {
        match err {
            PollError::TimedOut {
                resource,
                elapsed,
                attempts,
                last_error,
            } => Self::TimedOut {
                resource,
                elapsed,
                attempts,
                last_error,
            },
            PollError::Fatal {
                resource,
                source: BackendError::Precondition(message),
            } => Self::Precondition(format!("{resource}: {message}")),
            PollError::Fatal { resource, source } => Self::Aborted { resource, source },
        }
    }
}

/// Turn a settled poll outcome into a step result.
pub fn expect_success(resource: impl Into<String>, outcome: PollOutcome) -> Result<(), StepError> {
    match outcome {
        PollOutcome::Succeeded => Ok(()),
        PollOutcome::Failed { reason } => Err(StepError::Failed {
            resource: resource.into(),
            reason,
        }),
        PollOutcome::Pending => Err(StepError::assertion(format!(
            "{} is still pending after polling finished",
            resource.into()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_includes_budget_and_last_error() {
        let err = StepError::from(PollError::<BackendError>::TimedOut {
            resource: "pipelinerun ns/run".into(),
            elapsed: Duration::from_secs(90),
            attempts: 10,
            last_error: Some("HTTP 502".into()),
        });
        let message = err.to_string();
        assert!(message.contains("pipelinerun ns/run did not finish within 1m 30s"), "{message}");
        assert!(message.contains("10 checks"));
        assert!(message.contains("last error: HTTP 502"));
        assert_eq!(err.kind(), "timed_out");
    }

    #[test]
    fn test_precondition_is_not_retryable() {
        let err = StepError::from(BackendError::Precondition("namespace x does not exist".into()));
        assert!(matches!(err, StepError::Precondition(_)));
        assert!(!err.is_retryable());

        let err = StepError::from(ConfigError::MissingProvider {
            provider: "GitLab",
            hint: "TAP_GITLAB_TOKEN",
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_fatal_poll_error_names_the_resource() {
        let err = StepError::from(PollError::Fatal {
            resource: "github repository o/r".into(),
            source: BackendError::http("GET", "https://api.github.com/repos/o/r", 401, "bad credentials"),
        });
        assert!(matches!(err, StepError::Aborted { .. }));
        assert_eq!(err.kind(), "backend");
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "github repository o/r: GET https://api.github.com/repos/o/r returned HTTP 401: bad credentials"
        );

        let err = StepError::from(PollError::Fatal {
            resource: "scaffolder task t-1".into(),
            source: BackendError::Precondition("template go is not registered".into()),
        });
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("scaffolder task t-1"));
    }

    #[test]
    fn test_expect_success() {
        assert!(expect_success("x", PollOutcome::Succeeded).is_ok());
        let err = expect_success("jenkins job app #3", PollOutcome::failed("FAILURE")).unwrap_err();
        assert_eq!(err.to_string(), "jenkins job app #3 failed: FAILURE");
    }
}
