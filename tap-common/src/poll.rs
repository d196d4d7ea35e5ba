//! Poll-until-ready primitive.
//!
//! Every wait in the suite (pipeline runs, ArgoCD applications, Jenkins
//! builds, scaffolder tasks, repository creation, HTTP endpoints) is a
//! status-check closure driven by [`poll`]. The loop is single-flight: a new
//! check is only started after the previous one has resolved.
//!
//! Transport errors raised by a check are transient unless the caller's
//! predicate classifies them as fatal. Transient errors are retried on the
//! same schedule as `Pending` results and consume the same time budget.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

/// Smallest interval the poller will sleep between checks.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default interval between checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default overall budget for a single wait.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Result of a single status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PollOutcome {
    /// Condition not met yet; keep polling.
    Pending,
    /// Terminal success.
    Succeeded,
    /// Terminal failure reported by the monitored resource.
    Failed { reason: String },
}

impl PollOutcome {
    /// Build a `Failed` outcome.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Whether this outcome ends a poll sequence.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Convert a terminal outcome into a `Result`.
    ///
    /// `Pending` is reported as a failure as well: callers only use this on
    /// values returned by [`poll`], which never yields `Pending`.
    pub fn into_result(self) -> Result<(), TerminalFailure> {
        match self {
            Self::Succeeded => Ok(()),
            Self::Failed { reason } => Err(TerminalFailure { reason }),
            Self::Pending => Err(TerminalFailure {
                reason: "still pending".to_string(),
            }),
        }
    }
}

impl fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// A resource that finished, but finished badly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct TerminalFailure {
    pub reason: String,
}

/// Interval and budget for a poll sequence.
///
/// A zero `timeout` means "poll until a terminal outcome", with no deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between the end of one check and the start of the next.
    pub interval: Duration,
    /// Overall budget. `Duration::ZERO` disables the deadline.
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            timeout,
        }
    }

    pub fn from_millis(interval_ms: u64, timeout_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        )
    }

    /// Poll with no deadline.
    pub fn unbounded(interval: Duration) -> Self {
        Self::new(interval, Duration::ZERO)
    }

    pub fn is_unbounded(&self) -> bool {
        self.timeout.is_zero()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_POLL_INTERVAL);
        self
    }
}

/// Errors produced by the poll loop itself.
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    /// Budget exhausted while the resource was still pending.
    #[error("timed out after {elapsed:?} waiting for {resource} ({attempts} checks)")]
    TimedOut {
        resource: String,
        elapsed: Duration,
        attempts: u32,
        /// Most recent transient error, if any check failed.
        last_error: Option<String>,
    },

    /// A check error the caller classified as fatal.
    #[error("fatal error while polling {resource}: {source}")]
    Fatal {
        resource: String,
        #[source]
        source: E,
    },
}

impl<E> PollError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    pub fn resource(&self) -> &str {
        match self {
            Self::TimedOut { resource, .. } | Self::Fatal { resource, .. } => resource,
        }
    }
}

/// Predicate that treats every check error as transient.
pub fn retry_all<E>(_err: &E) -> bool {
    false
}

/// Drive `check` until it reports a terminal outcome or the budget runs out.
///
/// Returns `Succeeded` or `Failed`, never `Pending`. `is_fatal` decides which
/// check errors abort the sequence; all other errors are logged and retried.
pub async fn poll<F, Fut, E, P>(
    resource: &str,
    config: &PollConfig,
    is_fatal: P,
    mut check: F,
) -> Result<PollOutcome, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollOutcome, E>>,
    E: fmt::Display,
    P: Fn(&E) -> bool,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;
    let mut last_error: Option<String> = None;

    loop {
        attempts = attempts.saturating_add(1);

        let result = if config.is_unbounded() {
            check().await
        } else {
            // A check in flight at the deadline gets at most one interval of grace.
            let remaining = config.timeout.saturating_sub(start.elapsed());
            let limit = remaining.max(config.interval);
            match timeout(limit, check()).await {
                Ok(result) => result,
                Err(_) => {
                    let elapsed = start.elapsed();
                    warn!(
                        resource,
                        attempt = attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Status check still running at the deadline"
                    );
                    return Err(PollError::TimedOut {
                        resource: resource.to_string(),
                        elapsed,
                        attempts,
                        last_error: Some(format!(
                            "status check did not answer within {}ms",
                            limit.as_millis()
                        )),
                    });
                }
            }
        };

        match result {
            Ok(PollOutcome::Pending) => {
                debug!(
                    resource,
                    attempt = attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Condition not met yet"
                );
            }
            Ok(outcome) => {
                info!(
                    resource,
                    attempt = attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    %outcome,
                    "Poll finished"
                );
                return Ok(outcome);
            }
            Err(err) if is_fatal(&err) => {
                warn!(resource, attempt = attempts, error = %err, "Status check failed (fatal)");
                return Err(PollError::Fatal {
                    resource: resource.to_string(),
                    source: err,
                });
            }
            Err(err) => {
                warn!(resource, attempt = attempts, error = %err, "Status check failed (transient), retrying");
                last_error = Some(err.to_string());
            }
        }

        let elapsed = start.elapsed();
        let delay = if config.is_unbounded() {
            config.interval
        } else if elapsed >= config.timeout {
            warn!(
                resource,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "Poll budget exhausted"
            );
            return Err(PollError::TimedOut {
                resource: resource.to_string(),
                elapsed,
                attempts,
                last_error,
            });
        } else {
            // Clamp so the final check lands on the deadline.
            config.interval.min(config.timeout - elapsed)
        };

        sleep(delay.max(MIN_POLL_INTERVAL)).await;
    }
}

/// Builder form of [`poll`] for call sites that configure classification
/// separately from the check itself.
pub struct Poller<'a, E> {
    resource: String,
    config: PollConfig,
    is_fatal: Box<dyn Fn(&E) -> bool + Send + Sync + 'a>,
}

impl<'a, E: fmt::Display + 'a> Poller<'a, E> {
    pub fn new(resource: impl Into<String>, config: PollConfig) -> Self {
        Self {
            resource: resource.into(),
            config,
            is_fatal: Box::new(retry_all),
        }
    }

    /// Classify check errors; `true` aborts the poll immediately.
    pub fn fatal_when(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'a) -> Self {
        self.is_fatal = Box::new(predicate);
        self
    }

    pub async fn run<F, Fut>(self, check: F) -> Result<PollOutcome, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollOutcome, E>>,
    {
        poll(&self.resource, &self.config, &*self.is_fatal, check).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum CheckError {
        Transient,
        Gone,
    }

    impl fmt::Display for CheckError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                CheckError::Transient => write!(f, "connection reset"),
                CheckError::Gone => write!(f, "not found"),
            }
        }
    }

    fn is_gone(err: &CheckError) -> bool {
        matches!(err, CheckError::Gone)
    }

    /// Counter-backed check returning `script[n]` on the n-th call and the
    /// last entry afterwards.
    fn scripted(
        script: Vec<Result<PollOutcome, CheckError>>,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> std::future::Ready<Result<PollOutcome, CheckError>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let check = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
            let idx = n.min(script.len() - 1);
            std::future::ready(script[idx].clone())
        };
        (calls, check)
    }

    #[tokio::test]
    async fn test_pending_twice_then_succeeded() {
        let (calls, check) = scripted(vec![
            Ok(PollOutcome::Pending),
            Ok(PollOutcome::Pending),
            Ok(PollOutcome::Succeeded),
        ]);
        let config = PollConfig::from_millis(10, 1000);

        let start = std::time::Instant::now();
        let outcome = poll("stub", &config, retry_all, check).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(outcome, PollOutcome::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(elapsed >= Duration::from_millis(20), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_first_success_does_not_sleep() {
        let (calls, check) = scripted(vec![Ok(PollOutcome::Succeeded)]);
        let config = PollConfig::from_millis(5_000, 60_000);

        let start = std::time::Instant::now();
        let outcome = poll("stub", &config, retry_all, check).await.unwrap();

        assert_eq!(outcome, PollOutcome::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_failure_stops_polling() {
        let (calls, check) = scripted(vec![
            Ok(PollOutcome::Pending),
            Ok(PollOutcome::failed("build failed")),
            Ok(PollOutcome::Succeeded),
        ]);
        let config = PollConfig::from_millis(1, 1000);

        let outcome = poll("stub", &config, retry_all, check).await.unwrap();

        assert_eq!(outcome, PollOutcome::failed("build failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_always_pending_times_out_no_earlier_than_budget() {
        let (calls, check) = scripted(vec![Ok(PollOutcome::Pending)]);
        let config = PollConfig::from_millis(10, 100);

        let start = std::time::Instant::now();
        let err = poll("pipelinerun ns/run", &config, retry_all, check)
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert_eq!(err.resource(), "pipelinerun ns/run");
        assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
        assert!(calls.load(Ordering::SeqCst) >= 2);
        match err {
            PollError::TimedOut {
                elapsed, attempts, ..
            } => {
                assert!(elapsed >= Duration::from_millis(100));
                assert_eq!(attempts, calls.load(Ordering::SeqCst));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_hung_check_is_cut_off_at_deadline() {
        let calls = AtomicU32::new(0);
        let config = PollConfig::from_millis(10, 100);

        let start = std::time::Instant::now();
        let err = poll("route ns/app", &config, retry_all, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                sleep(Duration::from_millis(1_500)).await;
                Ok::<_, CheckError>(PollOutcome::Succeeded)
            }
        })
        .await
        .unwrap_err();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(100), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1_000), "elapsed {elapsed:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match err {
            PollError::TimedOut {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert!(last_error.unwrap().contains("did not answer"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_slow_check_finishing_in_budget_is_kept() {
        let config = PollConfig::from_millis(10, 500);
        let outcome = poll("stub", &config, retry_all, || async {
            sleep(Duration::from_millis(50)).await;
            Ok::<_, CheckError>(PollOutcome::Succeeded)
        })
        .await
        .unwrap();
        assert_eq!(outcome, PollOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_transient_errors_within_budget_recover() {
        let (calls, check) = scripted(vec![
            Err(CheckError::Transient),
            Err(CheckError::Transient),
            Err(CheckError::Transient),
            Ok(PollOutcome::Succeeded),
        ]);
        let config = PollConfig::from_millis(5, 1000);

        let outcome = poll("stub", &config, is_gone, check).await.unwrap();

        assert_eq!(outcome, PollOutcome::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_transient_errors_count_against_budget() {
        let (_calls, check) = scripted(vec![Err(CheckError::Transient)]);
        let config = PollConfig::from_millis(5, 40);

        let err = poll("stub", &config, retry_all, check).await.unwrap_err();

        match err {
            PollError::TimedOut { last_error, .. } => {
                assert_eq!(last_error.as_deref(), Some("connection reset"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_immediately() {
        let (calls, check) = scripted(vec![
            Ok(PollOutcome::Pending),
            Err(CheckError::Gone),
            Ok(PollOutcome::Succeeded),
        ]);
        let config = PollConfig::from_millis(1, 1000);

        let err = poll("stub", &config, is_gone, check).await.unwrap_err();

        assert!(matches!(
            err,
            PollError::Fatal {
                source: CheckError::Gone,
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_timeout_polls_until_terminal() {
        let mut script: Vec<Result<PollOutcome, CheckError>> = vec![Ok(PollOutcome::Pending); 25];
        script.push(Ok(PollOutcome::Succeeded));
        let (calls, check) = scripted(script);
        let config = PollConfig::unbounded(Duration::from_millis(1));

        assert!(config.is_unbounded());
        let outcome = poll("stub", &config, retry_all, check).await.unwrap();

        assert_eq!(outcome, PollOutcome::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 26);
    }

    #[tokio::test]
    async fn test_poller_builder_uses_predicate() {
        let (calls, check) = scripted(vec![Err(CheckError::Gone)]);

        let err = Poller::new("repo org/app", PollConfig::from_millis(1, 1000))
            .fatal_when(is_gone)
            .run(check)
            .await
            .unwrap_err();

        assert!(!err.is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poller_default_retries_everything() {
        let (calls, check) = scripted(vec![Err(CheckError::Gone), Ok(PollOutcome::Succeeded)]);

        let outcome = Poller::new("repo org/app", PollConfig::from_millis(1, 1000))
            .run(check)
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_checks_never_overlap() {
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));
        let calls = Arc::new(AtomicU32::new(0));

        let check = {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            let calls = calls.clone();
            move || {
                let in_flight = in_flight.clone();
                let max_seen = max_seen.clone();
                let calls = calls.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(3)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    if calls.fetch_add(1, Ordering::SeqCst) < 4 {
                        Ok::<_, CheckError>(PollOutcome::Pending)
                    } else {
                        Ok(PollOutcome::Succeeded)
                    }
                }
            }
        };

        poll("stub", &PollConfig::from_millis(1, 1000), retry_all, check)
            .await
            .unwrap();
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interval_is_clamped() {
        let config = PollConfig::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(config.interval, MIN_POLL_INTERVAL);
        assert_eq!(
            PollConfig::default().with_interval(Duration::ZERO).interval,
            MIN_POLL_INTERVAL
        );
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(!PollOutcome::Pending.is_terminal());
        assert!(PollOutcome::Succeeded.is_terminal());
        assert!(PollOutcome::failed("x").is_terminal());
        assert!(PollOutcome::Succeeded.into_result().is_ok());
        assert_eq!(
            PollOutcome::failed("FAILURE").into_result().unwrap_err().reason,
            "FAILURE"
        );
        assert_eq!(PollOutcome::failed("boom").to_string(), "failed: boom");
    }

    #[test]
    fn test_outcome_serializes_with_state_tag() {
        let json = serde_json::to_value(PollOutcome::failed("ABORTED")).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "ABORTED");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn runtime() -> tokio::runtime::Runtime {
            tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap()
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]

            #[test]
            fn transient_errors_then_success_resolve(n in 0usize..6) {
                let mut script: Vec<Result<PollOutcome, CheckError>> =
                    vec![Err(CheckError::Transient); n];
                script.push(Ok(PollOutcome::Succeeded));
                let (calls, check) = scripted(script);
                let config = PollConfig::from_millis(1, 2_000);

                let outcome = runtime().block_on(poll("stub", &config, retry_all, check));

                prop_assert_eq!(outcome.unwrap(), PollOutcome::Succeeded);
                prop_assert_eq!(calls.load(Ordering::SeqCst) as usize, n + 1);
            }

            #[test]
            fn failure_is_returned_verbatim(reason in "[A-Z_]{1,12}", pending in 0usize..4) {
                let mut script: Vec<Result<PollOutcome, CheckError>> =
                    vec![Ok(PollOutcome::Pending); pending];
                script.push(Ok(PollOutcome::failed(reason.clone())));
                let (calls, check) = scripted(script);
                let config = PollConfig::from_millis(1, 2_000);

                let outcome = runtime().block_on(poll("stub", &config, retry_all, check));

                prop_assert_eq!(outcome.unwrap(), PollOutcome::failed(reason));
                prop_assert_eq!(calls.load(Ordering::SeqCst) as usize, pending + 1);
            }
        }
    }
}
