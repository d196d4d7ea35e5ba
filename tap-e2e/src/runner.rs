//! Scenario execution: sequential steps, whole-scenario retries, bounded
//! parallelism across scenarios.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};

use crate::context::ScenarioContext;
use crate::error::StepError;
use crate::executor::StepExecutor;
use crate::report::{ReportWriter, RunSummary, ScenarioResult, StepRecord};
use crate::scenario::Scenario;

const SETUP_STEP: &str = "setup";
const CLEANUP_STEP: &str = "cleanup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Scenarios allowed to run at once.
    pub workers: usize,
    /// Extra attempts after a failed one.
    pub retries: u32,
    /// Run teardown after every attempt.
    pub cleanup: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            retries: 0,
            cleanup: false,
        }
    }
}

struct AttemptFailure {
    step: String,
    error: StepError,
}

pub struct ScenarioRunner<X> {
    executor: Arc<X>,
    options: RunnerOptions,
    report: Option<Arc<ReportWriter>>,
}

impl<X> Clone for ScenarioRunner<X> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            options: self.options,
            report: self.report.clone(),
        }
    }
}

impl<X: StepExecutor> ScenarioRunner<X> {
    pub fn new(executor: X, options: RunnerOptions) -> Self {
        Self {
            executor: Arc::new(executor),
            options,
            report: None,
        }
    }

    #[must_use]
    pub fn with_report(mut self, report: Arc<ReportWriter>) -> Self {
        self.report = Some(report);
        self
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    fn record(&self, record: StepRecord) {
        if let Some(report) = &self.report
            && let Err(e) = report.record(&record)
        {
            warn!(error = %e, "Failed to write step record");
        }
    }

    /// Run one scenario to completion, re-running it from scratch on failure
    /// until the retry budget is spent.
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        let started = Instant::now();
        let max_attempts = scenario
            .retries
            .unwrap_or(self.options.retries)
            .saturating_add(1);
        let mut attempt = 0;

        let failure = loop {
            attempt += 1;
            let mut ctx = ScenarioContext::new(scenario, attempt);
            let span = info_span!(
                "scenario",
                scenario = %scenario.name,
                attempt,
                component = %ctx.component
            );
            let outcome = self.run_attempt(scenario, &mut ctx).instrument(span).await;

            match outcome {
                Ok(()) => {
                    info!(scenario = %scenario.name, attempt, "Scenario passed");
                    break None;
                }
                Err(failure) if failure.error.is_retryable() && attempt < max_attempts => {
                    warn!(
                        scenario = %scenario.name,
                        attempt,
                        max_attempts,
                        step = %failure.step,
                        error = %failure.error,
                        "Scenario attempt failed, re-running"
                    );
                }
                Err(failure) => {
                    error!(
                        scenario = %scenario.name,
                        attempt,
                        step = %failure.step,
                        error = %failure.error,
                        "Scenario failed"
                    );
                    break Some(failure);
                }
            }
        };

        ScenarioResult {
            scenario: scenario.name.clone(),
            passed: failure.is_none(),
            attempts: attempt,
            elapsed_ms: started.elapsed().as_millis() as u64,
            failed_step: failure.as_ref().map(|f| f.step.clone()),
            error: failure.map(|f| f.error.to_string()),
        }
    }

    async fn run_attempt(
        &self,
        scenario: &Scenario,
        ctx: &mut ScenarioContext,
    ) -> Result<(), AttemptFailure> {
        let result = self.run_steps(scenario, ctx).await;

        if self.options.cleanup {
            let started = Instant::now();
            let cleanup = self.executor.cleanup(ctx).await;
            let record = StepRecord::new(&scenario.name, ctx.attempt, CLEANUP_STEP, started.elapsed())
                .with_component(&ctx.component);
            match cleanup {
                Ok(()) => {
                    info!(resources = ctx.created.len(), "Cleanup finished");
                    self.record(record);
                }
                Err(e) => {
                    warn!(error = %e, "Cleanup failed");
                    self.record(record.failed(e.kind(), e.to_string()));
                }
            }
        }

        result
    }

    async fn run_steps(
        &self,
        scenario: &Scenario,
        ctx: &mut ScenarioContext,
    ) -> Result<(), AttemptFailure> {
        let started = Instant::now();
        let setup = self.executor.setup(scenario, ctx).await;
        self.finish_step(ctx, SETUP_STEP, started.elapsed(), setup)?;

        for step in &scenario.steps {
            let name = step.to_string();
            info!(step = %name, "Step started");
            let started = Instant::now();
            let result = self.executor.execute(step, ctx).await;
            self.finish_step(ctx, &name, started.elapsed(), result)?;
        }
        Ok(())
    }

    fn finish_step(
        &self,
        ctx: &ScenarioContext,
        step: &str,
        elapsed: Duration,
        result: Result<(), StepError>,
    ) -> Result<(), AttemptFailure> {
        let record =
            StepRecord::new(&ctx.scenario, ctx.attempt, step, elapsed).with_component(&ctx.component);
        match result {
            Ok(()) => {
                info!(step, elapsed_ms = elapsed.as_millis() as u64, "Step passed");
                self.record(record);
                Ok(())
            }
            Err(error) => {
                warn!(step, elapsed_ms = elapsed.as_millis() as u64, error = %error, "Step failed");
                self.record(record.failed(error.kind(), error.to_string()));
                Err(AttemptFailure {
                    step: step.to_string(),
                    error,
                })
            }
        }
    }

    /// Run scenarios with at most `workers` in flight. Results come back in
    /// input order; one scenario's failure never affects another.
    pub async fn run_all(&self, scenarios: Vec<Scenario>) -> RunSummary {
        let permits = Arc::new(Semaphore::new(
            self.options.workers.clamp(1, Semaphore::MAX_PERMITS),
        ));
        let mut tasks = JoinSet::new();

        for (index, scenario) in scenarios.iter().cloned().enumerate() {
            let runner = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, runner.run_scenario(&scenario).await)
            });
        }

        let mut results: Vec<Option<ScenarioResult>> = vec![None; scenarios.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!(error = %e, "Scenario task panicked"),
            }
        }

        RunSummary {
            results: results
                .into_iter()
                .zip(scenarios)
                .map(|(result, scenario)| {
                    result.unwrap_or_else(|| ScenarioResult {
                        scenario: scenario.name,
                        passed: false,
                        attempts: 0,
                        elapsed_ms: 0,
                        failed_step: None,
                        error: Some("scenario task aborted".to_string()),
                    })
                })
                .collect(),
        }
    }
}
