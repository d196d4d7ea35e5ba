//! Runner behavior with a scripted executor: ordering, aborts, retries,
//! teardown, parallelism and step reports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tap_common::types::{CiProvider, Environment, GitProvider};
use tap_e2e::report::StepStatus;
use tap_e2e::{
    CreatedResource, ReportWriter, RunnerOptions, Scenario, ScenarioContext, ScenarioRunner, Step,
    StepError, StepExecutor, StepRecord,
};

#[ctor::ctor]
fn init_test_logging() {
    tap_common::testing::init_global_test_logging();
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Timeout,
    Failed,
    Precondition,
}

impl Fault {
    fn error(self, step: &str) -> StepError {
        match self {
            Fault::Timeout => StepError::TimedOut {
                resource: step.to_string(),
                elapsed: Duration::from_millis(5),
                attempts: 3,
                last_error: None,
            },
            Fault::Failed => StepError::Failed {
                resource: step.to_string(),
                reason: "boom".to_string(),
            },
            Fault::Precondition => StepError::Precondition(format!("{step} is not configured")),
        }
    }
}

struct ScriptedFault {
    scenario: String,
    /// `None` fails every attempt.
    attempt: Option<u32>,
    step: String,
    fault: Fault,
}

#[derive(Default)]
struct ScriptedExecutor {
    faults: Vec<ScriptedFault>,
    step_delay: Duration,
    failing_cleanup: bool,
    events: Mutex<Vec<String>>,
    components: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    fn fail(mut self, scenario: &str, attempt: Option<u32>, step: &str, fault: Fault) -> Self {
        self.faults.push(ScriptedFault {
            scenario: scenario.to_string(),
            attempt,
            step: step.to_string(),
            fault,
        });
        self
    }

    fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    fn with_failing_cleanup(mut self) -> Self {
        self.failing_cleanup = true;
        self
    }

    fn log(&self, ctx: &ScenarioContext, step: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}#{} {step}", ctx.scenario, ctx.attempt));
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn events_for(&self, scenario: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(&format!("{scenario}#")))
            .collect()
    }

    fn components(&self) -> Vec<String> {
        self.components.lock().unwrap().clone()
    }

    fn check(&self, ctx: &ScenarioContext, step: &str) -> Result<(), StepError> {
        match self.faults.iter().find(|f| {
            f.scenario == ctx.scenario
                && f.step == step
                && f.attempt.is_none_or(|attempt| attempt == ctx.attempt)
        }) {
            Some(f) => Err(f.fault.error(step)),
            None => Ok(()),
        }
    }
}

impl StepExecutor for ScriptedExecutor {
    async fn setup(&self, _scenario: &Scenario, ctx: &mut ScenarioContext) -> Result<(), StepError> {
        self.log(ctx, "setup");
        self.components.lock().unwrap().push(ctx.component.clone());
        self.check(ctx, "setup")
    }

    async fn execute(&self, step: &Step, ctx: &mut ScenarioContext) -> Result<(), StepError> {
        let name = step.to_string();
        self.log(ctx, &name);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            Step::Scaffold => {
                let repo = ctx.source_repo().to_string();
                ctx.track(CreatedResource::Repository(repo));
            }
            Step::TriggerBuild => ctx.commit_sha = Some(format!("sha-{}", ctx.attempt)),
            Step::WaitForBuild => {
                ctx.require_commit()?;
            }
            Step::VerifyDeployment { environment } => ctx.verified.push(*environment),
            _ => {}
        }
        self.check(ctx, &name)
    }

    async fn cleanup(&self, ctx: &ScenarioContext) -> Result<(), StepError> {
        self.log(ctx, "cleanup");
        if self.failing_cleanup {
            return Err(StepError::Failed {
                resource: format!("repository {}", ctx.component),
                reason: "403 forbidden".to_string(),
            });
        }
        Ok(())
    }
}

fn scenario(name: &str) -> Scenario {
    Scenario {
        name: name.to_string(),
        git: GitProvider::GitHub,
        ci: CiProvider::Tekton,
        template: "go".to_string(),
        steps: vec![
            Step::Scaffold,
            Step::TriggerBuild,
            Step::WaitForBuild,
            Step::VerifyDeployment {
                environment: Environment::Development,
            },
        ],
        retries: None,
    }
}

fn options(workers: usize, retries: u32, cleanup: bool) -> RunnerOptions {
    RunnerOptions {
        workers,
        retries,
        cleanup,
    }
}

#[tokio::test]
async fn test_steps_run_in_order() {
    let runner = ScenarioRunner::new(ScriptedExecutor::default(), RunnerOptions::default());

    let result = runner.run_scenario(&scenario("alpha")).await;

    assert!(result.passed);
    assert_eq!(result.attempts, 1);
    assert!(result.failed_step.is_none());
    assert_eq!(
        runner.executor().events(),
        vec![
            "alpha#1 setup",
            "alpha#1 scaffold",
            "alpha#1 trigger-build",
            "alpha#1 wait-for-build",
            "alpha#1 verify-deployment(development)",
        ]
    );
}

#[tokio::test]
async fn test_standard_script_runs_end_to_end() {
    let runner = ScenarioRunner::new(ScriptedExecutor::default(), RunnerOptions::default());
    let script = Scenario::standard(GitProvider::GitLab, CiProvider::GitLabCi, "go");

    let result = runner.run_scenario(&script).await;

    assert!(result.passed, "{result:?}");
    let events = runner.executor().events();
    assert_eq!(events.len(), script.steps.len() + 1);
    assert_eq!(
        events.last().map(String::as_str),
        Some("gitlab-gitlabci#1 verify-deployment(stage)")
    );
}

#[tokio::test]
async fn test_first_failure_aborts_remaining_steps() {
    let executor = ScriptedExecutor::default().fail("alpha", None, "wait-for-build", Fault::Failed);
    let runner = ScenarioRunner::new(executor, RunnerOptions::default());

    let result = runner.run_scenario(&scenario("alpha")).await;

    assert!(!result.passed);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.failed_step.as_deref(), Some("wait-for-build"));
    assert_eq!(result.error.as_deref(), Some("wait-for-build failed: boom"));
    let events = runner.executor().events();
    assert_eq!(events.last().map(String::as_str), Some("alpha#1 wait-for-build"));
    assert!(!events.iter().any(|e| e.contains("verify-deployment")));
}

#[tokio::test]
async fn test_retry_uses_fresh_context() {
    let executor = ScriptedExecutor::default().fail("alpha", Some(1), "trigger-build", Fault::Timeout);
    let runner = ScenarioRunner::new(executor, options(1, 1, false));

    let result = runner.run_scenario(&scenario("alpha")).await;

    assert!(result.passed, "{result:?}");
    assert_eq!(result.attempts, 2);
    let components = runner.executor().components();
    assert_eq!(components.len(), 2);
    assert_ne!(components[0], components[1]);
    // The second attempt starts again from the first step.
    let events = runner.executor().events();
    assert!(events.contains(&"alpha#2 scaffold".to_string()));
}

#[tokio::test]
async fn test_retries_exhausted() {
    let executor = ScriptedExecutor::default().fail("alpha", None, "scaffold", Fault::Timeout);
    let runner = ScenarioRunner::new(executor, options(1, 2, false));

    let result = runner.run_scenario(&scenario("alpha")).await;

    assert!(!result.passed);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.failed_step.as_deref(), Some("scaffold"));
}

#[tokio::test]
async fn test_scenario_retries_override_runner() {
    let executor = ScriptedExecutor::default().fail("alpha", None, "scaffold", Fault::Failed);
    let runner = ScenarioRunner::new(executor, options(1, 5, false));

    let result = runner.run_scenario(&scenario("alpha").with_retries(0)).await;

    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn test_precondition_is_not_retried() {
    let executor = ScriptedExecutor::default().fail("alpha", None, "setup", Fault::Precondition);
    let runner = ScenarioRunner::new(executor, options(1, 3, false));

    let result = runner.run_scenario(&scenario("alpha")).await;

    assert!(!result.passed);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.failed_step.as_deref(), Some("setup"));
    assert_eq!(runner.executor().events(), vec!["alpha#1 setup"]);
}

#[tokio::test]
async fn test_cleanup_runs_after_failure() {
    let executor = ScriptedExecutor::default().fail("alpha", None, "trigger-build", Fault::Failed);
    let runner = ScenarioRunner::new(executor, options(1, 0, true));

    let result = runner.run_scenario(&scenario("alpha")).await;

    assert!(!result.passed);
    assert_eq!(
        runner.executor().events().last().map(String::as_str),
        Some("alpha#1 cleanup")
    );
}

#[tokio::test]
async fn test_cleanup_runs_per_attempt() {
    let executor = ScriptedExecutor::default().fail("alpha", Some(1), "scaffold", Fault::Timeout);
    let runner = ScenarioRunner::new(executor, options(1, 1, true));

    runner.run_scenario(&scenario("alpha")).await;

    let cleanups: Vec<String> = runner
        .executor()
        .events()
        .into_iter()
        .filter(|e| e.ends_with("cleanup"))
        .collect();
    assert_eq!(cleanups, vec!["alpha#1 cleanup", "alpha#2 cleanup"]);
}

#[tokio::test]
async fn test_cleanup_disabled() {
    let runner = ScenarioRunner::new(ScriptedExecutor::default(), options(1, 0, false));

    runner.run_scenario(&scenario("alpha")).await;

    assert!(!runner.executor().events().iter().any(|e| e.ends_with("cleanup")));
}

#[tokio::test]
async fn test_cleanup_failure_keeps_result() {
    let executor = ScriptedExecutor::default().with_failing_cleanup();
    let runner = ScenarioRunner::new(executor, options(1, 0, true));

    let result = runner.run_scenario(&scenario("alpha")).await;

    assert!(result.passed);
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn test_run_all_bounded_parallelism() {
    let executor = ScriptedExecutor::default().with_step_delay(Duration::from_millis(20));
    let runner = ScenarioRunner::new(executor, options(2, 0, false));
    let scenarios: Vec<Scenario> = ["a", "b", "c", "d", "e", "f"].into_iter().map(scenario).collect();

    let summary = runner.run_all(scenarios).await;

    assert!(summary.all_passed());
    assert_eq!(summary.results.len(), 6);
    assert_eq!(runner.executor().max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_run_all_isolates_failures() {
    let executor = ScriptedExecutor::default()
        .fail("b", None, "wait-for-build", Fault::Failed)
        .with_step_delay(Duration::from_millis(2));
    let runner = ScenarioRunner::new(executor, options(3, 0, false));
    let scenarios: Vec<Scenario> = ["a", "b", "c"].into_iter().map(scenario).collect();

    let summary = runner.run_all(scenarios).await;

    let names: Vec<&str> = summary.results.iter().map(|r| r.scenario.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert_eq!(summary.passed(), 2);
    assert_eq!(summary.failed(), 1);
    assert!(!summary.result("b").unwrap().passed);
    assert_eq!(runner.executor().events_for("a").len(), 5);
    assert_eq!(runner.executor().events_for("c").len(), 5);
}

#[tokio::test]
async fn test_step_report() {
    let dir = tempfile::tempdir().unwrap();
    let report = Arc::new(ReportWriter::create(dir.path()).unwrap());
    let executor = ScriptedExecutor::default().fail("alpha", None, "wait-for-build", Fault::Timeout);
    let runner = ScenarioRunner::new(executor, options(1, 0, true)).with_report(Arc::clone(&report));

    runner.run_scenario(&scenario("alpha")).await;

    let content = std::fs::read_to_string(report.path()).unwrap();
    let records: Vec<StepRecord> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let steps: Vec<&str> = records.iter().map(|r| r.step.as_str()).collect();
    assert_eq!(
        steps,
        vec!["setup", "scaffold", "trigger-build", "wait-for-build", "cleanup"]
    );
    let failed = &records[3];
    assert_eq!(failed.status, StepStatus::Failed);
    assert_eq!(failed.error_kind.as_deref(), Some("timed_out"));
    assert_eq!(failed.attempt, 1);
    assert!(failed.component.as_deref().unwrap().starts_with("e2e-go-"));
    assert_eq!(records[4].status, StepStatus::Passed);
}

#[tokio::test]
async fn test_extreme_retry_budget_does_not_overflow() {
    let executor = ScriptedExecutor::default().fail("alpha", Some(1), "scaffold", Fault::Timeout);
    let runner = ScenarioRunner::new(executor, options(1, u32::MAX, false));

    let result = runner.run_scenario(&scenario("alpha")).await;

    assert!(result.passed, "{result:?}");
    assert_eq!(result.attempts, 2);
}

#[tokio::test]
async fn test_oversized_worker_count_is_clamped() {
    let runner = ScenarioRunner::new(ScriptedExecutor::default(), options(usize::MAX, 0, false));
    let scenarios: Vec<Scenario> = ["a", "b"].into_iter().map(scenario).collect();

    let summary = runner.run_all(scenarios).await;

    assert!(summary.all_passed());

    let runner = ScenarioRunner::new(ScriptedExecutor::default(), options(0, 0, false));
    let summary = runner.run_all(vec![scenario("solo")]).await;
    assert!(summary.all_passed());
}
