//! The seam between scenario scripts and the systems they exercise.

use std::future::Future;

use crate::context::ScenarioContext;
use crate::error::StepError;
use crate::scenario::{Scenario, Step};

/// Executes scenario steps against some backend.
///
/// The runner calls `setup` once per attempt, then `execute` for each step in
/// order, then `cleanup` when teardown is enabled, whatever happened before.
pub trait StepExecutor: Send + Sync + 'static {
    /// Check preconditions. Errors here are fatal and never retried.
    fn setup(
        &self,
        scenario: &Scenario,
        ctx: &mut ScenarioContext,
    ) -> impl Future<Output = Result<(), StepError>> + Send;

    fn execute(
        &self,
        step: &Step,
        ctx: &mut ScenarioContext,
    ) -> impl Future<Output = Result<(), StepError>> + Send;

    /// Delete what the attempt created.
    fn cleanup(&self, ctx: &ScenarioContext) -> impl Future<Output = Result<(), StepError>> + Send;
}
