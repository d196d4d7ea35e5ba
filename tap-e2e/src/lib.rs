//! Scenario orchestration for the Trusted Application Pipeline suite.
//!
//! A [`Scenario`] is a fixed list of [`Step`]s. The [`ScenarioRunner`] drives
//! them through a [`StepExecutor`], retries whole scenarios, and runs several
//! scenarios at once.

pub mod context;
pub mod error;
pub mod executor;
pub mod live;
pub mod report;
pub mod runner;
pub mod scenario;

pub use context::{BuildRef, CreatedResource, ScenarioContext};
pub use error::{StepError, expect_success};
pub use executor::StepExecutor;
pub use live::LiveExecutor;
pub use report::{ReportWriter, RunSummary, ScenarioResult, StepRecord, StepStatus};
pub use runner::{RunnerOptions, ScenarioRunner};
pub use scenario::{Scenario, Step};
