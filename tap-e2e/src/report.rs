//! JSONL step records and the end-of-run summary.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
}

/// One line of the step report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub timestamp: String,
    pub scenario: String,
    pub attempt: u32,
    pub step: String,
    pub status: StepStatus,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn new(scenario: &str, attempt: u32, step: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            scenario: scenario.to_string(),
            attempt,
            step: step.into(),
            status: StepStatus::Passed,
            elapsed_ms: elapsed.as_millis() as u64,
            component: None,
            error_kind: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_component(mut self, component: &str) -> Self {
        self.component = Some(component.to_string());
        self
    }

    #[must_use]
    pub fn failed(mut self, kind: &str, error: impl Into<String>) -> Self {
        self.status = StepStatus::Failed;
        self.error_kind = Some(kind.to_string());
        self.error = Some(error.into());
        self
    }
}

/// Appends step records to `<dir>/<run id>.jsonl`.
pub struct ReportWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl ReportWriter {
    pub fn create(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let run_id = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let path = dir.join(format!("tap-e2e-{run_id}-{}.jsonl", std::process::id()));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, record: &StepRecord) -> io::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("report writer lock poisoned"))?;
        writeln!(file, "{line}")?;
        file.flush()
    }
}

/// Outcome of one scenario across all of its attempts.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub passed: bool,
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// Step that failed on the final attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub results: Vec<ScenarioResult>,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn result(&self, scenario: &str) -> Option<&ScenarioResult> {
        self.results.iter().find(|r| r.scenario == scenario)
    }

    /// Human-readable table, one scenario per line.
    pub fn render(&self) -> String {
        let width = self
            .results
            .iter()
            .map(|r| r.scenario.len())
            .max()
            .unwrap_or(8)
            .max(8);
        let mut out = String::new();
        for result in &self.results {
            let status = if result.passed { "PASS" } else { "FAIL" };
            let elapsed = humantime::format_duration(Duration::from_secs(result.elapsed_ms / 1000));
            out.push_str(&format!(
                "{status}  {:<width$}  attempts={}  {elapsed}",
                result.scenario, result.attempts
            ));
            if let (Some(step), Some(error)) = (&result.failed_step, &result.error) {
                out.push_str(&format!("\n      {step}: {error}"));
            }
            out.push('\n');
        }
        out.push_str(&format!(
            "{} passed, {} failed, {} total\n",
            self.passed(),
            self.failed(),
            self.results.len()
        ));
        out
    }
}
