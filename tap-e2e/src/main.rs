//! TAP end-to-end suite
//!
//! Scaffolds components through Developer Hub, follows their builds and
//! deployments, and reports per-step results.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tap_common::config::{EnvParser, MAX_SCENARIO_RETRIES, MAX_WORKERS, RunOverrides};
use tap_common::{E2eConfig, LogConfig, LogFormat, init_logging};
use tap_e2e::scenario::{self, DEFAULT_TEMPLATE};
use tap_e2e::{LiveExecutor, ReportWriter, RunnerOptions, ScenarioRunner};
use tracing::{info, warn};

const DEFAULT_REPORT_DIR: &str = "target/test-logs";

#[derive(Parser)]
#[command(name = "tap-e2e")]
#[command(author, version, about = "TAP end-to-end scenarios")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Also append JSON logs to this file
    #[arg(long, global = true, value_name = "PATH", env = "TAP_LOG_FILE")]
    log_file: Option<PathBuf>,
}

/// Settings that override their `TAP_*` counterparts.
#[derive(Args)]
struct RunFlags {
    /// Scenarios allowed to run at once
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_WORKERS)))]
    workers: Option<u32>,

    /// Extra attempts for a failed scenario
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_SCENARIO_RETRIES)))]
    retries: Option<u32>,

    /// Delete created repositories and applications after each attempt
    #[arg(long, conflicts_with = "no_cleanup")]
    cleanup: bool,

    /// Keep created resources for inspection
    #[arg(long)]
    no_cleanup: bool,
}

impl RunFlags {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            workers: self.workers,
            retries: self.retries,
            cleanup: match (self.cleanup, self.no_cleanup) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in scenarios
    List {
        /// Print scenario scripts as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run scenarios against the configured cluster
    Run {
        /// Scenario to run (repeatable; default: TAP_SCENARIOS or all)
        #[arg(short, long = "scenario", value_name = "NAME")]
        scenarios: Vec<String>,

        #[command(flatten)]
        flags: RunFlags,

        /// Directory for the JSONL step report
        #[arg(long, value_name = "DIR", env = "TAP_REPORT_DIR", default_value = DEFAULT_REPORT_DIR)]
        report_dir: PathBuf,
    },

    /// Resolve configuration and show where each value came from
    CheckConfig {
        #[command(flatten)]
        flags: RunFlags,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut env = EnvParser::new();
    let level = env.log_level("LOG_LEVEL", "info").value;
    let mut log_config = LogConfig::from_env(&level).with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if cli.json_logs {
        log_config = log_config.with_format(LogFormat::Json);
    }
    if let Some(path) = &cli.log_file {
        log_config = log_config.with_file(path);
    }
    let _logging_guards = init_logging(&log_config)?;
    if let Err(errors) = env.finish() {
        for error in errors {
            warn!(%error, "Ignoring invalid logging setting");
        }
    }

    match cli.command {
        Commands::List { json } => {
            let template = env.string("TEMPLATE", DEFAULT_TEMPLATE).value;
            let catalog = scenario::catalog(&template);
            if json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                for scenario in &catalog {
                    println!("{:<18} {} + {}", scenario.name, scenario.git, scenario.ci);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckConfig { flags } => {
            let mut config = E2eConfig::from_env().context("invalid configuration")?;
            config.apply_overrides(flags.overrides());
            for entry in config.entries() {
                println!("{:<28} {:<48} ({})", entry.key, entry.value, entry.source);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            scenarios,
            flags,
            report_dir,
        } => {
            let mut config = E2eConfig::from_env().context("invalid configuration")?;
            config.apply_overrides(flags.overrides());
            let names = if scenarios.is_empty() {
                config.scenarios.clone()
            } else {
                scenarios
            };
            let selected = scenario::select(scenario::catalog(&config.template), &names)
                .map_err(anyhow::Error::msg)?;

            let options = RunnerOptions {
                workers: config.workers as usize,
                retries: config.scenario_retries,
                cleanup: config.cleanup,
            };
            let report = ReportWriter::create(&report_dir)
                .with_context(|| format!("cannot create report in {}", report_dir.display()))?;
            info!(
                scenarios = selected.len(),
                workers = options.workers,
                retries = options.retries,
                cleanup = options.cleanup,
                report = %report.path().display(),
                "Starting run"
            );

            let executor = LiveExecutor::connect(config)
                .await
                .context("cannot reach the platform")?;
            let summary = ScenarioRunner::new(executor, options)
                .with_report(Arc::new(report))
                .run_all(selected)
                .await;

            print!("{}", summary.render());
            Ok(if summary.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
