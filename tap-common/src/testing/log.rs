//! JSONL logging for test binaries.
//!
//! Each test binary gets its own file under `target/test-logs/`, named after
//! the binary, so concurrently running crates never truncate each other's
//! output. Install it from a `#[ctor::ctor]` hook:
//!
//! ```ignore
//! #[ctor::ctor]
//! fn init_test_logging() {
//!     tap_common::testing::init_global_test_logging();
//! }
//! ```

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

use crate::logging::LogConfig;

/// Overrides the log file for the current test binary.
pub const TEST_LOG_FILE_ENV: &str = "TAP_TEST_LOG_FILE";
/// Level for the workspace crates (default `info`).
pub const TEST_LOG_LEVEL_ENV: &str = "TAP_TEST_LOG_LEVEL";

static TEST_LOG_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Install the test subscriber once per process and return the JSONL path,
/// if a file could be opened.
pub fn init_global_test_logging() -> Option<&'static Path> {
    TEST_LOG_PATH
        .get_or_init(|| {
            let path = std::env::var_os(TEST_LOG_FILE_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| test_log_dir().join(format!("{}.jsonl", binary_stem())));
            let file = open_append(&path);

            let level = std::env::var(TEST_LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
            let filter = EnvFilter::try_new(LogConfig::from_env(&level).directive())
                .unwrap_or_else(|_| EnvFilter::new("info"));

            let json = file.as_ref().and_then(|f| f.try_clone().ok()).map(|f| {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(Mutex::new(f))
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_line_number(true)
            });
            let harness = tracing_subscriber::fmt::layer()
                .with_test_writer()
                .compact();

            let installed = tracing_subscriber::registry()
                .with(filter)
                .with(json)
                .with(harness)
                .try_init()
                .is_ok();
            (installed && file.is_some()).then_some(path)
        })
        .as_deref()
}

/// Directory holding test log output.
pub fn test_log_dir() -> PathBuf {
    target_dir().join("test-logs")
}

fn open_append(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// `providers-3f9c2a...` becomes `providers`.
fn binary_stem() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .map(|stem| match stem.rsplit_once('-') {
            Some((name, hash)) if hash.chars().all(|c| c.is_ascii_hexdigit()) => name.to_string(),
            _ => stem.clone(),
        })
        .unwrap_or_else(|| "tests".to_string())
}

fn target_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("CARGO_TARGET_DIR") {
        return PathBuf::from(dir);
    }
    let mut dir = std::env::current_dir().unwrap_or_default();
    loop {
        let candidate = dir.join("target");
        if candidate.is_dir() {
            return candidate;
        }
        if !dir.pop() {
            return PathBuf::from("target");
        }
    }
}
