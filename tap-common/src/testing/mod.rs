//! Test support shared by the workspace crates.

mod log;

pub use log::{TEST_LOG_FILE_ENV, TEST_LOG_LEVEL_ENV, init_global_test_logging, test_log_dir};
