//! Shared building blocks for the TAP end-to-end suite: the poll-until-ready
//! primitive, environment configuration, logging setup and provider types.

pub mod config;
pub mod logging;
pub mod poll;
pub mod testing;
pub mod types;

pub use config::{ConfigError, E2eConfig, Secret};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging, mask_secret};
pub use poll::{PollConfig, PollError, PollOutcome, Poller, poll};
pub use types::{CiProvider, Environment, GitProvider, unique_component_name};
