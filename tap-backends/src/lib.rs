//! Provider clients and status adapters.
//!
//! Each adapter implements [`StatusCheck`]: it maps one read of a remote
//! resource onto a [`PollOutcome`](tap_common::poll::PollOutcome) and is
//! driven to completion by [`wait_for`].

pub mod check;
pub mod client;
pub mod cluster;
pub mod developer_hub;
pub mod endpoint;
pub mod error;
pub mod git;
pub mod jenkins;
pub mod promotion;

pub use check::{StatusCheck, wait_for};
pub use client::{Auth, RestClient};
pub use developer_hub::{ComponentRequest, DeveloperHubClient};
pub use endpoint::EndpointReady;
pub use error::BackendError;
pub use git::GitHost;
pub use jenkins::JenkinsClient;
