//! Glue between provider adapters and the poll primitive.

use std::future::Future;

use tap_common::poll::{PollConfig, PollError, PollOutcome, poll};

use crate::error::BackendError;

/// One observation of a remote resource, mapped onto [`PollOutcome`].
///
/// Implementations hold only immutable request parameters; each `check`
/// issues a fresh read.
pub trait StatusCheck: Sync {
    /// Stable, human-readable identifier used in logs and timeout errors.
    fn resource(&self) -> String;

    fn check(&self) -> impl Future<Output = Result<PollOutcome, BackendError>> + Send;

    /// Whether `err` should abort polling instead of being retried.
    fn is_fatal(&self, err: &BackendError) -> bool {
        err.is_permanent()
    }
}

/// Poll `check` with `config` until it settles.
pub async fn wait_for<C: StatusCheck>(
    check: &C,
    config: &PollConfig,
) -> Result<PollOutcome, PollError<BackendError>> {
    let resource = check.resource();
    poll(&resource, config, |err| check.is_fatal(err), || check.check()).await
}
