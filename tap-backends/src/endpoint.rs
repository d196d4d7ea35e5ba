//! Readiness of a deployed application's HTTP endpoint.

use reqwest::StatusCode;
use tap_common::poll::PollOutcome;
use tracing::debug;

use crate::check::StatusCheck;
use crate::client::{Auth, RestClient};
use crate::error::BackendError;

/// GET `url` until it answers 200. Non-200 answers and transport errors are
/// both "not ready yet"; this check never fails and never aborts.
pub struct EndpointReady {
    rest: RestClient,
    url: String,
}

impl EndpointReady {
    pub fn new(url: impl Into<String>) -> Result<Self, BackendError> {
        let url = url.into();
        Ok(Self {
            rest: RestClient::new(&url, Auth::None)?,
            url,
        })
    }

    pub fn with_client(rest: RestClient, url: impl Into<String>) -> Self {
        Self {
            rest,
            url: url.into(),
        }
    }
}

impl StatusCheck for EndpointReady {
    fn resource(&self) -> String {
        format!("endpoint {}", self.url)
    }

    async fn check(&self) -> Result<PollOutcome, BackendError> {
        match self.rest.status_of(&self.url).await {
            Ok(StatusCode::OK) => Ok(PollOutcome::Succeeded),
            Ok(status) => {
                debug!(url = %self.url, status = status.as_u16(), "Endpoint not ready");
                Ok(PollOutcome::Pending)
            }
            Err(err) => {
                debug!(url = %self.url, error = %err, "Endpoint unreachable");
                Ok(PollOutcome::Pending)
            }
        }
    }

    fn is_fatal(&self, _err: &BackendError) -> bool {
        false
    }
}
