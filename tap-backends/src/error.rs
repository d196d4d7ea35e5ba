//! Errors raised by provider clients.

use thiserror::Error;

/// Largest response body excerpt carried in an error.
const BODY_EXCERPT_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Http {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("kubernetes request for {resource} failed: {source}")]
    Kube {
        resource: String,
        #[source]
        source: kube::Error,
    },

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("{resource} has no '{field}'")]
    MissingField { resource: String, field: String },

    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl BackendError {
    pub fn http(
        method: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        body: &str,
    ) -> Self {
        Self::Http {
            method: method.into(),
            url: url.into(),
            status,
            body: excerpt(body),
        }
    }

    pub fn kube(resource: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            resource: resource.into(),
            source,
        }
    }

    pub fn missing_field(resource: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            resource: resource.into(),
            field: field.into(),
        }
    }

    /// HTTP status of the failed call, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            Self::Kube {
                source: kube::Error::Api(response),
                ..
            } => Some(response.code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Bad or missing credentials. Retrying cannot fix these.
    pub fn is_auth(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(500..=599))
    }

    /// Errors that no amount of polling will clear.
    pub fn is_permanent(&self) -> bool {
        self.is_auth() || matches!(self, Self::Precondition(_))
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.len() <= BODY_EXCERPT_LEN {
        return body.to_string();
    }
    let mut end = BODY_EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_classification() {
        let not_found = BackendError::http("GET", "https://x/api", 404, "missing");
        assert!(not_found.is_not_found());
        assert!(!not_found.is_auth());
        assert!(!not_found.is_permanent());

        let forbidden = BackendError::http("GET", "https://x/api", 403, "");
        assert!(forbidden.is_auth());
        assert!(forbidden.is_permanent());

        let unavailable = BackendError::http("POST", "https://x/api", 503, "");
        assert!(unavailable.is_server_error());
        assert!(!unavailable.is_permanent());
    }

    #[test]
    fn test_precondition_is_permanent_without_status() {
        let err = BackendError::Precondition("namespace tap-ci does not exist".into());
        assert_eq!(err.status(), None);
        assert!(err.is_permanent());
    }

    #[test]
    fn test_body_excerpt_truncates_on_char_boundary() {
        let body = "é".repeat(400);
        let err = BackendError::http("GET", "u", 500, &body);
        let BackendError::Http { body, .. } = err else {
            panic!("expected http error");
        };
        assert!(body.ends_with("..."));
        assert!(body.len() <= BODY_EXCERPT_LEN + 3);
    }
}
