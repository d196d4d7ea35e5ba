//! Thin JSON-over-HTTP client shared by the provider modules.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tap_common::Secret;
use tracing::debug;

use crate::error::BackendError;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const USER_AGENT: &str = concat!("tap-e2e/", env!("CARGO_PKG_VERSION"));

/// How requests authenticate against a provider.
#[derive(Debug, Clone)]
pub enum Auth {
    None,
    Bearer(Secret),
    Basic { username: String, password: Secret },
    /// Token sent in a provider-specific header (GitLab `PRIVATE-TOKEN`).
    Header { name: &'static str, value: Secret },
}

#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    auth: Auth,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, auth: Auth) -> Result<Self, BackendError> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|source| BackendError::Transport {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self::with_client(http, base_url, auth))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>, auth: Auth) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `path`. Absolute inputs pass through unchanged.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.auth {
            Auth::None => builder,
            Auth::Bearer(token) => builder.bearer_auth(token.expose()),
            Auth::Basic { username, password } => {
                builder.basic_auth(username, Some(password.expose()))
            }
            Auth::Header { name, value } => builder.header(*name, value.expose()),
        }
    }

    /// Send and fail on any non-success status.
    async fn send(&self, method: Method, url: &str, builder: RequestBuilder) -> Result<Response, BackendError> {
        let response = self.dispatch(&method, url, builder).await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::http(method.as_str(), url, status, &body))
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &str,
        builder: RequestBuilder,
    ) -> Result<Response, BackendError> {
        debug!(method = %method, url, "Provider request");
        builder.send().await.map_err(|source| BackendError::Transport {
            url: url.to_string(),
            source,
        })
    }

    async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, BackendError> {
        let text = response.text().await.map_err(|source| BackendError::Transport {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| BackendError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let url = self.url(path);
        let response = self
            .send(Method::GET, &url, self.request(Method::GET, &url))
            .await?;
        Self::decode(&url, response).await
    }

    /// Like [`get_json`](Self::get_json) but maps 404 to `None`.
    pub async fn get_optional_json<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, BackendError> {
        match self.get_json(path).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Raw body of `path`, `None` on 404.
    pub async fn get_optional_text(&self, path: &str) -> Result<Option<String>, BackendError> {
        let url = self.url(path);
        let response = match self
            .send(Method::GET, &url, self.request(Method::GET, &url))
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        response
            .text()
            .await
            .map(Some)
            .map_err(|source| BackendError::Transport { url, source })
    }

    /// GET `path` and report the status code without treating it as an error.
    pub async fn status_of(&self, path: &str) -> Result<StatusCode, BackendError> {
        let url = self.url(path);
        let response = self
            .dispatch(&Method::GET, &url, self.request(Method::GET, &url))
            .await?;
        Ok(response.status())
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let builder = self.request(Method::POST, &url).json(body);
        let response = self.send(Method::POST, &url, builder).await?;
        Self::decode(&url, response).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let builder = self.request(Method::PUT, &url).json(body);
        let response = self.send(Method::PUT, &url, builder).await?;
        Self::decode(&url, response).await
    }

    /// POST without a body; returns the raw response for header inspection.
    pub async fn post_empty(&self, path: &str) -> Result<Response, BackendError> {
        let url = self.url(path);
        self.send(Method::POST, &url, self.request(Method::POST, &url))
            .await
    }

    /// POST `application/x-www-form-urlencoded` fields.
    pub async fn post_form(&self, path: &str, fields: &[(&str, &str)]) -> Result<Response, BackendError> {
        let url = self.url(path);
        let builder = self
            .request(Method::POST, &url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(encode_form(fields));
        self.send(Method::POST, &url, builder).await
    }

    /// DELETE `path`. Returns `false` when the resource was already gone.
    pub async fn delete(&self, path: &str) -> Result<bool, BackendError> {
        let url = self.url(path);
        match self
            .send(Method::DELETE, &url, self.request(Method::DELETE, &url))
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

pub(crate) fn encode_form(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RestClient {
        RestClient::with_client(reqwest::Client::new(), "https://api.example.com/", Auth::None)
    }

    #[test]
    fn test_url_joins_relative_and_keeps_absolute() {
        let client = client();
        assert_eq!(client.base_url(), "https://api.example.com");
        assert_eq!(client.url("/repos/a/b"), "https://api.example.com/repos/a/b");
        assert_eq!(client.url("repos/a/b"), "https://api.example.com/repos/a/b");
        assert_eq!(
            client.url("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_encode_form_escapes_values() {
        let body = encode_form(&[("message", "bump image: v1 -> v2"), ("path/x", "a&b")]);
        assert_eq!(body, "message=bump%20image%3A%20v1%20-%3E%20v2&path%2Fx=a%26b");
    }
}
