//! HTTP client for the service under test.
//!
//! Thin wrapper around [`reqwest`] that resolves paths against the
//! project's base URL and buffers response bodies for assertions.

use std::time::Duration;

use reqwest::Method;

/// Per-attempt timeout for the reachability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP client bound to one service base URL. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: reqwest::Client,
    base_url: String,
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: String,
}

/// Errors from the service client layer.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid HTTP method: '{0}'")]
    InvalidMethod(String),

    /// The body was expected to be JSON but was not.
    #[error("Response body is not JSON: {0}")]
    NotJson(#[source] serde_json::Error),
}

impl ServiceResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<serde_json::Value, ClientError> {
        serde_json::from_str(&self.body).map_err(ClientError::NotJson)
    }
}

impl ServiceClient {
    /// * `base_url` - e.g. `http://localhost:8000`; a trailing slash is dropped.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`] (shares its connection pool).
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `path` (with or without a leading slash).
    pub fn url(&self, path: &str) -> String {
        if path.is_empty() {
            return self.base_url.clone();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request with an optional JSON body and buffer the response.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        json: Option<&serde_json::Value>,
    ) -> Result<ServiceResponse, ClientError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ClientError::InvalidMethod(method.to_string()))?;

        let mut builder = self.client.request(method.clone(), self.url(path));
        if let Some(body) = json {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        tracing::debug!(%method, path, status, "Service request");
        Ok(ServiceResponse { status, body })
    }

    pub async fn get(&self, path: &str) -> Result<ServiceResponse, ClientError> {
        self.request("GET", path, None).await
    }

    pub async fn post(
        &self,
        path: &str,
        json: &serde_json::Value,
    ) -> Result<ServiceResponse, ClientError> {
        self.request("POST", path, Some(json)).await
    }

    /// One reachability attempt against the base URL.
    ///
    /// Any HTTP status counts as reachable; only transport errors fail.
    pub async fn probe(&self) -> Result<u16, ClientError> {
        let response = self
            .client
            .get(&self.base_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}
