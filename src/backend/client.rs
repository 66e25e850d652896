//! # Backend HTTP Client
//!
//! Thin `reqwest` wrapper with a request timeout, pooled connections and a
//! bounded retry for connection-level failures. Application errors (non-2xx)
//! are returned immediately; the dispatcher owns retries beyond the transport.

use super::{BackendApi, BackendError, BackendResult};
use crate::constants::backend::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_MS,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Configuration for the backend client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendClientConfig {
    /// Base URL of the decision-engine API (e.g. "http://backend:8000/api/v1")
    pub base_url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Total attempts for connection-level failures
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_factor: f64,
}

impl Default for BackendClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl BackendClientConfig {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_factor.powi(retry.saturating_sub(1) as i32);
        Duration::from_millis((self.initial_backoff_ms as f64 * factor) as u64)
    }
}

#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    config: BackendClientConfig,
    base_url: Url,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url.as_str())
            .field("timeout_ms", &self.config.timeout_ms)
            .field("max_attempts", &self.config.max_attempts)
            .finish()
    }
}

impl BackendClient {
    /// Build a client; fails on a malformed base URL
    pub fn new(config: BackendClientConfig) -> BackendResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| BackendError::config_error(format!("Invalid base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::config_error(format!(
                "Base URL cannot carry a path: {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(format!("decision-jobs/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::config_error(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn config(&self) -> &BackendClientConfig {
        &self.config
    }

    /// `base_url` with the segments of `path` appended
    ///
    /// Each segment is decoded and re-encoded as a single path segment, so an
    /// encoded `/`, `?` or `#` from [`path_segment`](super::path_segment) can
    /// never leave its segment. Dot segments are rejected.
    fn url_for(&self, path: &str) -> BackendResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| BackendError::config_error("Base URL cannot carry a path"))?;
            segments.pop_if_empty();
            for raw in path.trim_start_matches('/').split('/') {
                let segment =
                    urlencoding::decode(raw).map_err(|_| BackendError::invalid_path(path))?;
                if segment == "." || segment == ".." {
                    return Err(BackendError::invalid_path(path));
                }
                segments.push(&segment);
            }
        }
        Ok(url)
    }

    /// Send and read the body; both steps fail with a `reqwest::Error`
    async fn exchange(request: RequestBuilder) -> Result<(StatusCode, String), reqwest::Error> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn send_with_retry<F>(&self, method: &str, path: &str, build: F) -> BackendResult<Value>
    where
        F: Fn() -> RequestBuilder,
    {
        let started = Instant::now();
        let mut attempt = 1;
        loop {
            match Self::exchange(build()).await {
                Ok((status, body)) => {
                    if !status.is_success() {
                        error!(
                            method = method,
                            path = path,
                            status = status.as_u16(),
                            error = %body,
                            "Backend returned an error response"
                        );
                        return Err(BackendError::api_error(status.as_u16(), body));
                    }

                    debug!(
                        method = method,
                        path = path,
                        status = status.as_u16(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Backend request completed"
                    );
                    return Ok(parse_body(body));
                }
                Err(e) => {
                    let err = BackendError::from(e);
                    if !err.is_transient() || attempt >= self.config.max_attempts {
                        error!(
                            method = method,
                            path = path,
                            attempts = attempt,
                            error = %err,
                            "Backend request failed"
                        );
                        return Err(err);
                    }

                    let delay = self.config.backoff_for(attempt);
                    warn!(
                        method = method,
                        path = path,
                        retry = attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Network error calling backend, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// JSON when the body parses, otherwise the raw text as a string value
fn parse_body(body: String) -> Value {
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}

#[async_trait]
impl BackendApi for BackendClient {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> BackendResult<Value> {
        let url = self.url_for(path)?;
        self.send_with_retry("GET", path, || self.client.get(url.clone()).query(query))
            .await
    }

    async fn post(&self, path: &str, body: &Value) -> BackendResult<Value> {
        let url = self.url_for(path)?;
        self.send_with_retry("POST", path, || self.client.post(url.clone()).json(body))
            .await
    }
}
