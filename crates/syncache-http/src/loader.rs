//! reqwest-backed loader for JSON REST APIs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use syncache_core::{CacheKey, Method, TransportError};
use syncache_engine::Loader;
use tracing::debug;

use crate::settings::Settings;

/// Executes cache keys as HTTP requests against one base URL.
///
/// The key's path and canonical query are appended to the base URL and its
/// JSON body, if any, is sent as the request body. Every response is decoded
/// as JSON; an empty body decodes to `null`.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpLoader {
    /// Creates a loader for `base_url` with a per-request timeout.
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Creates a loader from the `base_url` and `request_timeout_ms` settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, TransportError> {
        Self::new(&settings.base_url, settings.request_timeout())
    }

    /// Returns the base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the absolute URL a key is sent to.
    pub fn url_for(&self, key: &CacheKey) -> String {
        format!("{}{}", self.base_url, key.path_and_query())
    }

    fn map_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout {
                millis: self.timeout.as_millis() as u64,
            }
        } else if error.is_decode() {
            TransportError::decode(error.to_string())
        } else {
            TransportError::request(error.to_string())
        }
    }
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Loader for HttpLoader {
    type Output = Value;

    async fn load(&self, request: &CacheKey) -> Result<Value, TransportError> {
        let url = self.url_for(request);
        debug!(method = %request.method(), url = %url, "Sending request");

        let mut builder = self
            .client
            .request(http_method(request.method()), url)
            .header(ACCEPT, "application/json");
        if let Some(body) = request.body() {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            return Err(TransportError::status(status.as_u16(), text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TransportError::decode(e.to_string()))
    }

    fn name(&self) -> &str {
        "http"
    }
}
