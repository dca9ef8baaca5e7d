//! Outbound JSON fetching for discovery and key-set documents
//!
//! The resolver and key-set provider only need "GET this URL, give me JSON".
//! [`HttpFetcher`] is that seam; [`ReqwestFetcher`] is the production
//! implementation and tests substitute their own.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::HttpConfig;

/// Transport-level failures while fetching a JSON document
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// URL scheme is not HTTPS (and plain HTTP was not allowed)
    #[error("Invalid URL scheme: {0} (only HTTPS is allowed)")]
    InvalidScheme(String),

    /// Connection, TLS or protocol failure
    #[error("Request failed: {0}")]
    Transport(String),

    /// No response within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success HTTP status
    #[error("HTTP status {0}")]
    Status(u16),

    /// Body larger than the configured limit
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// Configured limit
        max_size: usize,
    },

    /// Body was not valid JSON
    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),
}

/// Fetches JSON documents over HTTP GET
#[async_trait]
pub trait HttpFetcher: Send + Sync + Debug {
    /// GET `url` and parse the body as JSON
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure, non-success status,
    /// oversized body, or invalid JSON.
    async fn get_json(&self, url: &Url) -> Result<serde_json::Value, FetchError>;
}

/// Run `fetcher.get_json(url)` bounded by `timeout`
///
/// The bound applies to any fetcher, including ones without their own
/// client-side timeout.
///
/// # Errors
///
/// Returns [`FetchError::Timeout`] when the deadline passes, otherwise the
/// fetcher's own error.
pub async fn get_json_within(
    fetcher: &dyn HttpFetcher,
    url: &Url,
    timeout: Duration,
) -> Result<serde_json::Value, FetchError> {
    tokio::time::timeout(timeout, fetcher.get_json(url))
        .await
        .map_err(|_| FetchError::Timeout(timeout))?
}

/// `reqwest`-backed fetcher with timeout, size limit and scheme policy
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    request_timeout: Duration,
    max_response_size: usize,
    allow_http: bool,
}

impl ReqwestFetcher {
    /// Build a fetcher from HTTP settings
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the HTTP client cannot be built.
    pub fn new(http: &HttpConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(http.request_timeout)
            .user_agent(format!("tokengate/{}", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            request_timeout: http.request_timeout,
            max_response_size: http.max_response_size,
            allow_http: http.allow_http,
        })
    }

    /// The underlying client, shared with the token endpoint client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn validate_scheme(&self, url: &Url) -> Result<(), FetchError> {
        match url.scheme() {
            "https" => Ok(()),
            "http" if self.allow_http => Ok(()),
            other => Err(FetchError::InvalidScheme(other.to_string())),
        }
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get_json(&self, url: &Url) -> Result<serde_json::Value, FetchError> {
        self.validate_scheme(url)?;

        debug!(url = %url, "Fetching JSON document");

        let response = self
            .client
            .get(url.as_str())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.request_timeout)
                } else {
                    FetchError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len > self.max_response_size as u64
        {
            return Err(FetchError::ResponseTooLarge {
                max_size: self.max_response_size,
            });
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.request_timeout)
            } else {
                FetchError::Transport(format!("Failed to read response: {e}"))
            }
        })?;

        if body.len() > self.max_response_size {
            return Err(FetchError::ResponseTooLarge {
                max_size: self.max_response_size,
            });
        }

        serde_json::from_slice(&body).map_err(|e| FetchError::InvalidJson(e.to_string()))
    }
}
