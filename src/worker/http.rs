//! HTTP client for fetching upstream pages

use super::retry::RetryPolicy;
use crate::config::FetchConfig;
use crate::observability::Metrics;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status {
        status: u16,
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("Connection timeout: {0}")]
    Timeout(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Response is not valid JSON: {0}")]
    InvalidBody(String),

    #[error("No URL configured for endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Worth another attempt: throttling, server errors, timeouts and
    /// connection failures
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || (500..600).contains(status)
            }
            Self::Timeout(_) | Self::RequestFailed(_) => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for HttpConfig {
    fn from(config: &FetchConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout.as_duration(),
            request_timeout: config.request_timeout.as_duration(),
            user_agent: config.user_agent.clone(),
            retry: RetryPolicy::builder()
                .max_attempts(config.max_attempts)
                .base_delay(config.base_backoff.as_duration())
                .max_delay(config.max_backoff.as_duration())
                .build(),
        }
    }
}

/// JSON fetcher with classified retries
pub struct HttpFetcher {
    client: Client,
    config: HttpConfig,
    metrics: Arc<Metrics>,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig, metrics: Arc<Metrics>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            metrics,
        })
    }

    /// GET a JSON document, retrying transient failures with backoff
    ///
    /// Permanent failures return immediately. Running out of attempts on a
    /// transient failure yields [`FetchError::Exhausted`].
    pub async fn get_json(&self, url: &Url, query: &[(&str, String)]) -> Result<Value> {
        let policy = &self.config.retry;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let error = match self.get_once(url, query).await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(%url, attempts, "Fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                warn!(%url, attempts, error = %error, "Fetch failed permanently");
                return Err(error);
            }

            if attempts >= policy.max_attempts {
                warn!(%url, attempts, error = %error, "Fetch failed after retries");
                return Err(FetchError::Exhausted {
                    attempts,
                    last: Box::new(error),
                });
            }

            let backoff = policy.delay_with_hint(attempts, error.retry_after());
            warn!(
                %url,
                attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Fetch failed, retrying"
            );
            self.metrics.fetch_retried();
            tokio::time::sleep(backoff).await;
        }
    }

    /// Fetch once (no retry)
    async fn get_once(&self, url: &Url, query: &[(&str, String)]) -> Result<Value> {
        debug!(%url, "Starting fetch");

        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(e.to_string())
                } else if e.is_builder() {
                    FetchError::InvalidUrl(e.to_string())
                } else {
                    FetchError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);

            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                retry_after,
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(e.to_string())
            } else {
                FetchError::RequestFailed(format!("Failed to read body: {e}"))
            }
        })?;

        debug!(%url, size = bytes.len(), "Fetch completed");

        serde_json::from_slice(&bytes).map_err(|e| FetchError::InvalidBody(e.to_string()))
    }
}
