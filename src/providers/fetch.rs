//! Outbound HTTP with per-attempt timeouts and retry with backoff.

use crate::core::error::ProviderError;
use anyhow::{Context, Result};
use rand::Rng;
use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy shared by every provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Bound on a single attempt, including reading the body.
    pub timeout: Duration,
    /// Total attempts, including the first.
    pub attempts: u32,
    pub backoff_base: Duration,
    /// Upper bound of the random delay added to each backoff.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            attempts: 3,
            backoff_base: Duration::from_millis(300),
            jitter: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the zero-based `attempt` failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.backoff_base.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        exp + Duration::from_millis(jitter)
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the policy's
/// attempts are used up.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) if !err.is_retryable() => {
                debug!("Not retrying permanent failure: {}", err);
                return Err(err);
            }
            Err(err) => {
                attempt += 1;
                if attempt >= attempts {
                    return Err(ProviderError::Exhausted {
                        attempts,
                        last: Box::new(err),
                    });
                }
                let delay = policy.backoff(attempt - 1);
                debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt, attempts, err, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// HTTP client that decodes JSON bodies under a [`RetryPolicy`].
#[derive(Clone)]
pub struct FetchClient {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl FetchClient {
    pub fn new(user_agent: &str, api_key: Option<(&str, &str)>, policy: RetryPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));
        if let Some((name, value)) = api_key {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid API key header name: {name}"))?;
            let mut value = HeaderValue::from_str(value).context("Invalid API key value")?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, policy })
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, ProviderError> {
        with_retry(&self.policy, || self.attempt(url)).await
    }

    async fn attempt<T: DeserializeOwned>(&self, url: &Url) -> Result<T, ProviderError> {
        debug!("Requesting {}", url);
        let request = async {
            let response = self
                .http
                .get(url.clone())
                .send()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    url: url.path().to_string(),
                });
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;
            serde_json::from_slice::<T>(&body).map_err(|e| ProviderError::Decode(e.to_string()))
        };

        tokio::time::timeout(self.policy.timeout, request)
            .await
            .map_err(|_| ProviderError::Timeout(self.policy.timeout.as_millis() as u64))?
    }
}
