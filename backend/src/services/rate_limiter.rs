//! Rate limiting and retry logic for metadata provider calls
//!
//! Every provider request goes through a [`RateLimitedClient`] and, where the
//! call is idempotent, through [`retry_async_when`] so transient failures are
//! retried with exponential backoff instead of failing the pipeline run.
//!
//! Each provider gets its own named client and quota. Responses whose status
//! no retry can change (404, a rejected key) are raised as
//! [`PermanentStatus`] and end the retry loop on the first attempt.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::{Client, Response};
use thiserror::Error;
use tracing::{debug, warn};

/// Per-request timeout for provider HTTP calls
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Burst capacity (allows short bursts above the rate)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2,
            burst_size: 5,
        }
    }
}

/// A rate-limited HTTP client wrapper
pub struct RateLimitedClient {
    client: Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    name: String,
}

impl RateLimitedClient {
    pub fn new(name: &str, config: RateLimitConfig) -> Result<Self> {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("library-intake/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
            name: name.to_string(),
        })
    }

    /// Client for the TMDB API
    pub fn for_tmdb() -> Result<Self> {
        // TMDB allows ~40 requests per 10 seconds
        Self::new(
            "tmdb",
            RateLimitConfig {
                requests_per_second: 4,
                burst_size: 10,
            },
        )
    }

    /// Client for TheTVDB v4 API
    pub fn for_tvdb() -> Result<Self> {
        Self::new(
            "tvdb",
            RateLimitConfig {
                requests_per_second: 3,
                burst_size: 6,
            },
        )
    }

    /// Wait for rate limit and make a GET request with headers and query parameters
    pub async fn get_with_headers_and_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &T,
    ) -> Result<Response> {
        self.wait_for_permit().await;
        debug!(client = %self.name, url = %url, "Making rate-limited GET request");

        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }
        request
            .query(query)
            .send()
            .await
            .context("HTTP request failed")
    }

    /// Wait for rate limit and POST a JSON body
    pub async fn post_json<B: serde::Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Response> {
        self.wait_for_permit().await;
        debug!(client = %self.name, url = %url, "Making rate-limited POST request");

        self.client
            .post(url)
            .json(body)
            .send()
            .await
            .context("HTTP request failed")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for a rate limit permit
    pub async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create an ExponentialBackoff from this config
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        }
    }
}

/// A provider response that retrying cannot fix
#[derive(Debug, Error)]
#[error("{provider} request failed with status {status}: {message}")]
pub struct PermanentStatus {
    pub provider: &'static str,
    pub status: u16,
    pub message: String,
}

/// False for errors raised as [`PermanentStatus`]
pub fn is_retryable(error: &anyhow::Error) -> bool {
    error.downcast_ref::<PermanentStatus>().is_none()
}

/// Execute an async operation with retry logic, giving up at once on errors
/// `should_retry` rejects
pub async fn retry_async_when<T, E, Fut, F, P>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !should_retry(&e) {
                    debug!(operation = %operation_name, error = %e, "Permanent failure, not retrying");
                    return Err(e);
                }
                if attempts >= config.max_retries {
                    warn!(
                        operation = %operation_name,
                        attempts = attempts,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                if let Some(duration) = backoff.next_backoff() {
                    warn!(
                        operation = %operation_name,
                        attempt = attempts,
                        error = %e,
                        retry_in_ms = duration.as_millis() as u64,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}

/// Helper trait for classifying provider responses
pub trait ResponseExt {
    /// 429
    fn is_rate_limited(&self) -> bool;

    /// Worth retrying: 408, 429 or any 5xx
    fn is_transient_error(&self) -> bool;

    /// Turn a failed response into an error that says whether to retry
    fn failure(&self, provider: &'static str, message: impl Into<String>) -> anyhow::Error;
}

impl ResponseExt for Response {
    fn is_rate_limited(&self) -> bool {
        self.status().as_u16() == 429
    }

    fn is_transient_error(&self) -> bool {
        is_transient_status(self.status().as_u16())
    }

    fn failure(&self, provider: &'static str, message: impl Into<String>) -> anyhow::Error {
        let message = message.into();
        if self.is_transient_error() {
            anyhow::anyhow!("{} request failed with status {}: {}", provider, self.status(), message)
        } else {
            PermanentStatus {
                provider,
                status: self.status().as_u16(),
                message,
            }
            .into()
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || status == 408 || (500..600).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.requests_per_second, 2);
        assert_eq!(config.burst_size, 5);
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(503));
        assert!(is_transient_status(408));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(401));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_async_when(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("attempt {n} failed")) } else { Ok(n) }
            },
            &fast_retry(3),
            "flaky",
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_async_when(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            },
            &fast_retry(2),
            "always_down",
            |_| true,
        )
        .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_status_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), anyhow::Error> = retry_async_when(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PermanentStatus {
                    provider: "tvdb",
                    status: 404,
                    message: "no such series".to_string(),
                }
                .into())
            },
            &fast_retry(3),
            "missing",
            is_retryable,
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.downcast_ref::<PermanentStatus>().map(|p| p.status), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_still_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), anyhow::Error> = retry_async_when(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("503"))
            },
            &fast_retry(3),
            "flaky",
            is_retryable,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_clients_build() {
        assert_eq!(RateLimitedClient::for_tmdb().unwrap().name(), "tmdb");
        assert_eq!(RateLimitedClient::for_tvdb().unwrap().name(), "tvdb");
    }
}
