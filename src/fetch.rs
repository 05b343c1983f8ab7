//! HTTP fetching with throttling and exponential backoff.
//!
//! The module follows a decorator design:
//! - [`Fetch`]: core trait, "give me the body behind this URL"
//! - [`PageFetcher`] / [`BytesFetcher`]: `reqwest` implementations for HTML
//!   pages and binary image bodies
//! - [`RateLimited`]: enforces a minimum interval between calls through one
//!   wrapper instance
//! - [`RetryFetch`]: retries the inner fetch a fixed number of times,
//!   sleeping `base_delay * 2^attempt` between attempts
//!
//! Each wrapper owns its own state, so two wrapped fetchers never throttle
//! each other.

use crate::config::Config;
use crate::error::{PipelineError, Result};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, instrument, warn};

/// Something that can turn a URL into a response body.
pub trait Fetch {
    /// Body type returned for a successful fetch.
    type Response;

    async fn fetch(&self, url: &str) -> Result<Self::Response>;
}

/// Build the HTTP client shared by the page and image fetchers.
///
/// Sends the configured user agent plus browser-like `Accept` headers and
/// applies the configured per-request timeout.
pub fn build_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

    Ok(Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .build()?)
}

async fn get_checked(client: &Client, url: &str) -> Result<reqwest::Response> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response)
}

/// Fetches a page and returns its body as text.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Fetch for PageFetcher {
    type Response = String;

    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<String> {
        let body = get_checked(&self.client, url).await?.text().await?;
        debug!(bytes = body.len(), "Fetched page");
        Ok(body)
    }
}

/// Fetches a resource and returns the raw bytes.
#[derive(Debug, Clone)]
pub struct BytesFetcher {
    client: Client,
}

impl BytesFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Fetch for BytesFetcher {
    type Response = Vec<u8>;

    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = get_checked(&self.client, url).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Blocks each call until `min_interval` has passed since the previous call
/// made through this same instance.
///
/// This is not a token bucket: there is no burst capacity. The timestamp is
/// taken when the inner call returns, whether it succeeded or not.
pub struct RateLimited<T> {
    inner: T,
    min_interval: Duration,
    last_called: Mutex<Option<Instant>>,
}

impl<T> RateLimited<T> {
    pub fn new(inner: T, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last_called: Mutex::new(None),
        }
    }
}

impl<T> fmt::Debug for RateLimited<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimited")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

impl<T> Fetch for RateLimited<T>
where
    T: Fetch,
{
    type Response = T::Response;

    async fn fetch(&self, url: &str) -> Result<Self::Response> {
        let mut last = self.last_called.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(?wait, "Throttling request");
                sleep(wait).await;
            }
        }
        let result = self.inner.fetch(url).await;
        *last = Some(Instant::now());
        result
    }
}

/// Retries the inner fetch up to `max_retries` attempts in total.
///
/// The delay before retry `n` (0-based) is `base_delay * 2^n`. Once the
/// budget is spent the error from the last attempt is returned unchanged.
pub struct RetryFetch<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
}

impl<T> RetryFetch<T> {
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

impl<T> Fetch for RetryFetch<T>
where
    T: Fetch,
{
    type Response = T::Response;

    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<Self::Response> {
        // A zero budget still makes the one call the caller asked for.
        let attempts = self.max_retries.max(1);
        let mut attempt: u32 = 0;

        loop {
            match self.inner.fetch(url).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt as usize + 1 >= attempts {
                        error!(
                            attempt = attempt + 1,
                            max = attempts,
                            error = %e,
                            "fetch exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
                    warn!(
                        attempt = attempt + 1,
                        max = attempts,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// The page fetcher every scraping stage uses: throttled, then retried.
pub type PoliteFetcher = RetryFetch<RateLimited<PageFetcher>>;

/// Build the throttled, retrying page fetcher described by `config`.
pub fn polite_fetcher(config: &Config) -> Result<PoliteFetcher> {
    let client = build_client(config.require_user_agent()?, config.timeout())?;
    Ok(RetryFetch::new(
        RateLimited::new(PageFetcher::new(client), config.min_interval()),
        config.max_retries,
        config.retry_delay(),
    ))
}

/// Image bodies are throttled like pages but not retried; a rerun of the
/// image stage picks up whatever failed.
pub fn image_fetcher(config: &Config) -> Result<RateLimited<BytesFetcher>> {
    let client = build_client(config.require_user_agent()?, config.timeout())?;
    Ok(RateLimited::new(
        BytesFetcher::new(client),
        config.min_interval(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then returns the URL back.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Fetch for &Flaky {
        type Response = String;

        async fn fetch(&self, url: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(PipelineError::Status {
                    status: 503,
                    url: url.to_string(),
                })
            } else {
                Ok(url.to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failures() {
        let flaky = Flaky::new(2);
        let retry = RetryFetch::new(&flaky, 3, Duration::from_millis(1));
        let body = retry.fetch("https://example.com/a").await.unwrap();
        assert_eq!(body, "https://example.com/a");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error_after_budget() {
        let flaky = Flaky::new(10);
        let retry = RetryFetch::new(&flaky, 3, Duration::from_millis(1));
        let err = retry.fetch("https://example.com/b").await.unwrap_err();
        assert!(matches!(err, PipelineError::Status { status: 503, .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_zero_budget_still_calls_once() {
        let flaky = Flaky::new(10);
        let retry = RetryFetch::new(&flaky, 0, Duration::from_millis(1));
        assert!(retry.fetch("https://example.com/c").await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_backoff_doubles() {
        let flaky = Flaky::new(2);
        let retry = RetryFetch::new(&flaky, 3, Duration::from_millis(20));
        let t0 = std::time::Instant::now();
        retry.fetch("https://example.com/d").await.unwrap();
        // 20ms after the first failure, 40ms after the second.
        assert!(t0.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_rate_limit_spaces_calls() {
        let flaky = Flaky::new(0);
        let limited = RateLimited::new(&flaky, Duration::from_millis(50));
        let t0 = std::time::Instant::now();
        limited.fetch("https://example.com/1").await.unwrap();
        limited.fetch("https://example.com/2").await.unwrap();
        limited.fetch("https://example.com/3").await.unwrap();
        assert!(t0.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_rate_limit_first_call_is_immediate() {
        let flaky = Flaky::new(0);
        let limited = RateLimited::new(&flaky, Duration::from_secs(5));
        let t0 = std::time::Instant::now();
        limited.fetch("https://example.com/1").await.unwrap();
        assert!(t0.elapsed() < Duration::from_secs(1));
    }
}
