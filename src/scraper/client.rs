//! Blocking HTTP client with a request timeout and retries for transient failures.
//!
//! The client is shared by every worker thread, so all methods take `&self`. Every request takes
//! the run's [CancellationToken]: it is checked before each attempt and during retry backoff.

use crate::crawler::cancel::CancellationToken;
use std::time::{Duration, Instant};
use thiserror::Error;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; mangacrawl/0.1; +https://github.com/mangacrawl)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts for [HttpClient::get] (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 3;
/// Default backoff delays in seconds after each failed attempt.
pub const DEFAULT_BACKOFF_SECS: [u64; 3] = [1, 2, 4];
/// Backoff for HTTP 429 (rate limit): wait longer so the server can recover.
const BACKOFF_429_SECS: [u64; 4] = [30, 60, 90, 120];
/// Longest uninterrupted sleep while backing off.
const BACKOFF_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("cancelled before the request was sent")]
    Cancelled,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::blocking::Client,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl HttpClient {
    /// Build a client with default User-Agent, timeout, and retries.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Perform a GET request, retrying on timeout, connection errors, HTTP 5xx and HTTP 429.
    ///
    /// Other statuses (including 4xx) are returned as-is for the caller to inspect. After the
    /// last attempt the final response or error is returned unchanged. No attempt is started
    /// once `cancel` is set, and a pending backoff ends early with [RequestError::Cancelled].
    pub fn get(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<reqwest::blocking::Response, RequestError> {
        let max_attempts = self.retry_count.max(1);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RequestError::Cancelled);
            }
            let last_attempt = attempt + 1 >= max_attempts;
            let backoff = match self.inner.get(url).send() {
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.is_server_error() || status.as_u16() == 429;
                    if !retryable || last_attempt {
                        return Ok(response);
                    }
                    let backoff = if status.as_u16() == 429 {
                        backoff_at(&BACKOFF_429_SECS, attempt)
                    } else {
                        backoff_at(&self.backoff_secs, attempt)
                    };
                    tracing::debug!(url, status = status.as_u16(), backoff, "retrying request");
                    backoff
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    if !retryable || last_attempt {
                        return Err(e.into());
                    }
                    let backoff = backoff_at(&self.backoff_secs, attempt);
                    tracing::debug!(url, error = %e, backoff, "retrying request");
                    backoff
                }
            };
            if !sleep_unless_cancelled(Duration::from_secs(backoff), cancel) {
                tracing::debug!(url, "retry abandoned after cancellation");
                return Err(RequestError::Cancelled);
            }
            attempt += 1;
        }
    }
}

/// Sleep for `total` in short slices. Returns false as soon as `cancel` is set.
fn sleep_unless_cancelled(total: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return true;
        }
        std::thread::sleep(left.min(BACKOFF_SLICE));
    }
}

/// Delay before retry number `attempt`; the last configured value is reused when the list is short.
fn backoff_at(secs: &[u64], attempt: u32) -> u64 {
    secs.get(attempt as usize)
        .or_else(|| secs.last())
        .copied()
        .unwrap_or(1)
}

/// Builder for [HttpClient] with optional User-Agent, timeout, and retry settings.
#[derive(Debug)]
pub struct HttpClientBuilder {
    user_agent: Option<String>,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl HttpClientBuilder {
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Number of HTTP attempts for transient failures (default 3, minimum 1).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Backoff delays in seconds before each retry. If shorter than `retry_count - 1`, the last
    /// value is reused.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    pub fn build(self) -> Result<HttpClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            let n = self.retry_count.saturating_sub(1) as usize;
            (0..n).map(|i| 1u64 << i.min(4)).collect::<Vec<_>>()
        } else {
            self.retry_backoff_secs
        };
        Ok(HttpClient {
            inner,
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_reuses_last_value() {
        assert_eq!(backoff_at(&[1, 2, 4], 0), 1);
        assert_eq!(backoff_at(&[1, 2, 4], 2), 4);
        assert_eq!(backoff_at(&[1, 2, 4], 9), 4);
        assert_eq!(backoff_at(&[], 0), 1);
    }

    #[test]
    fn cancelled_token_sends_nothing() -> Result<(), reqwest::Error> {
        // Unroutable URL: a request attempt would surface as a connect error instead.
        let client = HttpClient::builder().retry_count(1).build()?;
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            client.get("http://127.0.0.1:9/", &cancel),
            Err(RequestError::Cancelled)
        ));
        Ok(())
    }

    #[test]
    fn backoff_sleep_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let handle = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            handle.cancel();
        });
        let started = Instant::now();
        assert!(!sleep_unless_cancelled(Duration::from_secs(30), &cancel));
        assert!(started.elapsed() < Duration::from_secs(5));
        let _ = canceller.join();
        assert!(sleep_unless_cancelled(Duration::ZERO, &CancellationToken::new()));
    }

    #[test]
    fn default_backoff_doubles() -> Result<(), reqwest::Error> {
        assert_eq!(HttpClient::new()?.backoff_secs, vec![1, 2, 4]);
        Ok(())
    }

    #[test]
    fn builder_clamps_retry_count() {
        let builder = HttpClient::builder().retry_count(0);
        assert_eq!(builder.retry_count, 1);
    }

    #[test]
    fn empty_backoff_list_gets_exponential_default() -> Result<(), reqwest::Error> {
        let client = HttpClient::builder()
            .retry_count(4)
            .retry_backoff_secs(Vec::new())
            .build()?;
        assert_eq!(client.backoff_secs, vec![1, 2, 4]);
        Ok(())
    }
}
