//! Retry helpers for transient errors.
//!
//! Fetchers issue single attempts through [`send_json`], which classifies
//! the outcome into a [`SourceError`]. The fetch phase wraps each page in
//! [`retry`], which retries transient errors (timeouts, connection resets,
//! HTTP 429, HTTP 5xx, truncated bodies) with exponential backoff plus
//! random jitter, and gives up immediately on permanent ones.
//!
//! ```ignore
//! let policy = RetryPolicy::from(&definition.fetch);
//! let page = retry::retry(&policy, "riverside", || fetcher.fetch_page(0, 500)).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

use crate::SourceError;
use crate::source_def::FetchPolicy;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 500;

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on the exponential part of any delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&FetchPolicy::default())
    }
}

impl From<&FetchPolicy> for RetryPolicy {
    fn from(policy: &FetchPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts.max(1),
            base_delay: Duration::from_millis(policy.base_delay_ms),
            max_delay: Duration::from_millis(policy.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based), without jitter.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus up to 50% random jitter.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        let jitter_ms = u64::try_from(backoff.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        backoff + Duration::from_millis(jitter)
    }
}

/// The final error of a retried operation and how many attempts were made.
#[derive(Debug)]
pub struct RetryError {
    /// Last error observed.
    pub error: SourceError,
    /// Attempts made, including the first.
    pub attempts: u32,
}

/// Runs `op` until it succeeds, fails permanently, or exhausts the policy.
///
/// # Errors
///
/// Returns [`RetryError`] with the last error if every attempt failed or a
/// permanent error occurred.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                log::warn!(
                    "[{label}] transient error (attempt {attempt}/{}), retrying in {delay:?}: {error}",
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(RetryError {
                    error,
                    attempts: attempt,
                });
            }
        }
    }
}

/// Sends one HTTP request and parses the response body as JSON.
///
/// Non-success statuses become [`SourceError::Status`]; an unparseable
/// body becomes [`SourceError::Json`] after logging a preview of what was
/// received. Both are retried by [`retry`] when transient.
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails, the status is not 2xx,
/// or the body is not valid JSON.
pub async fn send_json(request: reqwest::RequestBuilder) -> Result<serde_json::Value, SourceError> {
    let response = request.send().await?;
    let url = response.url().to_string();
    let status = response.status();

    if !status.is_success() {
        return Err(SourceError::Status {
            status: status.as_u16(),
            url,
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
        log::warn!(
            "JSON parse failed\n  \
             url: {url}\n  \
             status: {status}\n  \
             content-type: {content_type:?}\n  \
             received: {} bytes\n  \
             parse error: {e}\n  \
             body preview: {preview}",
            text.len(),
        );
        SourceError::Json(e)
    })
}
