use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_SHIFT: usize = 5;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Bounded retry settings shared by the model clients.
pub(crate) struct RetryPolicy {
    pub(crate) max_retries: usize,
    pub(crate) budget_ms: u64,
}

impl RetryPolicy {
    /// Returns the pause before retry number `attempt + 1`, or `None` when the
    /// attempt count or elapsed budget is exhausted.
    pub(crate) fn delay_for(
        &self,
        attempt: usize,
        elapsed_ms: u64,
        retry_after_ms: Option<u64>,
    ) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let backoff_ms = backoff_ms(attempt).max(retry_after_ms.unwrap_or_default());
        if self.budget_ms > 0 && elapsed_ms.saturating_add(backoff_ms) > self.budget_ms {
            return None;
        }
        Some(Duration::from_millis(backoff_ms))
    }
}

pub(crate) fn backoff_ms(attempt: usize) -> u64 {
    BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(MAX_BACKOFF_SHIFT))
}

pub(crate) fn should_retry_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429) || status >= 500
}

pub(crate) fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

pub(crate) fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at
        .signed_duration_since(Utc::now())
        .num_milliseconds();
    Some(u64::try_from(delay_ms).unwrap_or(0))
}

pub(crate) fn new_request_id() -> String {
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("hat-{}-{count}", hat_timestamp_ms())
}

fn hat_timestamp_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
