use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};

/// Floor applied after jitter so a retry never fires sooner than this.
const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Ceiling for the exponential backoff between attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Retries after the initial attempt; three attempts in total.
const RETRY_COUNT: usize = 2;

/// Backoff schedule shared by every outbound model call.
///
/// Exponential with randomized jitter, clamped to the 1s..=30s window.
/// Use with `tokio_retry::Retry::spawn`.
pub fn llm_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(1000)
        .max_delay(MAX_RETRY_DELAY)
        .map(jitter)
        .map(|delay| delay.max(MIN_RETRY_DELAY))
        .take(RETRY_COUNT)
}
