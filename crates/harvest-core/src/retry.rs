//! Retry policy with fixed/doubled backoff
//!
//! Generic failures wait `base_delay`; throttling responses (429/403) wait
//! twice as long. Delays do not grow with the attempt number.

use std::time::Duration;

use crate::error::HttpError;
use crate::shutdown::Shutdown;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first one
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Wait before retrying after `err`
    pub fn delay_for(&self, err: &HttpError) -> Duration {
        if err.is_throttled() {
            self.base_delay * 2
        } else {
            self.base_delay
        }
    }
}

/// Result of [`retry_with_backoff`].
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Done(T),
    /// Attempts exhausted or the error was not retryable
    Failed(HttpError),
    /// Shutdown observed before an attempt or during a backoff sleep
    Stopped,
}

/// Retry a fallible HTTP operation under `policy`.
///
/// Shutdown is checked before every attempt and interrupts backoff sleeps.
/// No sleep follows the final attempt.
pub fn retry_with_backoff<T>(
    label: &str,
    policy: &RetryPolicy,
    shutdown: &Shutdown,
    mut attempt_fn: impl FnMut() -> Result<T, HttpError>,
) -> RetryOutcome<T> {
    let mut attempt = 0u32;
    loop {
        if shutdown.is_requested() {
            return RetryOutcome::Stopped;
        }
        attempt += 1;
        match attempt_fn() {
            Ok(v) => return RetryOutcome::Done(v),
            Err(HttpError::Aborted) => return RetryOutcome::Stopped,
            Err(e) if attempt < policy.max_retries && e.is_retryable() => {
                let delay = policy.delay_for(&e);
                log::warn!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {delay:?}",
                    policy.max_retries
                );
                if !shutdown.sleep(delay) {
                    return RetryOutcome::Stopped;
                }
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return RetryOutcome::Failed(e);
            }
        }
    }
}
