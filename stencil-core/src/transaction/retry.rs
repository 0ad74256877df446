//! Bounded retry with a delay schedule and a retryable predicate

use std::time::Duration;

use tracing::warn;

use super::Deadline;
use crate::{Error, Result};

/// How often, how patiently, and on which errors to retry
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Wait after failed attempt `n` (1-based)
    pub delay: fn(u32) -> Duration,
    pub retryable: fn(&Error) -> bool,
}

fn linear_delay(attempt: u32) -> Duration {
    Duration::from_millis(100 * u64::from(attempt))
}

impl RetryPolicy {
    /// `max_retries` retries after the first attempt, waiting 100ms × attempt,
    /// retrying only transient errors
    pub fn linear(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries + 1,
            delay: linear_delay,
            retryable: Error::is_transient,
        }
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out
    ///
    /// `before_retry` restores state between attempts; its errors end the
    /// loop. The deadline is checked before every attempt and bounds each wait.
    pub fn run<T>(
        &self,
        operation: &str,
        deadline: &Deadline,
        mut op: impl FnMut(u32) -> Result<T>,
        mut before_retry: impl FnMut(u32) -> Result<()>,
    ) -> Result<T> {
        let mut attempt = 1;
        loop {
            deadline.check()?;

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && (self.retryable)(&err) => {
                    warn!(
                        operation = %operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    before_retry(attempt)?;
                    deadline.sleep((self.delay)(attempt))?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(super::MAX_RETRIES)
    }
}
