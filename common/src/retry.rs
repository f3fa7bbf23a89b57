use std::fmt::Display;

use log::{info, warn};

use crate::collaborators::Delay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T, E> {
    Recovered { value: T, attempts: u32 },
    PermanentlyFailed { last_error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay_ms: u64) -> Self {
        Self {
            max_retries: max_retries.max(1),
            retry_delay_ms,
        }
    }

    /// Longest time `attempt` can block, not counting the operations.
    pub fn worst_case_delay_ms(&self) -> u64 {
        u64::from(self.max_retries.saturating_sub(1)).saturating_mul(self.retry_delay_ms)
    }

    /// Runs `operation` until it succeeds or `max_retries` attempts have been
    /// made, sleeping `retry_delay_ms` between attempts. The operation gets
    /// the 1-based attempt number.
    pub fn attempt<T, E, D, F>(
        &self,
        what: &str,
        delay: &mut D,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        E: Display,
        D: Delay + ?Sized,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max_retries = self.max_retries.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{what} recovered on attempt {attempt}/{max_retries}");
                    }
                    return RetryOutcome::Recovered {
                        value,
                        attempts: attempt,
                    };
                }
                Err(err) if attempt >= max_retries => {
                    warn!("{what} failed after {attempt} attempt(s): {err}");
                    return RetryOutcome::PermanentlyFailed {
                        last_error: err,
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    warn!("{what} attempt {attempt}/{max_retries} failed: {err}");
                    delay.delay_ms(self.retry_delay_ms);
                    attempt += 1;
                }
            }
        }
    }
}
