// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Bounded retry with exponential backoff.
//!
//! Transient errors get up to three attempts; after that they escalate to
//! `RetriesExhausted`.

use std::fmt::Display;
use std::time::Duration;

use crate::error::{DriverError, DriverResult};

/// Attempts the harness allows any operation.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Why a retried operation gave up.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub last: E,
    /// False when the last error was not retryable.
    pub exhausted: bool,
}

/// Retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_ATTEMPTS,
            base_backoff: Duration::from_micros(50),
            max_backoff: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            max_backoff: base_backoff.saturating_mul(64),
        }
    }

    /// Wait before attempt `attempt + 1` (1-based `attempt`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects,
    /// or runs out of attempts. `wait` is called with each backoff.
    pub fn attempt<T, E: Display>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, E>,
        retryable: impl Fn(&E) -> bool,
        mut wait: impl FnMut(Duration),
    ) -> Result<T, RetryFailure<E>> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => {
                    return Err(RetryFailure {
                        attempts: attempt,
                        last: e,
                        exhausted: false,
                    })
                }
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryFailure {
                        attempts: attempt,
                        last: e,
                        exhausted: true,
                    })
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(attempt, error = %e, delay_us = delay.as_micros() as u64, "Retrying");
                    wait(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Retry transient driver errors, sleeping between attempts.
    pub fn run<T>(&self, op: impl FnMut(u32) -> DriverResult<T>) -> DriverResult<T> {
        self.run_with(op, std::thread::sleep)
    }

    /// Retry transient driver errors with a custom wait.
    pub fn run_with<T>(
        &self,
        op: impl FnMut(u32) -> DriverResult<T>,
        wait: impl FnMut(Duration),
    ) -> DriverResult<T> {
        self.attempt(op, DriverError::is_transient, wait)
            .map_err(|f| {
                if f.exhausted {
                    DriverError::RetriesExhausted {
                        attempts: f.attempts,
                        last: Box::new(f.last),
                    }
                } else {
                    f.last
                }
            })
    }
}
