//! Jittered exponential backoff around a fallible operation.

use crate::config::{
    BACKOFF_JITTER, STATUS_BACKOFF_BASE, STATUS_BACKOFF_CAP, TRANSPORT_ATTEMPTS,
    TRANSPORT_BACKOFF_BASE, TRANSPORT_BACKOFF_CAP,
};
use rand::Rng;
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; never less than one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Up to this fraction of each delay is added at random.
    pub jitter: f64,
}

impl RetryPolicy {
    /// Connection errors and timeouts: 2s, 4s, 8s, capped at 10s.
    pub fn transport() -> Self {
        Self {
            max_attempts: TRANSPORT_ATTEMPTS,
            base_delay: TRANSPORT_BACKOFF_BASE,
            max_delay: TRANSPORT_BACKOFF_CAP,
            jitter: BACKOFF_JITTER,
        }
    }

    /// Retryable HTTP statuses: 1s, 2s, 4s ... after the first try.
    pub fn status(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            base_delay: STATUS_BACKOFF_BASE,
            max_delay: STATUS_BACKOFF_CAP,
            jitter: BACKOFF_JITTER,
        }
    }

    /// Same attempt count, no waiting. For tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Wait before retry number `retry` (1-based), jitter included, never above `max_delay`.
    pub fn delay_for(&self, retry: u32, rng: &mut impl Rng) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let jitter = if self.jitter > 0.0 {
            backoff.mul_f64(rng.gen_range(0.0..=self.jitter))
        } else {
            Duration::ZERO
        };
        (backoff + jitter).min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails with an error `is_retryable` rejects, or
/// the policy's attempts run out. The closure receives the 1-based attempt
/// number. The last error is returned unchanged.
pub fn with_backoff<T, E, F, P>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut rng = rand::thread_rng();
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = policy.delay_for(attempt, &mut rng);
                warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient failure"
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
