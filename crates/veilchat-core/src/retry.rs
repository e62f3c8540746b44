//! Bounded retry with exponential backoff.
//!
//! One policy type drives every retry loop in the system: directory fetches,
//! directory uploads and key generation. The delay before retry `n` (zero
//! based, counting failed attempts) is `base_delay * 2^n + jitter`, where
//! jitter is drawn uniformly from `0..=max_jitter` using the environment RNG.

use std::{future::Future, time::Duration};

use crate::env::Environment;

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry policy parameterized by attempt count and base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(200),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, for tests that only count attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, base_delay: Duration::ZERO, max_jitter: Duration::ZERO }
    }

    /// Backoff before the retry that follows failed attempt `attempt`.
    ///
    /// `jitter_sample` is reduced into `0..=max_jitter` at millisecond
    /// granularity.
    pub fn delay_for(&self, attempt: u32, jitter_sample: u64) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let backoff = self.base_delay.saturating_mul(factor);

        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(jitter_sample % (jitter_ms + 1))
        };

        backoff.saturating_add(jitter)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the zero-based attempt number. Errors for which
    /// `is_transient` returns false are returned immediately. On exhaustion
    /// the last error is returned.
    pub async fn run<Env, T, Err, F, Fut>(
        &self,
        env: &Env,
        operation: &str,
        is_transient: impl Fn(&Err) -> bool,
        mut op: F,
    ) -> Result<T, Err>
    where
        Env: Environment,
        Err: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Err>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if !is_transient(&error) => return Err(error),
                Err(error) if attempt + 1 >= max_attempts => {
                    tracing::warn!(operation, attempts = attempt + 1, %error, "retries exhausted");
                    return Err(error);
                },
                Err(error) => {
                    let delay = self.delay_for(attempt, env.random_u64());
                    tracing::debug!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "attempt failed, backing off"
                    );
                    env.sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }
}
