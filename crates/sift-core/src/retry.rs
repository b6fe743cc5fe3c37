//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

/// Longest sleep between two attempts, whatever the schedule says.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: 2.0,
        }
    }

    /// Delay after failed attempt `attempt` (0-indexed):
    /// `base_delay * multiplier^attempt`, capped at [`MAX_BACKOFF`].
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

/// Why `retry` gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
    /// A non-retryable error ended the loop early.
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

/// Run `op` until it succeeds, the budget runs out, or it fails with an
/// error `is_retryable` rejects. `on_failure` sees every failed attempt
/// (0-indexed) before the backoff sleep.
pub async fn retry<T, E, Op, Fut, P, F>(
    policy: &RetryPolicy,
    mut op: Op,
    is_retryable: P,
    mut on_failure: F,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    F: FnMut(u32, &E),
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !is_retryable(&error) => {
                return Err(RetryError::Aborted { attempt, error });
            }
            Err(error) => {
                on_failure(attempt, &error);
                if attempt + 1 >= policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: error,
                    });
                }
                tokio::time::sleep(policy.next_delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}
