//! Bounded polling with exponential backoff and an overall deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// How long and how often to poll before giving up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: usize,
    /// Delay after the first failed attempt; doubles on every further attempt.
    pub base_delay: Duration,
    /// Upper bound for a single inter-attempt delay.
    pub max_delay: Duration,
    /// Upper bound for the whole loop, attempts and sleeps included.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            deadline: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }
}

/// A value that satisfied the readiness predicate.
#[derive(Debug)]
pub struct Polled<T> {
    pub value: T,
    pub attempts: usize,
}

/// The loop ran out of attempts or time.
#[derive(Debug)]
pub struct Exhausted<T, E> {
    pub attempts: usize,
    /// Most recent successfully fetched value that was not ready.
    pub last_observed: Option<T>,
    /// Error of the final attempt, when that attempt failed outright.
    pub last_error: Option<E>,
    pub deadline_reached: bool,
}

/// Call `op` until it yields a value for which `is_ready` holds.
///
/// Errors and not-ready values are both retried. The loop never sleeps past
/// `policy.deadline` and an in-flight attempt is cut off when the deadline
/// expires.
pub async fn poll_until<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut op: F,
    is_ready: P,
) -> Result<Polled<T>, Exhausted<T, E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut exhausted = Exhausted {
        attempts: 0,
        last_observed: None,
        last_error: None,
        deadline_reached: false,
    };

    for attempt in 1..=max_attempts {
        let remaining = policy.deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            exhausted.deadline_reached = true;
            break;
        }

        exhausted.attempts = attempt;
        match tokio::time::timeout(remaining, op(attempt)).await {
            Ok(Ok(value)) if is_ready(&value) => {
                return Ok(Polled {
                    value,
                    attempts: attempt,
                })
            }
            Ok(Ok(value)) => {
                exhausted.last_observed = Some(value);
                exhausted.last_error = None;
            }
            Ok(Err(err)) => exhausted.last_error = Some(err),
            Err(_) => {
                tracing::warn!(attempt, "Poll attempt cut off by deadline");
                exhausted.deadline_reached = true;
                break;
            }
        }

        if attempt == max_attempts {
            break;
        }

        let delay = policy.delay_for(attempt);
        if started.elapsed() + delay >= policy.deadline {
            exhausted.deadline_reached = true;
            break;
        }
        tokio::time::sleep(delay).await;
    }

    Err(exhausted)
}
