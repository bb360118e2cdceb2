//! Bounded retry with exponential backoff and jitter.
//!
//! Operations report each attempt as a tagged [`Attempt`]: succeed, retry
//! with the policy's backoff, or abort immediately. A single explicit loop
//! ([`run`]) consumes those outcomes, so callers decide *what* is transient
//! and this module decides *when* to give up.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of a single attempt, as classified by the operation itself.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// The operation succeeded; stop and return the value.
    Success(T),
    /// The failure is transient; try again if budget remains.
    Retry(E),
    /// The failure is definitive; stop immediately and surface it.
    Abort(E),
}

/// Errors produced by [`run`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a transient error; carries the last
    /// one observed.
    #[error("All retry attempts exhausted after {attempts} tries: {last}")]
    AttemptsExhausted { attempts: u32, last: E },

    /// The operation aborted with a non-retryable error.
    #[error("Non-retryable failure: {source}")]
    NonRetryable { source: E },

    /// The retry policy is invalid.
    #[error("Invalid retry configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Randomization applied to a backoff delay so concurrent callers do not
/// retry in lockstep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Jitter {
    /// Use the computed delay unchanged.
    None,
    /// Draw uniformly from `[0, delay]`.
    Full,
    /// Draw uniformly from `[delay/2, delay]`.
    Equal,
}

impl Jitter {
    /// Apply this jitter to a computed backoff delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(random_up_to(delay_ms)),
            Jitter::Equal => {
                let half = delay_ms / 2;
                Duration::from_millis(half + random_up_to(delay_ms - half))
            }
        }
    }
}

fn random_up_to(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max_ms)
}

/// Retry budget and backoff curve for [`run`].
///
/// `max_attempts` counts every try, the first one included, and must be at
/// least 1. The delay before retry `n` doubles from `base_delay` and is
/// capped at `max_backoff` (`Duration::MAX` leaves it uncapped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, initial try included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_backoff: Duration,
    /// Randomization applied after the cap.
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_backoff: Duration::MAX,
            jitter: Jitter::Equal,
        }
    }
}

impl RetryPolicy {
    /// Compute the capped, un-jittered delay before retry `retry_number`
    /// (1-based: the wait after the first failed attempt is retry 1).
    pub fn backoff_delay(&self, retry_number: u32) -> Duration {
        let shift = retry_number.saturating_sub(1).min(8);
        let multiplier = 1u32 << shift;
        self.base_delay.saturating_mul(multiplier).min(self.max_backoff)
    }

    fn validation_error(&self) -> Option<String> {
        if self.max_attempts == 0 {
            return Some("max_attempts must be at least 1".to_string());
        }
        None
    }
}

/// Drive `operation` until it succeeds, aborts, or the policy's attempt
/// budget runs out.
///
/// The closure receives the 1-based attempt number. Transient failures are
/// logged at debug level with the error's debug representation; exhaustion
/// is logged at warn.
pub async fn run<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryError<E>>
where
    E: fmt::Debug,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    if let Some(message) = policy.validation_error() {
        return Err(RetryError::InvalidConfiguration { message });
    }

    let mut attempt = 1u32;
    loop {
        match operation(attempt).await {
            Attempt::Success(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retrying");
                }
                return Ok(value);
            }
            Attempt::Abort(error) => {
                debug!(attempt, error = ?error, "aborting on non-retryable failure");
                return Err(RetryError::NonRetryable { source: error });
            }
            Attempt::Retry(error) => {
                if attempt >= policy.max_attempts {
                    warn!(attempts = attempt, error = ?error, "retry attempts exhausted");
                    return Err(RetryError::AttemptsExhausted { attempts: attempt, last: error });
                }

                let delay = policy.jitter.apply(policy.backoff_delay(attempt));
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = ?error,
                    "retrying after transient failure"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
