//! Bounded retry combinator
//!
//! [`retry`] runs an operation up to `budget` times, pausing `interval` between
//! failures, and stops early when its [`CancellationToken`] fires. The pause is
//! injected so the combinator itself does not depend on a particular runtime;
//! [`RetryPolicy::run`] wires it to `tokio::time::sleep`.

use std::fmt::Display;
use std::future::Future;
use std::pin::pin;
use std::time::Duration;

use futures::future::{select, Either};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_RETRY_BUDGET: u32 = 1000;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, never less than one
    pub budget: u32,
    /// Pause between two consecutive attempts
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: DEFAULT_RETRY_BUDGET,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl RetryPolicy {
    pub fn new(budget: u32, interval: Duration) -> Self {
        Self {
            budget: budget.max(1),
            interval,
        }
    }

    /// Worst-case time spent waiting before giving up
    pub fn max_wait(&self) -> Duration {
        self.interval * self.budget.saturating_sub(1)
    }

    /// Run `op` under this policy using the tokio timer
    pub async fn run<T, E, Op, Fut>(
        &self,
        cancel: &CancellationToken,
        op: Op,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        retry(self, cancel, tokio::time::sleep, op).await
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Attempt `op` until it succeeds, the budget runs out or `cancel` fires
///
/// `op` receives the 1-based attempt number. A budget of `n` yields at most
/// `n` attempts and `n - 1` pauses; no pause follows the last failure.
pub async fn retry<T, E, Op, Fut, S, SFut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut sleep: S,
    mut op: Op,
) -> Result<T, RetryError<E>>
where
    E: Display,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: FnMut(Duration) -> SFut,
    SFut: Future<Output = ()>,
{
    let budget = policy.budget.max(1);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        let outcome = match select(pin!(cancel.cancelled()), pin!(op(attempt))).await {
            Either::Left(_) => {
                return Err(RetryError::Cancelled {
                    attempts: attempt - 1,
                })
            }
            Either::Right((outcome, _)) => outcome,
        };

        match outcome {
            Ok(value) => {
                debug!(attempt, "Attempt succeeded");
                return Ok(value);
            }
            Err(e) if attempt >= budget => {
                warn!(attempt, budget, "Final attempt failed: {}", e);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                warn!(
                    attempt,
                    budget,
                    "Attempt failed: {}; retrying in {:?}",
                    e,
                    policy.interval
                );
            }
        }

        if let Either::Left(_) = select(pin!(cancel.cancelled()), pin!(sleep(policy.interval))).await
        {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
    }
}
