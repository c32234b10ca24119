//! Bounded retry with jittered exponential backoff.
//!
//! Wraps a storage call that returns a future. Only errors the caller classifies as
//! transient are retried; anything else returns immediately. The loop stops
//! at whichever comes first: `max_attempts` or the overall deadline.

use std::future::Future;
use std::time::Duration;

use provote_types::{AdmissionParams, Jitter};
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    pub deadline_ms: u64,
}

impl RetryPolicy {
    pub fn from_params(params: &AdmissionParams) -> Self {
        Self {
            max_attempts: params.write_max_attempts.max(1),
            backoff_min_ms: params.write_backoff_min_ms,
            backoff_max_ms: params.write_backoff_max_ms,
            deadline_ms: params.write_deadline_ms,
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    ///
    /// The ceiling doubles per attempt from `backoff_min_ms` up to
    /// `backoff_max_ms`; `fraction` picks a point between the floor and it.
    pub fn backoff_ms(&self, attempt: u32, fraction: f64) -> u64 {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let ceiling = self
            .backoff_min_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        let spread = ceiling.saturating_sub(self.backoff_min_ms) as f64;
        self.backoff_min_ms + (spread * fraction.clamp(0.0, 1.0)) as u64
    }
}

/// A successful result and the number of attempts it took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// A non-transient error; not retried.
    Permanent(E),
    /// Every attempt failed transiently.
    Exhausted { attempts: u32, last: E },
    /// The next backoff would overrun the deadline.
    DeadlineExceeded { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Permanent(_) => 1,
            Self::Exhausted { attempts, .. } | Self::DeadlineExceeded { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent(e)
            | Self::Exhausted { last: e, .. }
            | Self::DeadlineExceeded { last: e, .. } => e,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy gives up.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_transient<T, E, Op, Fut, Transient>(
    policy: &RetryPolicy,
    jitter: &dyn Jitter,
    is_transient: Transient,
    mut op: Op,
) -> Result<Retried<T>, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Transient: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let deadline = Duration::from_millis(policy.deadline_ms);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match op(attempt).await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                })
            }
            Err(e) if !is_transient(&e) => return Err(RetryError::Permanent(e)),
            Err(e) => e,
        };

        if attempt >= policy.max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }
        let delay = Duration::from_millis(policy.backoff_ms(attempt, jitter.fraction()));
        if started.elapsed() + delay > deadline {
            return Err(RetryError::DeadlineExceeded {
                attempts: attempt,
                last: err,
            });
        }
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after transient error"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Jitter drawn from the thread-local RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn fraction(&self) -> f64 {
        rand::random::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl Jitter for Fixed {
        fn fraction(&self) -> f64 {
            self.0
        }
    }

    fn policy(max_attempts: u32, deadline_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_min_ms: 1,
            backoff_max_ms: 8,
            deadline_ms,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            backoff_min_ms: 10,
            backoff_max_ms: 500,
            deadline_ms: 10_000,
        };
        assert_eq!(p.backoff_ms(1, 1.0), 10);
        assert_eq!(p.backoff_ms(2, 1.0), 20);
        assert_eq!(p.backoff_ms(3, 1.0), 40);
        assert_eq!(p.backoff_ms(20, 1.0), 500);
        assert_eq!(p.backoff_ms(20, 0.0), 10);
        assert_eq!(p.backoff_ms(70, 0.5), 255);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let mut failures = 2;
        let result = retry_transient(&policy(5, 10_000), &Fixed(0.0), |e: &&str| *e == "busy", |_| {
            let result = if failures > 0 {
                failures -= 1;
                Err("busy")
            } else {
                Ok(42)
            };
            async move { result }
        })
        .await
        .unwrap();
        assert_eq!(result, Retried { value: 42, attempts: 3 });
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let mut calls = 0;
        let err = retry_transient(&policy(5, 10_000), &Fixed(0.0), |e: &&str| *e == "busy", |_| {
            calls += 1;
            async { Err::<(), _>("duplicate") }
        })
        .await
        .unwrap_err();
        assert_eq!(err, RetryError::Permanent("duplicate"));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let err = retry_transient(&policy(3, 10_000), &Fixed(0.5), |_: &&str| true, |_| async {
            Err::<(), _>("busy")
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts(), 3);
        assert!(matches!(err, RetryError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn deadline_cuts_the_loop_short() {
        let slow = RetryPolicy {
            max_attempts: 100,
            backoff_min_ms: 50,
            backoff_max_ms: 50,
            deadline_ms: 120,
        };
        let err = retry_transient(&slow, &Fixed(0.0), |_: &&str| true, |_| async {
            Err::<(), _>("busy")
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::DeadlineExceeded { .. }));
        assert!(err.attempts() < 100);
        assert_eq!(err.into_inner(), "busy");
    }

    #[test]
    fn random_jitter_is_a_fraction() {
        for _ in 0..100 {
            let f = RandomJitter.fraction();
            assert!((0.0..1.0).contains(&f));
        }
    }
}
