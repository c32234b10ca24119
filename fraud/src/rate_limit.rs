//! Sliding-window rate limiting.
//!
//! The window is pruned lazily on access. The count-and-record step runs as
//! one atomic update per identity, so concurrent requests from the same
//! source can never both take the last slot.

use std::sync::Arc;

use provote_store::FraudStateStore;
use provote_types::{AdmissionParams, Timestamp};

use crate::FraudError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateDecision {
    /// The request was counted. `recent` is the identity's window including it.
    Allowed { recent: Vec<Timestamp> },
    /// The window is full; the oldest hit leaves it after `retry_after_ms`.
    Denied { retry_after_ms: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn FraudStateStore>,
    window_ms: u64,
    limit: u32,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn FraudStateStore>, window_ms: u64, limit: u32) -> Self {
        Self {
            store,
            window_ms,
            limit,
        }
    }

    pub fn from_params(store: Arc<dyn FraudStateStore>, params: &AdmissionParams) -> Self {
        Self::new(store, params.rate_limit_window_ms(), params.rate_limit_max_requests)
    }

    /// Count one request from `identity` at `now`, or deny it if the trailing
    /// window already holds `limit` requests. Denied requests are not recorded.
    pub fn check(&self, identity: &str, now: Timestamp) -> Result<RateDecision, FraudError> {
        let window_ms = self.window_ms;
        let limit = self.limit as usize;
        let mut allowed = false;
        let window = self.store.update_rate_window(identity, &mut |w| {
            w.prune(now, window_ms);
            allowed = w.len() < limit;
            if allowed {
                w.record(now);
            }
        })?;

        if allowed {
            return Ok(RateDecision::Allowed {
                recent: window.hits().collect(),
            });
        }
        let retry_after_ms = window
            .hits()
            .next()
            .map(|oldest| now.elapsed_since(oldest.plus_millis(window_ms)))
            .unwrap_or(window_ms)
            .max(1);
        Ok(RateDecision::Denied { retry_after_ms })
    }

    pub fn allow(&self, identity: &str, now: Timestamp) -> Result<bool, FraudError> {
        Ok(self.check(identity, now)?.is_allowed())
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryFraudStore;

    fn limiter(limit: u32) -> (Arc<MemoryFraudStore>, RateLimiter) {
        let store = Arc::new(MemoryFraudStore::new());
        let limiter = RateLimiter::new(store.clone(), 60_000, limit);
        (store, limiter)
    }

    #[test]
    fn request_over_limit_is_denied() {
        let (_, limiter) = limiter(100);
        let now = Timestamp::from_secs(1_000);
        for i in 0..100 {
            assert!(limiter.allow("ip", now.plus_millis(i)).unwrap(), "request {}", i + 1);
        }
        assert!(!limiter.allow("ip", now.plus_millis(100)).unwrap());
    }

    #[test]
    fn window_reopens_after_it_elapses() {
        let (_, limiter) = limiter(2);
        let now = Timestamp::from_secs(0);
        assert!(limiter.allow("ip", now).unwrap());
        assert!(limiter.allow("ip", now).unwrap());
        match limiter.check("ip", now.plus_millis(10)).unwrap() {
            RateDecision::Denied { retry_after_ms } => assert_eq!(retry_after_ms, 59_990),
            other => panic!("expected denial, got {other:?}"),
        }
        assert!(limiter.allow("ip", now.plus_millis(60_000)).unwrap());
    }

    #[test]
    fn identities_are_independent() {
        let (_, limiter) = limiter(1);
        let now = Timestamp::from_secs(0);
        assert!(limiter.allow("a", now).unwrap());
        assert!(!limiter.allow("a", now).unwrap());
        assert!(limiter.allow("b", now).unwrap());
    }

    #[test]
    fn allowed_decision_carries_recent_history() {
        let (_, limiter) = limiter(10);
        limiter.allow("ip", Timestamp::from_millis(5)).unwrap();
        match limiter.check("ip", Timestamp::from_millis(9)).unwrap() {
            RateDecision::Allowed { recent } => {
                assert_eq!(recent, vec![Timestamp::from_millis(5), Timestamp::from_millis(9)])
            }
            other => panic!("expected allow, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_requests_never_exceed_limit() {
        let (_, limiter) = limiter(50);
        let now = Timestamp::from_secs(1);
        let allowed: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = limiter.clone();
                    s.spawn(move || {
                        (0..20)
                            .filter(|_| limiter.allow("shared", now).unwrap())
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(allowed, 50);
    }

    #[test]
    fn fully_stale_window_starts_over() {
        let (store, limiter) = limiter(5);
        for _ in 0..3 {
            limiter.allow("ip", Timestamp::from_secs(0)).unwrap();
        }
        match limiter.check("ip", Timestamp::from_secs(120)).unwrap() {
            RateDecision::Allowed { recent } => assert_eq!(recent, vec![Timestamp::from_secs(120)]),
            other => panic!("expected allow, got {other:?}"),
        }
        assert_eq!(store.tracked_windows(), 1);
    }
}
