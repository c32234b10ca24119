//! Admission parameters: every tunable of the fraud gate, the idempotency
//! resolver and the durable-write retry loop.

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// All tunables read by the admission pipeline.
///
/// Missing fields in a TOML `[params]` table fall back to [`Default`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionParams {
    // ── Rate limiting ────────────────────────────────────────────────────
    /// Length of the sliding rate-limit window in seconds.
    pub rate_limit_window_secs: u64,

    /// Maximum requests per identity inside one window.
    pub rate_limit_max_requests: u32,

    // ── Pattern analysis ─────────────────────────────────────────────────
    /// Risk scores strictly above this value are treated as automation.
    /// `1.0` disables pattern denials.
    pub pattern_risk_threshold: f64,

    /// Mean inter-request gap (ms) below which timing counts as inhuman.
    pub pattern_min_interval_ms: u64,

    /// How long sightings of a device fingerprint (voter, client, time) are
    /// remembered when judging whether the device is shared, in seconds.
    pub fingerprint_window_secs: u64,

    // ── Reputation ───────────────────────────────────────────────────────
    /// Rolling window (seconds) over which violations accumulate.
    pub reputation_window_secs: u64,

    /// Weighted violation score at which an identity becomes `Suspicious`.
    pub suspicious_score: f64,

    /// Weighted violation score at which an identity becomes `Blocked`.
    pub block_score: f64,

    /// How much each recorded success dilutes the violation score.
    pub success_credit: f64,

    /// Duration of the first block in seconds. Repeat offenders get
    /// `base * 2^prior_blocks`, capped at `block_duration_cap_secs`.
    pub block_duration_base_secs: u64,

    /// Upper bound on any automatic block, in seconds.
    pub block_duration_cap_secs: u64,

    // ── Idempotency ──────────────────────────────────────────────────────
    /// How long idempotency records are retained before GC, in seconds.
    pub idempotency_retention_secs: u64,

    /// A reservation not completed or failed within this many seconds may be
    /// reclaimed by another caller.
    pub reservation_ttl_secs: u64,

    /// How long a caller waits on another caller's in-flight reservation
    /// before giving up with a retryable conflict, in milliseconds.
    pub reservation_wait_ms: u64,

    /// Poll interval while waiting on an in-flight reservation, in milliseconds.
    pub reservation_poll_interval_ms: u64,

    /// How long vote attempts stay in the audit log before GC, in seconds.
    pub attempt_retention_secs: u64,

    // ── Durable write retry ──────────────────────────────────────────────
    /// Maximum attempts (including the first) for the durable write.
    pub write_max_attempts: u32,

    /// Lower bound of the jittered backoff between attempts, in milliseconds.
    pub write_backoff_min_ms: u64,

    /// Upper bound of the jittered backoff between attempts, in milliseconds.
    pub write_backoff_max_ms: u64,

    /// Overall deadline for the retry loop, in milliseconds.
    pub write_deadline_ms: u64,
}

impl AdmissionParams {
    /// Production defaults.
    pub fn standard() -> Self {
        Self {
            rate_limit_window_secs: 60,
            rate_limit_max_requests: 100,

            pattern_risk_threshold: 0.7,
            pattern_min_interval_ms: 1000,
            fingerprint_window_secs: 86_400,

            reputation_window_secs: 3600,
            suspicious_score: 2.0,
            block_score: 5.0,
            success_credit: 0.05,
            block_duration_base_secs: 300,    // 5 minutes
            block_duration_cap_secs: 86_400, // 1 day

            idempotency_retention_secs: 3600,
            reservation_ttl_secs: 30,
            reservation_wait_ms: 5000,
            reservation_poll_interval_ms: 10,
            attempt_retention_secs: 604_800, // 7 days

            write_max_attempts: 5,
            write_backoff_min_ms: 10,
            write_backoff_max_ms: 500,
            write_deadline_ms: 3000,
        }
    }

    /// Settings for load and contention testing: rate limiting and pattern
    /// denials are effectively off so only the idempotency and uniqueness
    /// paths are exercised.
    pub fn load_test() -> Self {
        Self {
            rate_limit_max_requests: u32::MAX,
            pattern_risk_threshold: 1.0,
            reservation_wait_ms: 30_000,
            reservation_poll_interval_ms: 2,
            write_backoff_min_ms: 1,
            write_backoff_max_ms: 5,
            ..Self::standard()
        }
    }

    pub fn rate_limit_window_ms(&self) -> u64 {
        self.rate_limit_window_secs.saturating_mul(1000)
    }

    pub fn reputation_window_ms(&self) -> u64 {
        self.reputation_window_secs.saturating_mul(1000)
    }

    pub fn fingerprint_window_ms(&self) -> u64 {
        self.fingerprint_window_secs.saturating_mul(1000)
    }

    pub fn attempt_retention_ms(&self) -> u64 {
        self.attempt_retention_secs.saturating_mul(1000)
    }

    pub fn idempotency_retention_ms(&self) -> u64 {
        self.idempotency_retention_secs.saturating_mul(1000)
    }

    pub fn reservation_ttl_ms(&self) -> u64 {
        self.reservation_ttl_secs.saturating_mul(1000)
    }

    /// Check that the parameters are internally consistent.
    pub fn validate(&self) -> Result<(), ValidationError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ValidationError {
            ValidationError::InvalidParam {
                field,
                reason: reason.into(),
            }
        }

        if self.rate_limit_window_secs == 0 {
            return Err(invalid("rate_limit_window_secs", "must be non-zero"));
        }
        if self.rate_limit_max_requests == 0 {
            return Err(invalid("rate_limit_max_requests", "must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.pattern_risk_threshold) {
            return Err(invalid("pattern_risk_threshold", "must lie in [0, 1]"));
        }
        if self.fingerprint_window_secs == 0 {
            return Err(invalid("fingerprint_window_secs", "must be non-zero"));
        }
        if self.reputation_window_secs == 0 {
            return Err(invalid("reputation_window_secs", "must be non-zero"));
        }
        if !(self.suspicious_score > 0.0 && self.suspicious_score <= self.block_score) {
            return Err(invalid(
                "suspicious_score",
                "must be positive and not exceed block_score",
            ));
        }
        if self.success_credit < 0.0 {
            return Err(invalid("success_credit", "must not be negative"));
        }
        if self.block_duration_base_secs == 0 {
            return Err(invalid("block_duration_base_secs", "must be non-zero"));
        }
        if self.block_duration_cap_secs < self.block_duration_base_secs {
            return Err(invalid(
                "block_duration_cap_secs",
                "must be at least block_duration_base_secs",
            ));
        }
        if self.reservation_ttl_secs == 0 {
            return Err(invalid("reservation_ttl_secs", "must be non-zero"));
        }
        if self.idempotency_retention_secs < self.reservation_ttl_secs {
            return Err(invalid(
                "idempotency_retention_secs",
                "must be at least reservation_ttl_secs",
            ));
        }
        if self.attempt_retention_secs == 0 {
            return Err(invalid("attempt_retention_secs", "must be non-zero"));
        }
        if self.reservation_poll_interval_ms == 0 {
            return Err(invalid("reservation_poll_interval_ms", "must be non-zero"));
        }
        if self.write_max_attempts == 0 {
            return Err(invalid("write_max_attempts", "must be at least 1"));
        }
        if self.write_backoff_min_ms > self.write_backoff_max_ms {
            return Err(invalid(
                "write_backoff_min_ms",
                "must not exceed write_backoff_max_ms",
            ));
        }
        Ok(())
    }
}

impl Default for AdmissionParams {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AdmissionParams::standard().validate().is_ok());
        assert!(AdmissionParams::load_test().validate().is_ok());
    }

    #[test]
    fn zero_window_is_rejected() {
        let params = AdmissionParams {
            rate_limit_window_secs: 0,
            ..AdmissionParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ValidationError::InvalidParam {
                field: "rate_limit_window_secs",
                ..
            })
        ));
    }

    #[test]
    fn inverted_backoff_bounds_are_rejected() {
        let params = AdmissionParams {
            write_backoff_min_ms: 100,
            write_backoff_max_ms: 10,
            ..AdmissionParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn cap_below_base_is_rejected() {
        let params = AdmissionParams {
            block_duration_base_secs: 600,
            block_duration_cap_secs: 60,
            ..AdmissionParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let params = AdmissionParams {
            pattern_risk_threshold: 1.5,
            ..AdmissionParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn millisecond_helpers() {
        let params = AdmissionParams::standard();
        assert_eq!(params.rate_limit_window_ms(), 60_000);
        assert_eq!(params.reservation_ttl_ms(), 30_000);
        assert_eq!(params.attempt_retention_ms(), 604_800_000);
    }
}
