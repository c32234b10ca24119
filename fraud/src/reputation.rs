//! Per-identity reputation with escalating, exponentially backed-off blocks.
//!
//! Violations accumulate a weighted score inside a rolling window. The n-th
//! violation in the window contributes `weight(kind) * n`, so repeat
//! offences escalate faster than isolated ones. Recorded successes dilute the
//! score. Severity is derived from the diluted score alone, which keeps it a
//! monotone function of the violation/success ratio.

use std::sync::Arc;

use provote_store::{FraudStateStore, ReputationEntry, Severity};
use provote_types::{AdmissionParams, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::FraudError;

/// What an identity did wrong. Heavier kinds escalate faster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    RateLimit,
    SuspiciousPattern,
    DuplicateVote,
}

impl ViolationKind {
    pub fn weight(self) -> f64 {
        match self {
            Self::RateLimit => 1.0,
            Self::SuspiciousPattern => 2.0,
            Self::DuplicateVote => 3.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::SuspiciousPattern => "suspicious_pattern",
            Self::DuplicateVote => "duplicate_vote",
        }
    }
}

/// Reputation thresholds and block durations, in milliseconds.
#[derive(Clone, Debug, PartialEq)]
pub struct ReputationPolicy {
    pub window_ms: u64,
    pub suspicious_score: f64,
    pub block_score: f64,
    pub success_credit: f64,
    pub block_base_ms: u64,
    pub block_cap_ms: u64,
}

impl ReputationPolicy {
    pub fn from_params(params: &AdmissionParams) -> Self {
        Self {
            window_ms: params.reputation_window_ms(),
            suspicious_score: params.suspicious_score,
            block_score: params.block_score,
            success_credit: params.success_credit,
            block_base_ms: params.block_duration_base_secs.saturating_mul(1000),
            block_cap_ms: params.block_duration_cap_secs.saturating_mul(1000),
        }
    }

    /// Length of the `block_number`-th block (1-based): `base * 2^(n-1)`, capped.
    pub fn block_duration_ms(&self, block_number: u32) -> u64 {
        let exponent = block_number.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        self.block_base_ms
            .saturating_mul(factor)
            .min(self.block_cap_ms)
    }

    /// Violation score after dilution by successes.
    pub fn effective_score(&self, entry: &ReputationEntry) -> f64 {
        entry.violation_score / (1.0 + entry.success_count as f64 * self.success_credit)
    }

    /// Severity for an entry that is not currently blocked.
    pub fn severity_for(&self, entry: &ReputationEntry) -> Severity {
        let score = self.effective_score(entry);
        if score >= self.block_score {
            Severity::Blocked
        } else if score >= self.suspicious_score {
            Severity::Suspicious
        } else {
            Severity::Clean
        }
    }

    /// Whether `entry` can be dropped without changing any later decision:
    /// no block is in force, its window has lapsed, and any block history is
    /// older than the block cap so the next block would start from base anyway.
    pub fn is_forgettable(&self, entry: &ReputationEntry, now: Timestamp) -> bool {
        !entry.is_blocked_at(now)
            && entry.window_started_at.has_expired(self.window_ms, now)
            && (entry.block_count == 0 || entry.last_updated.has_expired(self.block_cap_ms, now))
    }

    /// Start a fresh window if the current one has lapsed. Block history and
    /// any block in force are kept.
    fn roll_window(&self, entry: &mut ReputationEntry, now: Timestamp) {
        if entry.window_started_at.has_expired(self.window_ms, now) {
            entry.success_count = 0;
            entry.violation_count = 0;
            entry.violation_score = 0.0;
            entry.window_started_at = now;
        }
    }

    /// Drop a block whose expiry has passed.
    fn lift_expired_block(entry: &mut ReputationEntry, now: Timestamp) -> bool {
        if entry.severity == Severity::Blocked && !entry.is_blocked_at(now) {
            entry.severity = Severity::Clean;
            entry.block_expires_at = None;
            entry.block_reason = None;
            return true;
        }
        false
    }

    fn impose_block(&self, entry: &mut ReputationEntry, now: Timestamp, reason: &str) {
        entry.block_count = entry.block_count.saturating_add(1);
        let duration = self.block_duration_ms(entry.block_count);
        entry.severity = Severity::Blocked;
        entry.block_expires_at = Some(now.plus_millis(duration));
        entry.block_reason = Some(reason.to_string());
        // The block itself is the punishment; after it lifts the identity
        // starts from a clean score but keeps its block history.
        entry.violation_count = 0;
        entry.violation_score = 0.0;
    }
}

/// Reputation operations over a [`FraudStateStore`].
#[derive(Clone)]
pub struct ReputationTracker {
    store: Arc<dyn FraudStateStore>,
    policy: ReputationPolicy,
}

impl ReputationTracker {
    pub fn new(store: Arc<dyn FraudStateStore>, policy: ReputationPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &ReputationPolicy {
        &self.policy
    }

    /// Count a successful request. May relax `Suspicious` back toward `Clean`.
    pub fn record_success(
        &self,
        identity: &str,
        now: Timestamp,
    ) -> Result<ReputationEntry, FraudError> {
        let policy = &self.policy;
        let entry = self.store.update_reputation(identity, now, &mut |entry| {
            policy.roll_window(entry, now);
            ReputationPolicy::lift_expired_block(entry, now);
            entry.success_count += 1;
            if entry.severity != Severity::Blocked {
                entry.severity = policy.severity_for(entry).min(Severity::Suspicious);
            }
            entry.last_updated = now;
        })?;
        Ok(entry)
    }

    /// Count a violation and escalate severity. Crossing the block threshold
    /// imposes a block of `base * 2^prior_blocks`, capped.
    pub fn record_violation(
        &self,
        identity: &str,
        kind: ViolationKind,
        now: Timestamp,
    ) -> Result<ReputationEntry, FraudError> {
        let policy = &self.policy;
        let mut newly_blocked = false;
        let entry = self.store.update_reputation(identity, now, &mut |entry| {
            newly_blocked = false;
            policy.roll_window(entry, now);
            ReputationPolicy::lift_expired_block(entry, now);
            entry.violation_count += 1;
            entry.violation_score += kind.weight() * entry.violation_count as f64;
            entry.last_updated = now;

            if entry.is_blocked_at(now) {
                return;
            }
            match policy.severity_for(entry) {
                Severity::Blocked => {
                    policy.impose_block(entry, now, kind.as_str());
                    newly_blocked = true;
                }
                severity => entry.severity = severity,
            }
        })?;

        if newly_blocked {
            warn!(
                identity,
                reason = kind.as_str(),
                block_count = entry.block_count,
                until_ms = entry.block_expires_at.map(|t| t.as_millis()),
                "identity blocked"
            );
        } else {
            debug!(identity, kind = kind.as_str(), severity = ?entry.severity, "violation recorded");
        }
        Ok(entry)
    }

    /// The expiry of the block in force for `identity`, if any. An expired
    /// block is cleared as a side effect.
    pub fn is_blocked(
        &self,
        identity: &str,
        now: Timestamp,
    ) -> Result<Option<Timestamp>, FraudError> {
        let Some(entry) = self.store.reputation(identity)? else {
            return Ok(None);
        };
        if entry.is_blocked_at(now) {
            return Ok(entry.block_expires_at);
        }
        if entry.severity == Severity::Blocked {
            self.store.update_reputation(identity, now, &mut |entry| {
                if ReputationPolicy::lift_expired_block(entry, now) {
                    entry.last_updated = now;
                }
            })?;
            debug!(identity, "expired block lifted");
        }
        Ok(None)
    }

    /// Manually block `identity` for `duration_ms`. Does not count toward the
    /// automatic backoff.
    pub fn block(
        &self,
        identity: &str,
        duration_ms: u64,
        reason: &str,
        now: Timestamp,
    ) -> Result<ReputationEntry, FraudError> {
        let entry = self.store.update_reputation(identity, now, &mut |entry| {
            entry.severity = Severity::Blocked;
            entry.block_expires_at = Some(now.plus_millis(duration_ms));
            entry.block_reason = Some(reason.to_string());
            entry.last_updated = now;
        })?;
        info!(identity, duration_ms, reason, "identity blocked manually");
        Ok(entry)
    }

    /// Manual clearance: lift any block and forget the current window's
    /// violations. Block history is kept so later offences still back off.
    pub fn clear(&self, identity: &str, now: Timestamp) -> Result<ReputationEntry, FraudError> {
        let entry = self.store.update_reputation(identity, now, &mut |entry| {
            entry.severity = Severity::Clean;
            entry.block_expires_at = None;
            entry.block_reason = None;
            entry.violation_count = 0;
            entry.violation_score = 0.0;
            entry.last_updated = now;
        })?;
        info!(identity, "identity cleared");
        Ok(entry)
    }

    pub fn entry(&self, identity: &str) -> Result<Option<ReputationEntry>, FraudError> {
        Ok(self.store.reputation(identity)?)
    }
}
