//! The fraud gate: one admit/deny decision per request.
//!
//! Checks run in a fixed order and stop at the first denial:
//!
//! 1. identity or fingerprint blocked → `Blocked`
//! 2. rate window full → violation, `RateLimited`
//! 3. pattern risk above threshold → violation, `SuspiciousPattern`
//! 4. otherwise → success, `Admit`
//!
//! Violations and successes are recorded against the network identity and,
//! when present, the device fingerprint. Fingerprints sent by the client are
//! also profiled: one device voting as several users or from several
//! networks raises the pattern risk. Header-derived fingerprints are not
//! profiled since real users collide on them.

use std::fmt;
use std::sync::Arc;

use provote_store::{FraudStateStore, Sighting};
use provote_types::{AdmissionParams, Timestamp};
use tracing::debug;

use crate::pattern::{FingerprintProfile, PatternAnalyzer, RequestSignals};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::reputation::{ReputationPolicy, ReputationTracker, ViolationKind};
use crate::FraudError;

#[derive(Clone, Debug, PartialEq)]
pub enum DenyReason {
    Blocked { until: Timestamp },
    RateLimited { retry_after_ms: u64 },
    SuspiciousPattern { score: f64 },
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "blocked",
            Self::RateLimited { .. } => "rate_limited",
            Self::SuspiciousPattern { .. } => "suspicious_pattern",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked { until } => write!(f, "blocked until {until}"),
            Self::RateLimited { retry_after_ms } => {
                write!(f, "rate limited, retry after {retry_after_ms}ms")
            }
            Self::SuspiciousPattern { score } => write!(f, "suspicious pattern (risk {score:.2})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Admit { risk_score: f64 },
    Deny(DenyReason),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit { .. })
    }
}

/// Who a request comes from, as far as the gate can tell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subject<'a> {
    /// Network identity, usually the client IP.
    pub client: &'a str,
    pub fingerprint: Option<&'a str>,
    /// Canonical voter identity.
    pub voter: Option<&'a str>,
}

impl<'a> Subject<'a> {
    pub fn new(client: &'a str) -> Self {
        Self {
            client,
            fingerprint: None,
            voter: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<&'a str>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn with_voter(mut self, voter: &'a str) -> Self {
        self.voter = Some(voter);
        self
    }

    /// The client, then the fingerprint when present.
    fn identities(&self) -> impl Iterator<Item = &'a str> {
        std::iter::once(self.client).chain(self.fingerprint)
    }
}

#[derive(Clone)]
pub struct FraudGate {
    store: Arc<dyn FraudStateStore>,
    reputation: ReputationTracker,
    limiter: RateLimiter,
    analyzer: PatternAnalyzer,
    fingerprint_window_ms: u64,
}

impl FraudGate {
    /// Build every part from `params` over one shared state store.
    pub fn from_params(store: Arc<dyn FraudStateStore>, params: &AdmissionParams) -> Self {
        Self {
            reputation: ReputationTracker::new(store.clone(), ReputationPolicy::from_params(params)),
            limiter: RateLimiter::from_params(store.clone(), params),
            analyzer: PatternAnalyzer::from_params(params),
            fingerprint_window_ms: params.fingerprint_window_ms(),
            store,
        }
    }

    pub fn reputation(&self) -> &ReputationTracker {
        &self.reputation
    }

    pub fn evaluate(
        &self,
        subject: &Subject<'_>,
        signals: &RequestSignals,
        now: Timestamp,
    ) -> Result<Decision, FraudError> {
        let identity = subject.client;
        let fingerprint = subject.fingerprint;
        if let Some(until) = self.blocked_until(subject, now)? {
            debug!(identity, fingerprint, "denied: blocked");
            return Ok(Decision::Deny(DenyReason::Blocked { until }));
        }

        let recent = match self.limiter.check(identity, now)? {
            RateDecision::Allowed { recent } => recent,
            RateDecision::Denied { retry_after_ms } => {
                self.report_violation(subject, ViolationKind::RateLimit, now)?;
                debug!(identity, retry_after_ms, "denied: rate limited");
                return Ok(Decision::Deny(DenyReason::RateLimited { retry_after_ms }));
            }
        };

        let profile = match fingerprint {
            Some(fp) if signals.has_client_signals => Some(self.observe(fp, subject, now)?),
            _ => None,
        };
        let score = self.analyzer.score(signals, &recent, profile.as_ref());
        if self.analyzer.is_suspicious(score) {
            self.report_violation(subject, ViolationKind::SuspiciousPattern, now)?;
            debug!(identity, score, "denied: suspicious pattern");
            return Ok(Decision::Deny(DenyReason::SuspiciousPattern { score }));
        }

        for id in subject.identities() {
            self.reputation.record_success(id, now)?;
        }
        Ok(Decision::Admit { risk_score: score })
    }

    /// Record a violation detected outside the gate (e.g. a second distinct
    /// vote) against the client and fingerprint.
    pub fn report_violation(
        &self,
        subject: &Subject<'_>,
        kind: ViolationKind,
        now: Timestamp,
    ) -> Result<(), FraudError> {
        for id in subject.identities() {
            self.reputation.record_violation(id, kind, now)?;
        }
        Ok(())
    }

    /// Forget reputation, rate and fingerprint state that can no longer
    /// affect a decision. Returns the number of entries removed.
    pub fn purge_stale(&self, now: Timestamp) -> Result<usize, FraudError> {
        let policy = self.reputation.policy();
        let rate_window_ms = self.limiter.window_ms();
        let fingerprint_window_ms = self.fingerprint_window_ms;

        let reputations = self
            .store
            .retain_reputations(&mut |entry| !policy.is_forgettable(entry, now))?;
        let windows = self.store.retain_rate_windows(&mut |window| {
            window
                .newest()
                .is_some_and(|t| !t.has_expired(rate_window_ms, now))
        })?;
        let fingerprints = self.store.retain_fingerprint_activity(&mut |activity| {
            activity
                .newest()
                .is_some_and(|t| !t.has_expired(fingerprint_window_ms, now))
        })?;

        let removed = reputations + windows + fingerprints;
        debug!(reputations, windows, fingerprints, "purged stale fraud state");
        Ok(removed)
    }

    /// Record this request against the fingerprint and summarise its
    /// recent activity.
    fn observe(
        &self,
        fingerprint: &str,
        subject: &Subject<'_>,
        now: Timestamp,
    ) -> Result<FingerprintProfile, FraudError> {
        let window_ms = self.fingerprint_window_ms;
        let mut profile = FingerprintProfile::default();
        self.store
            .update_fingerprint_activity(fingerprint, &mut |activity| {
                activity.prune(now, window_ms);
                activity.record(Sighting {
                    voter: subject.voter.map(str::to_string),
                    client: subject.client.to_string(),
                    at: now,
                });
                profile = FingerprintProfile::from_activity(activity);
            })?;
        Ok(profile)
    }

    /// Manually block a device fingerprint.
    pub fn block_fingerprint(
        &self,
        fingerprint: &str,
        duration_ms: u64,
        reason: &str,
        now: Timestamp,
    ) -> Result<(), FraudError> {
        self.reputation.block(fingerprint, duration_ms, reason, now)?;
        Ok(())
    }

    /// Manually clear an identity or fingerprint.
    pub fn clear(&self, identity: &str, now: Timestamp) -> Result<(), FraudError> {
        self.reputation.clear(identity, now)?;
        Ok(())
    }

    /// Latest expiry among the blocks on the client and fingerprint.
    fn blocked_until(
        &self,
        subject: &Subject<'_>,
        now: Timestamp,
    ) -> Result<Option<Timestamp>, FraudError> {
        let mut until = None;
        for id in subject.identities() {
            until = until.max(self.reputation.is_blocked(id, now)?);
        }
        Ok(until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryFraudStore;
    use provote_store::Severity;

    const UA: &str = "Mozilla/5.0";

    fn gate(params: &AdmissionParams) -> FraudGate {
        FraudGate::from_params(Arc::new(MemoryFraudStore::new()), params)
    }

    #[test]
    fn browser_request_is_admitted_and_credited() {
        let gate = gate(&AdmissionParams::standard());
        let now = Timestamp::from_secs(10);
        let decision = gate
            .evaluate(
                &Subject::new("10.0.0.1").with_fingerprint(Some("fp")),
                &RequestSignals::browser(UA),
                now,
            )
            .unwrap();
        assert!(decision.is_admitted());
        let entry = gate.reputation().entry("10.0.0.1").unwrap().unwrap();
        assert_eq!(entry.success_count, 1);
        assert_eq!(gate.reputation().entry("fp").unwrap().unwrap().success_count, 1);
    }

    #[test]
    fn hundred_and_first_request_is_rate_limited() {
        let gate = gate(&AdmissionParams::standard());
        let start = Timestamp::from_secs(1_000);
        let signals = RequestSignals::browser(UA);
        for i in 0..100 {
            let d = gate
                .evaluate(&Subject::new("x"), &signals, start.plus_millis(i * 500))
                .unwrap();
            assert!(d.is_admitted(), "request {} denied: {d:?}", i + 1);
        }
        let d = gate.evaluate(&Subject::new("x"), &signals, start.plus_millis(50_000)).unwrap();
        assert!(matches!(d, Decision::Deny(DenyReason::RateLimited { .. })));
        assert_eq!(gate.reputation().entry("x").unwrap().unwrap().violation_count, 1);
    }

    #[test]
    fn blocked_fingerprint_denies_any_ip() {
        let gate = gate(&AdmissionParams::standard());
        let now = Timestamp::from_secs(0);
        gate.block_fingerprint("fp-bad", 60_000, "manual", now).unwrap();
        let banned_device = Subject::new("10.9.9.9").with_fingerprint(Some("fp-bad"));
        let d = gate
            .evaluate(&banned_device, &RequestSignals::browser(UA), now)
            .unwrap();
        assert_eq!(
            d,
            Decision::Deny(DenyReason::Blocked {
                until: now.plus_millis(60_000)
            })
        );

        gate.clear("fp-bad", now).unwrap();
        assert!(gate
            .evaluate(&banned_device, &RequestSignals::browser(UA), now)
            .unwrap()
            .is_admitted());
    }

    #[test]
    fn scripted_client_is_denied_then_blocked() {
        let gate = gate(&AdmissionParams::standard());
        let start = Timestamp::from_secs(0);
        let bot = RequestSignals::default();
        let mut reasons = Vec::new();
        for i in 0..12 {
            let now = start.plus_millis(i * 50);
            if let Decision::Deny(reason) = gate.evaluate(&Subject::new("bot"), &bot, now).unwrap() {
                reasons.push(reason.code());
            }
        }
        assert!(reasons.contains(&"suspicious_pattern"));
        assert_eq!(reasons.last(), Some(&"blocked"));
        let entry = gate.reputation().entry("bot").unwrap().unwrap();
        assert_eq!(entry.severity, Severity::Blocked);
    }

    #[test]
    fn reported_duplicate_counts_against_both_identities() {
        let gate = gate(&AdmissionParams::standard());
        let now = Timestamp::from_secs(0);
        let subject = Subject::new("ip").with_fingerprint(Some("fp"));
        gate.report_violation(&subject, ViolationKind::DuplicateVote, now)
            .unwrap();
        assert_eq!(gate.reputation().entry("ip").unwrap().unwrap().violation_score, 3.0);
        assert_eq!(gate.reputation().entry("fp").unwrap().unwrap().violation_score, 3.0);
    }

    #[test]
    fn one_device_voting_as_many_users_is_denied() {
        let gate = gate(&AdmissionParams::standard());
        let start = Timestamp::from_secs(0);
        let signals = RequestSignals::browser(UA);
        let sightings = [
            ("user:1", "10.0.0.1", 0),
            ("user:2", "10.0.0.2", 900),
            ("user:3", "10.0.0.3", 960),
        ];

        let mut decisions = Vec::new();
        for (voter, client, at_secs) in sightings {
            let subject = Subject::new(client)
                .with_fingerprint(Some("fp-shared"))
                .with_voter(voter);
            decisions.push(gate.evaluate(&subject, &signals, start.plus_secs(at_secs)).unwrap());
        }

        assert!(decisions[0].is_admitted());
        // Two users on two networks at 8 per hour: 0.4 + 0.3, not above 0.7.
        assert!(decisions[1].is_admitted());
        // A third within the hour pushes the rate past 10 per hour.
        assert!(matches!(
            decisions[2],
            Decision::Deny(DenyReason::SuspiciousPattern { .. })
        ));
        assert_eq!(gate.reputation().entry("fp-shared").unwrap().unwrap().violation_count, 1);
    }

    #[test]
    fn header_derived_fingerprints_are_not_profiled() {
        let gate = gate(&AdmissionParams::standard());
        let now = Timestamp::from_secs(0);
        let signals = RequestSignals {
            has_client_signals: false,
            ..RequestSignals::browser(UA)
        };
        for (i, voter) in ["user:1", "user:2", "user:3"].iter().enumerate() {
            let client = format!("10.0.0.{i}");
            let subject = Subject::new(&client)
                .with_fingerprint(Some("derived"))
                .with_voter(voter);
            assert!(gate.evaluate(&subject, &signals, now).unwrap().is_admitted());
        }
    }

    #[test]
    fn stale_state_is_purged() {
        let store = Arc::new(MemoryFraudStore::new());
        let gate = FraudGate::from_params(store.clone(), &AdmissionParams::standard());
        let start = Timestamp::from_secs(1_000);
        let signals = RequestSignals::browser(UA);

        for i in 0..10_000u32 {
            let client = format!("10.{}.{}.{}", i >> 16, (i >> 8) & 0xff, i & 0xff);
            let fingerprint = format!("fp-{i}");
            let subject = Subject::new(&client).with_fingerprint(Some(&fingerprint));
            gate.evaluate(&subject, &signals, start).unwrap();
        }
        gate.block_fingerprint("fp-banned", 40 * 86_400_000, "manual", start)
            .unwrap();
        assert_eq!(store.tracked_identities(), 20_001);
        assert_eq!(store.tracked_windows(), 10_000);
        assert_eq!(store.tracked_fingerprints(), 10_000);

        let later = start.plus_secs(30 * 86_400);
        gate.evaluate(&Subject::new("10.9.9.9"), &signals, later).unwrap();
        let removed = gate.purge_stale(later).unwrap();

        assert_eq!(removed, 40_000);
        assert_eq!(store.tracked_identities(), 2);
        assert!(gate.reputation().entry("fp-banned").unwrap().is_some());
        assert!(gate.reputation().entry("10.9.9.9").unwrap().is_some());
        assert_eq!(store.tracked_windows(), 1);
        assert_eq!(store.tracked_fingerprints(), 0);
    }
}
