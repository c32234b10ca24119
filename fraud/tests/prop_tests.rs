use std::sync::Arc;

use proptest::prelude::*;

use provote_fraud::{
    FingerprintProfile, MemoryFraudStore, PatternAnalyzer, RateLimiter, ReputationPolicy,
    ReputationTracker, RequestSignals, ViolationKind,
};
use provote_store::Severity;
use provote_types::{AdmissionParams, Timestamp};

fn signals_strategy() -> impl Strategy<Value = RequestSignals> {
    (proptest::option::of("[a-zA-Z/ .0-9]{0,24}"), any::<bool>()).prop_map(
        |(user_agent, has_client_signals)| RequestSignals {
            user_agent,
            has_client_signals,
        },
    )
}

fn violation_strategy() -> impl Strategy<Value = ViolationKind> {
    prop_oneof![
        Just(ViolationKind::RateLimit),
        Just(ViolationKind::SuspiciousPattern),
        Just(ViolationKind::DuplicateVote),
    ]
}

proptest! {
    /// Pattern risk is always within [0, 1].
    #[test]
    fn pattern_score_is_bounded(
        signals in signals_strategy(),
        history in proptest::collection::vec(0u64..10_000_000, 0..64),
        min_interval in 0u64..10_000,
        voters in 0usize..5,
        clients in 0usize..5,
        span_ms in 0u64..10_000_000,
    ) {
        let analyzer = PatternAnalyzer::new(min_interval, 0.7);
        let history: Vec<Timestamp> = history.into_iter().map(Timestamp::from_millis).collect();
        let profile = FingerprintProfile {
            distinct_voters: voters,
            distinct_clients: clients,
            sightings: voters.max(clients).max(1),
            span_ms,
        };
        let score = analyzer.score(&signals, &history, Some(&profile));
        prop_assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
    }

    /// No sequence of requests gets more than `limit` admissions into any window.
    #[test]
    fn rate_limiter_never_exceeds_limit(
        limit in 1u32..20,
        offsets in proptest::collection::vec(0u64..5_000, 1..200),
    ) {
        let window_ms = 1_000;
        let limiter = RateLimiter::new(Arc::new(MemoryFraudStore::new()), window_ms, limit);
        let mut times = offsets;
        times.sort_unstable();

        let mut admitted = Vec::new();
        for t in times {
            if limiter.allow("id", Timestamp::from_millis(t)).unwrap() {
                admitted.push(t);
            }
        }
        for (i, &t) in admitted.iter().enumerate() {
            let in_window = admitted[i..].iter().take_while(|&&u| u < t + window_ms).count();
            prop_assert!(in_window <= limit as usize);
        }
    }

    /// Block durations never shrink with repeat offences and never exceed the cap.
    #[test]
    fn block_duration_monotone_and_capped(
        base_secs in 1u64..10_000,
        cap_factor in 1u64..1_000,
        n in 1u32..80,
    ) {
        let params = AdmissionParams {
            block_duration_base_secs: base_secs,
            block_duration_cap_secs: base_secs * cap_factor,
            ..AdmissionParams::standard()
        };
        let policy = ReputationPolicy::from_params(&params);
        let this = policy.block_duration_ms(n);
        let next = policy.block_duration_ms(n + 1);
        prop_assert!(next >= this);
        prop_assert!(next <= params.block_duration_cap_secs * 1000);
        prop_assert!(this >= base_secs * 1000);
    }

    /// Severity never decreases as violations accumulate inside one window,
    /// until a block is imposed.
    #[test]
    fn severity_escalates_monotonically(
        kinds in proptest::collection::vec(violation_strategy(), 1..20),
    ) {
        let tracker = ReputationTracker::new(
            Arc::new(MemoryFraudStore::new()),
            ReputationPolicy::from_params(&AdmissionParams::standard()),
        );
        let now = Timestamp::from_secs(1);
        let mut last = Severity::Clean;
        for kind in kinds {
            let entry = tracker.record_violation("id", kind, now).unwrap();
            prop_assert!(entry.severity >= last);
            last = entry.severity;
            if last == Severity::Blocked {
                prop_assert!(entry.block_expires_at.unwrap() > now);
            }
        }
    }
}
