//! Stateless automation scoring.

use std::collections::HashSet;

use provote_store::FingerprintActivity;
use provote_types::{AdmissionParams, Timestamp};
use provote_utils::stats;
use serde::{Deserialize, Serialize};

const MISSING_USER_AGENT: f64 = 0.25;
const MISSING_CLIENT_SIGNALS: f64 = 0.15;
const RAPID_FIRE: f64 = 0.35;
const METRONOMIC: f64 = 0.25;

const SHARED_ACROSS_VOTERS: f64 = 0.4;
const SHARED_ACROSS_CLIENTS: f64 = 0.3;
const HIGH_FREQUENCY: f64 = 0.2;

/// Distinct voters (or clients) on one fingerprint that mark it as shared.
const SHARED_FINGERPRINT_MIN: usize = 2;
/// Sightings per hour above which a fingerprint is voting too often.
const HIGH_FREQUENCY_PER_HOUR: f64 = 10.0;
const HOUR_MS: f64 = 3_600_000.0;

/// Coefficient of variation under which inter-request gaps look scripted.
const METRONOMIC_CV: f64 = 0.1;
/// Gaps needed before regularity is judged.
const MIN_GAPS_FOR_VARIANCE: usize = 5;

/// Client-side signals accompanying one request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSignals {
    pub user_agent: Option<String>,
    /// Whether the client sent the browser-side signals a real page would
    /// (a fingerprint or client token).
    pub has_client_signals: bool,
}

impl RequestSignals {
    pub fn browser(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
            has_client_signals: true,
        }
    }

    fn has_user_agent(&self) -> bool {
        self.user_agent
            .as_deref()
            .map(|ua| !ua.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Summary of a device fingerprint's recent sightings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FingerprintProfile {
    pub distinct_voters: usize,
    pub distinct_clients: usize,
    pub sightings: usize,
    /// Time between the oldest and newest sighting.
    pub span_ms: u64,
}

impl FingerprintProfile {
    pub fn from_activity(activity: &FingerprintActivity) -> Self {
        let mut voters = HashSet::new();
        let mut clients = HashSet::new();
        let mut oldest = None;
        let mut newest = None;
        for s in activity.sightings() {
            if let Some(voter) = &s.voter {
                voters.insert(voter.as_str());
            }
            clients.insert(s.client.as_str());
            oldest = oldest.or(Some(s.at));
            newest = Some(s.at);
        }
        let span_ms = match (oldest, newest) {
            (Some(first), Some(last)) => first.elapsed_since(last),
            _ => 0,
        };
        Self {
            distinct_voters: voters.len(),
            distinct_clients: clients.len(),
            sightings: activity.len(),
            span_ms,
        }
    }

    /// Sightings per hour, or `None` when they all share one instant.
    pub fn per_hour(&self) -> Option<f64> {
        (self.span_ms > 0).then(|| self.sightings as f64 / (self.span_ms as f64 / HOUR_MS))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatternAnalyzer {
    min_interval_ms: u64,
    threshold: f64,
}

impl PatternAnalyzer {
    pub fn new(min_interval_ms: u64, threshold: f64) -> Self {
        Self {
            min_interval_ms,
            threshold,
        }
    }

    pub fn from_params(params: &AdmissionParams) -> Self {
        Self::new(params.pattern_min_interval_ms, params.pattern_risk_threshold)
    }

    /// Risk in `[0, 1]` that the request is automated.
    ///
    /// `history` holds the identity's recent request times in arrival order,
    /// including the current one. `fingerprint` summarises the device's
    /// recent sightings, including this request, when one is tracked.
    pub fn score(
        &self,
        signals: &RequestSignals,
        history: &[Timestamp],
        fingerprint: Option<&FingerprintProfile>,
    ) -> f64 {
        let mut risk = 0.0;
        if !signals.has_user_agent() {
            risk += MISSING_USER_AGENT;
        }
        if !signals.has_client_signals {
            risk += MISSING_CLIENT_SIGNALS;
        }

        let mut millis: Vec<u64> = history.iter().map(Timestamp::as_millis).collect();
        millis.sort_unstable();
        let gaps = stats::gaps(&millis);
        if let Some(mean_gap) = stats::mean(&gaps) {
            if mean_gap < self.min_interval_ms as f64 {
                risk += RAPID_FIRE;
            }
        }
        if gaps.len() >= MIN_GAPS_FOR_VARIANCE {
            if let Some(cv) = stats::coefficient_of_variation(&gaps) {
                if cv < METRONOMIC_CV {
                    risk += METRONOMIC;
                }
            }
        }

        if let Some(profile) = fingerprint {
            if profile.distinct_voters >= SHARED_FINGERPRINT_MIN {
                risk += SHARED_ACROSS_VOTERS;
            }
            if profile.distinct_clients >= SHARED_FINGERPRINT_MIN {
                risk += SHARED_ACROSS_CLIENTS;
            }
            if profile.per_hour().is_some_and(|rate| rate > HIGH_FREQUENCY_PER_HOUR) {
                risk += HIGH_FREQUENCY;
            }
        }
        risk.min(1.0)
    }

    pub fn is_suspicious(&self, score: f64) -> bool {
        score > self.threshold
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> PatternAnalyzer {
        PatternAnalyzer::from_params(&AdmissionParams::standard())
    }

    fn spaced(start: u64, step: u64, n: u64) -> Vec<Timestamp> {
        (0..n).map(|i| Timestamp::from_millis(start + i * step)).collect()
    }

    #[test]
    fn first_browser_request_is_clean() {
        let browser = RequestSignals::browser("Mozilla/5.0");
        let score = analyzer().score(&browser, &spaced(0, 0, 1), None);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn bare_client_is_penalised_but_not_denied() {
        let a = analyzer();
        let score = a.score(&RequestSignals::default(), &spaced(0, 0, 1), None);
        assert!((score - 0.4).abs() < 1e-9);
        assert!(!a.is_suspicious(score));
    }

    #[test]
    fn rapid_metronomic_headless_client_is_suspicious() {
        let a = analyzer();
        let score = a.score(&RequestSignals::default(), &spaced(0, 100, 10), None);
        assert!(score > 0.99 && score <= 1.0);
        assert!(a.is_suspicious(score));
    }

    #[test]
    fn irregular_human_pace_scores_low() {
        let history: Vec<Timestamp> = [0u64, 4_000, 11_000, 13_500, 30_000, 31_700]
            .into_iter()
            .map(Timestamp::from_millis)
            .collect();
        let score = analyzer().score(&RequestSignals::browser("Mozilla/5.0"), &history, None);
        assert_eq!(score, 0.0);
    }

    fn activity(sightings: &[(Option<&str>, &str, u64)]) -> FingerprintActivity {
        let mut activity = FingerprintActivity::new();
        for &(voter, client, at) in sightings {
            activity.record(provote_store::Sighting {
                voter: voter.map(str::to_string),
                client: client.to_string(),
                at: Timestamp::from_millis(at),
            });
        }
        activity
    }

    #[test]
    fn profile_counts_distinct_voters_and_clients() {
        let profile = FingerprintProfile::from_activity(&activity(&[
            (Some("user:1"), "10.0.0.1", 0),
            (Some("user:2"), "10.0.0.1", 60_000),
            (None, "10.0.0.2", 120_000),
            (Some("user:1"), "10.0.0.1", 180_000),
        ]));
        assert_eq!(profile.distinct_voters, 2);
        assert_eq!(profile.distinct_clients, 2);
        assert_eq!(profile.sightings, 4);
        assert_eq!(profile.span_ms, 180_000);
        assert!((profile.per_hour().unwrap() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn single_sighting_has_no_rate() {
        let profile = FingerprintProfile::from_activity(&activity(&[(None, "a", 5)]));
        assert_eq!(profile.per_hour(), None);
    }

    #[test]
    fn fingerprint_shared_by_voters_across_clients_is_suspicious() {
        let a = analyzer();
        let browser = RequestSignals::browser("Mozilla/5.0");
        let one_instant = spaced(0, 0, 1);

        let own_device = FingerprintProfile::from_activity(&activity(&[
            (Some("user:1"), "10.0.0.1", 0),
            (Some("user:1"), "10.0.0.1", 1_800_000),
        ]));
        assert_eq!(a.score(&browser, &one_instant, Some(&own_device)), 0.0);

        let household = FingerprintProfile::from_activity(&activity(&[
            (Some("user:1"), "10.0.0.1", 0),
            (Some("user:2"), "10.0.0.1", 1_800_000),
        ]));
        let score = a.score(&browser, &one_instant, Some(&household));
        assert!((score - 0.4).abs() < 1e-9);
        assert!(!a.is_suspicious(score));

        let farm: Vec<(Option<&str>, &str, u64)> = vec![
            (Some("user:1"), "10.0.0.1", 0),
            (Some("user:2"), "10.0.0.2", 60_000),
            (Some("user:3"), "10.0.0.3", 120_000),
        ];
        let farm = FingerprintProfile::from_activity(&activity(&farm));
        let score = a.score(&browser, &one_instant, Some(&farm));
        assert!((score - 0.9).abs() < 1e-9);
        assert!(a.is_suspicious(score));
    }

    #[test]
    fn regular_but_slow_browser_is_below_threshold() {
        let a = analyzer();
        let browser = RequestSignals::browser("Mozilla/5.0");
        let score = a.score(&browser, &spaced(0, 5_000, 8), None);
        assert!((score - 0.25).abs() < 1e-9);
        assert!(!a.is_suspicious(score));
    }
}
