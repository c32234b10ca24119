//! Per-identity fraud state: reputation entries and rate windows.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::StoreError;
use provote_types::Timestamp;

/// Trust level of an identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Clean,
    Suspicious,
    Blocked,
}

/// Trust state for one IP address, user or device fingerprint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReputationEntry {
    pub identity: String,
    /// Successes inside the current reputation window.
    pub success_count: u64,
    /// Violations inside the current reputation window.
    pub violation_count: u64,
    /// Escalation-weighted violation total inside the current window.
    pub violation_score: f64,
    pub severity: Severity,
    /// Number of blocks ever imposed; drives the exponential backoff.
    pub block_count: u32,
    pub block_expires_at: Option<Timestamp>,
    /// Free-text reason attached to the current block.
    pub block_reason: Option<String>,
    /// Start of the current reputation window.
    pub window_started_at: Timestamp,
    pub last_updated: Timestamp,
}

impl ReputationEntry {
    pub fn new(identity: impl Into<String>, now: Timestamp) -> Self {
        Self {
            identity: identity.into(),
            window_started_at: now,
            last_updated: now,
            ..Default::default()
        }
    }

    /// Whether a block is in force at `now` (ignores expired blocks).
    pub fn is_blocked_at(&self, now: Timestamp) -> bool {
        self.severity == Severity::Blocked
            && self.block_expires_at.map(|exp| now < exp).unwrap_or(false)
    }
}

/// Timestamps of recent requests from one identity, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    hits: VecDeque<Timestamp>,
}

impl RateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop hits older than `window_ms`. A fully stale window releases its
    /// allocation entirely.
    pub fn prune(&mut self, now: Timestamp, window_ms: u64) {
        let fully_stale = self
            .hits
            .back()
            .map(|last| last.has_expired(window_ms, now))
            .unwrap_or(false);
        if fully_stale {
            self.hits = VecDeque::new();
            return;
        }
        while let Some(oldest) = self.hits.front() {
            if oldest.has_expired(window_ms, now) {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record(&mut self, now: Timestamp) {
        self.hits.push_back(now);
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Recorded hits in arrival order.
    pub fn hits(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.hits.iter().copied()
    }

    pub fn newest(&self) -> Option<Timestamp> {
        self.hits.back().copied()
    }
}

/// One request carrying a given device fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
    /// Canonical voter identity, when known.
    pub voter: Option<String>,
    pub client: String,
    pub at: Timestamp,
}

/// Recent sightings of one device fingerprint, oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintActivity {
    sightings: VecDeque<Sighting>,
}

impl FingerprintActivity {
    /// Sightings kept per fingerprint; older ones are dropped first.
    pub const MAX_SIGHTINGS: usize = 256;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sighting: Sighting) {
        self.sightings.push_back(sighting);
        while self.sightings.len() > Self::MAX_SIGHTINGS {
            self.sightings.pop_front();
        }
    }

    /// Drop sightings older than `window_ms`.
    pub fn prune(&mut self, now: Timestamp, window_ms: u64) {
        while let Some(oldest) = self.sightings.front() {
            if oldest.at.has_expired(window_ms, now) {
                self.sightings.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sightings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sightings.is_empty()
    }

    pub fn sightings(&self) -> impl Iterator<Item = &Sighting> + '_ {
        self.sightings.iter()
    }

    pub fn newest(&self) -> Option<Timestamp> {
        self.sightings.back().map(|s| s.at)
    }
}

/// Per-identity fraud state with atomic read-modify-write.
///
/// Implementations serialize updates per identity and never across
/// identities, so unrelated callers do not contend.
pub trait FraudStateStore: Send + Sync {
    /// Atomically apply `f` to the identity's reputation entry (created with
    /// [`ReputationEntry::new`] if absent) and return the updated entry.
    fn update_reputation(
        &self,
        identity: &str,
        now: Timestamp,
        f: &mut dyn FnMut(&mut ReputationEntry),
    ) -> Result<ReputationEntry, StoreError>;

    fn reputation(&self, identity: &str) -> Result<Option<ReputationEntry>, StoreError>;

    /// Atomically apply `f` to the identity's rate window and return a copy of
    /// the result. Windows left empty are evicted.
    fn update_rate_window(
        &self,
        identity: &str,
        f: &mut dyn FnMut(&mut RateWindow),
    ) -> Result<RateWindow, StoreError>;

    /// Number of identities with a live rate window.
    fn tracked_windows(&self) -> usize;

    /// Atomically apply `f` to the fingerprint's recent activity. Activity
    /// left empty is evicted.
    fn update_fingerprint_activity(
        &self,
        fingerprint: &str,
        f: &mut dyn FnMut(&mut FingerprintActivity),
    ) -> Result<(), StoreError>;

    /// Drop every reputation entry for which `keep` is false. Returns the
    /// number removed.
    fn retain_reputations(
        &self,
        keep: &mut dyn FnMut(&ReputationEntry) -> bool,
    ) -> Result<usize, StoreError>;

    /// Drop every rate window for which `keep` is false.
    fn retain_rate_windows(
        &self,
        keep: &mut dyn FnMut(&RateWindow) -> bool,
    ) -> Result<usize, StoreError>;

    /// Drop every fingerprint's activity for which `keep` is false.
    fn retain_fingerprint_activity(
        &self,
        keep: &mut dyn FnMut(&FingerprintActivity) -> bool,
    ) -> Result<usize, StoreError>;
}
