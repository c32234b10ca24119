//! In-memory fraud state.
//!
//! Each map is sharded by `DashMap`, and every update holds only the shard
//! lock of its own identity for the duration of the closure.

use dashmap::DashMap;
use provote_store::{
    FingerprintActivity, FraudStateStore, RateWindow, ReputationEntry, StoreError,
};
use provote_types::Timestamp;

#[derive(Default)]
pub struct MemoryFraudStore {
    reputations: DashMap<String, ReputationEntry>,
    windows: DashMap<String, RateWindow>,
    fingerprints: DashMap<String, FingerprintActivity>,
}

impl MemoryFraudStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities with a reputation entry.
    pub fn tracked_identities(&self) -> usize {
        self.reputations.len()
    }

    /// Number of fingerprints with recorded activity.
    pub fn tracked_fingerprints(&self) -> usize {
        self.fingerprints.len()
    }
}

/// `DashMap::retain` that reports how many entries it dropped.
fn retain_counting<V>(
    map: &DashMap<String, V>,
    keep: &mut dyn FnMut(&V) -> bool,
) -> usize {
    let mut removed = 0;
    map.retain(|_, value| {
        let kept = keep(value);
        if !kept {
            removed += 1;
        }
        kept
    });
    removed
}

impl FraudStateStore for MemoryFraudStore {
    fn update_reputation(
        &self,
        identity: &str,
        now: Timestamp,
        f: &mut dyn FnMut(&mut ReputationEntry),
    ) -> Result<ReputationEntry, StoreError> {
        let mut entry = self
            .reputations
            .entry(identity.to_string())
            .or_insert_with(|| ReputationEntry::new(identity, now));
        f(entry.value_mut());
        Ok(entry.value().clone())
    }

    fn reputation(&self, identity: &str) -> Result<Option<ReputationEntry>, StoreError> {
        Ok(self.reputations.get(identity).map(|e| e.value().clone()))
    }

    fn update_rate_window(
        &self,
        identity: &str,
        f: &mut dyn FnMut(&mut RateWindow),
    ) -> Result<RateWindow, StoreError> {
        let snapshot = {
            let mut window = self.windows.entry(identity.to_string()).or_default();
            f(window.value_mut());
            window.value().clone()
        };
        if snapshot.is_empty() {
            // Another caller may have refilled it between the two locks.
            self.windows.remove_if(identity, |_, w| w.is_empty());
        }
        Ok(snapshot)
    }

    fn tracked_windows(&self) -> usize {
        self.windows.len()
    }

    fn update_fingerprint_activity(
        &self,
        fingerprint: &str,
        f: &mut dyn FnMut(&mut FingerprintActivity),
    ) -> Result<(), StoreError> {
        let emptied = {
            let mut activity = self.fingerprints.entry(fingerprint.to_string()).or_default();
            f(activity.value_mut());
            activity.is_empty()
        };
        if emptied {
            self.fingerprints.remove_if(fingerprint, |_, a| a.is_empty());
        }
        Ok(())
    }

    fn retain_reputations(
        &self,
        keep: &mut dyn FnMut(&ReputationEntry) -> bool,
    ) -> Result<usize, StoreError> {
        Ok(retain_counting(&self.reputations, keep))
    }

    fn retain_rate_windows(
        &self,
        keep: &mut dyn FnMut(&RateWindow) -> bool,
    ) -> Result<usize, StoreError> {
        Ok(retain_counting(&self.windows, keep))
    }

    fn retain_fingerprint_activity(
        &self,
        keep: &mut dyn FnMut(&FingerprintActivity) -> bool,
    ) -> Result<usize, StoreError> {
        Ok(retain_counting(&self.fingerprints, keep))
    }
}
