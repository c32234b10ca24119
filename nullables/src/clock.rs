//! Nullable clock: deterministic time for testing.

use provote_types::{Clock, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};

/// A deterministic clock for testing.
///
/// Time only advances when you tell it to. Safe to share across threads.
pub struct NullClock {
    current_ms: AtomicU64,
}

impl NullClock {
    pub fn new(initial_ms: u64) -> Self {
        Self {
            current_ms: AtomicU64::new(initial_ms),
        }
    }

    pub fn from_secs(initial_secs: u64) -> Self {
        Self::new(initial_secs * 1000)
    }

    /// Advance time by a number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.current_ms.fetch_add(millis, Ordering::SeqCst);
    }

    /// Advance time by a number of seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance_millis(secs * 1000);
    }

    /// Set the time to a specific value.
    pub fn set(&self, millis: u64) {
        self.current_ms.store(millis, Ordering::SeqCst);
    }
}

impl Clock for NullClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.current_ms.load(Ordering::SeqCst))
    }
}
