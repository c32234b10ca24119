//! Nullable jitter: deterministic backoff fractions.

use provote_types::Jitter;
use std::sync::Mutex;

/// Returns pre-configured fractions in order, cycling when exhausted.
pub struct NullJitter {
    fractions: Vec<f64>,
    index: Mutex<usize>,
}

impl NullJitter {
    pub fn new(fractions: Vec<f64>) -> Self {
        assert!(!fractions.is_empty(), "NullJitter needs at least one value");
        Self {
            fractions,
            index: Mutex::new(0),
        }
    }

    /// The same fraction for every call.
    pub fn constant(fraction: f64) -> Self {
        Self::new(vec![fraction])
    }

    /// No jitter: every backoff is the lower bound.
    pub fn zero() -> Self {
        Self::constant(0.0)
    }
}

impl Jitter for NullJitter {
    fn fraction(&self) -> f64 {
        let mut idx = self.index.lock().unwrap();
        let value = self.fractions[*idx % self.fractions.len()];
        *idx += 1;
        value
    }
}
