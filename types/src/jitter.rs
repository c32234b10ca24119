//! Source of randomness for backoff jitter.

/// Yields uniformly distributed fractions in `[0, 1)`.
///
/// Retry loops scale their backoff by this value so that contending callers
/// spread out instead of retrying in lockstep.
pub trait Jitter: Send + Sync {
    fn fraction(&self) -> f64;
}
