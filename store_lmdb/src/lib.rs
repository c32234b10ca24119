//! LMDB storage backend for the provote admission engine.
//!
//! Implements the storage traits from `provote-store` using the `heed` LMDB
//! bindings. Each logical store maps to one or more LMDB databases within a
//! single environment. LMDB admits one writer at a time, so every
//! check-and-write below runs inside one write transaction and is atomic.

pub mod attempt;
pub mod directory;
pub mod environment;
pub mod error;
pub mod idempotency;
pub mod vote;

pub use environment::LmdbEnvironment;
pub use error::LmdbError;
