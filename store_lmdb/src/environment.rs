//! LMDB environment setup and shared helpers.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::LmdbError;

/// Number of named databases opened below.
const MAX_DBS: u32 = 8;

/// Default map size: 1 GiB.
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Wraps the LMDB environment and all database handles.
pub struct LmdbEnvironment {
    pub(crate) env: Arc<Env>,
    /// `vote_id (be u64)` → bincode [`VoteRecord`](provote_types::VoteRecord).
    pub(crate) votes_db: Database<Bytes, Bytes>,
    /// `poll_id (be u64) ++ voter canonical` → `vote_id (be u64)`. The
    /// uniqueness index on `(poll, voter)`.
    pub(crate) voter_index_db: Database<Bytes, Bytes>,
    /// scoped key → bincode [`IdempotencyRecord`](provote_store::IdempotencyRecord).
    pub(crate) keys_db: Database<Bytes, Bytes>,
    /// `poll_id (be u64)` → bincode [`PollInfo`](provote_store::PollInfo).
    pub(crate) polls_db: Database<Bytes, Bytes>,
    /// `poll_id (be u64) ++ seq (be u64)` → bincode [`VoteAttempt`](provote_store::VoteAttempt).
    pub(crate) attempts_db: Database<Bytes, Bytes>,
    /// Named sequences.
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at the given directory.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;
        // SAFETY: the environment is opened once per directory per process;
        // callers must not open the same path twice concurrently.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(MAX_DBS)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let votes_db = env.create_database(&mut wtxn, Some("votes"))?;
        let voter_index_db = env.create_database(&mut wtxn, Some("voter_index"))?;
        let keys_db = env.create_database(&mut wtxn, Some("idempotency"))?;
        let polls_db = env.create_database(&mut wtxn, Some("polls"))?;
        let attempts_db = env.create_database(&mut wtxn, Some("attempts"))?;
        let meta_db = env.create_database(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        info!(path = %path.display(), map_size, "opened LMDB environment");

        Ok(Self {
            env: Arc::new(env),
            votes_db,
            voter_index_db,
            keys_db,
            polls_db,
            attempts_db,
            meta_db,
        })
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Bump and return a named sequence inside `wtxn`. Sequences start at 1.
    pub(crate) fn next_sequence(&self, wtxn: &mut RwTxn, name: &str) -> Result<u64, LmdbError> {
        let current = match self.meta_db.get(wtxn, name.as_bytes())? {
            Some(bytes) => decode_u64(bytes)?,
            None => 0,
        };
        let next = current + 1;
        self.meta_db
            .put(wtxn, name.as_bytes(), &next.to_be_bytes())?;
        Ok(next)
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LmdbError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LmdbError> {
    Ok(bincode::deserialize(bytes)?)
}

pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64, LmdbError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LmdbError::Corrupted(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

/// Increment a byte prefix to obtain the exclusive upper bound of a prefix scan.
///
/// An all-`0xff` prefix has no upper bound; it is extended instead, which
/// still sorts after every key starting with the prefix of realistic length.
pub(crate) fn increment_prefix(prefix: &mut Vec<u8>) {
    while let Some(last) = prefix.last_mut() {
        if *last < 0xff {
            *last += 1;
            return;
        }
        prefix.pop();
    }
    prefix.extend_from_slice(&[0xff; 9]);
}

/// Collect all `(key, value)` pairs whose key starts with `prefix`.
pub(crate) fn prefix_scan(
    db: &Database<Bytes, Bytes>,
    txn: &RoTxn,
    prefix: &[u8],
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, LmdbError> {
    let mut upper = prefix.to_vec();
    increment_prefix(&mut upper);
    let bounds = (Bound::Included(prefix), Bound::Excluded(upper.as_slice()));
    let mut results = Vec::new();
    for entry in db.range(txn, &bounds)? {
        let (key, value) = entry?;
        results.push((key.to_vec(), value.to_vec()));
    }
    Ok(results)
}
