use std::sync::Arc;
use std::time::Duration;

use provote_store::{
    IdempotencyRecord, IdempotencyState, IdempotencyStore, Reservation, ReserveOutcome, ScopedKey,
    StoreError,
};
use provote_types::{AdmissionParams, Clock, OptionId, PollId, VoteRecord};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::IdempotencyError;

/// Timing knobs of the resolver, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolverSettings {
    pub reservation_ttl_ms: u64,
    pub retention_ms: u64,
    pub wait_ms: u64,
    pub poll_interval_ms: u64,
}

impl ResolverSettings {
    pub fn from_params(params: &AdmissionParams) -> Self {
        Self {
            reservation_ttl_ms: params.reservation_ttl_ms(),
            retention_ms: params.idempotency_retention_ms(),
            wait_ms: params.reservation_wait_ms,
            poll_interval_ms: params.reservation_poll_interval_ms.max(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// The caller owns the key and must complete or fail it.
    Reserved(Reservation),
    /// The key already completed; the record holds the replayable vote.
    AlreadyCompleted(IdempotencyRecord),
}

/// A resolution plus how many times the caller had to wait on another owner.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub resolution: Resolution,
    pub waits: u32,
}

pub struct IdempotencyResolver<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    settings: ResolverSettings,
}

impl<S> Clone for IdempotencyResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<S: IdempotencyStore + Send + Sync + 'static> IdempotencyResolver<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, settings: ResolverSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Reserve `key` for `(poll, option)`, or learn its completed result.
    ///
    /// While another caller holds a live reservation this polls until the
    /// holder completes (→ `AlreadyCompleted`), fails or goes stale
    /// (→ `Reserved` via takeover), or the wait budget runs out
    /// (→ [`IdempotencyError::InFlight`]).
    pub async fn reserve(
        &self,
        key: &ScopedKey,
        poll: PollId,
        option: OptionId,
    ) -> Result<Resolved, IdempotencyError> {
        let started = Instant::now();
        let budget = Duration::from_millis(self.settings.wait_ms);
        let interval = Duration::from_millis(self.settings.poll_interval_ms);
        let mut waits = 0u32;

        loop {
            let outcome = self.reserve_once(key, poll, option).await?;
            match outcome {
                ReserveOutcome::Reserved(reservation) => {
                    if reservation.reclaimed {
                        info!(key = %key, token = reservation.token, "reclaimed idempotency key");
                    }
                    return Ok(Resolved {
                        resolution: Resolution::Reserved(reservation),
                        waits,
                    });
                }
                ReserveOutcome::Completed(record) => {
                    debug!(key = %key, waits, "idempotency key already completed");
                    return Ok(Resolved {
                        resolution: Resolution::AlreadyCompleted(record),
                        waits,
                    });
                }
                ReserveOutcome::InFlight { reserved_at } => {
                    let waited = started.elapsed();
                    if waited >= budget {
                        warn!(key = %key, %reserved_at, "gave up waiting on in-flight key");
                        return Err(IdempotencyError::InFlight {
                            key: key.storage_key(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    waits = waits.saturating_add(1);
                    tokio::time::sleep(interval.min(budget - waited)).await;
                }
            }
        }
    }

    /// One `reserve_key` call, run on the blocking pool so a slow write
    /// transaction does not stall the runtime.
    async fn reserve_once(
        &self,
        key: &ScopedKey,
        poll: PollId,
        option: OptionId,
    ) -> Result<ReserveOutcome, StoreError> {
        let store = self.store.clone();
        let key = key.clone();
        let now = self.clock.now();
        let ttl_ms = self.settings.reservation_ttl_ms;
        let retention_ms = self.settings.retention_ms;
        tokio::task::spawn_blocking(move || {
            store.reserve_key(&key, poll, option, now, ttl_ms, retention_ms)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("reservation task failed: {e}")))?
    }

    /// The completed, unexpired record for `key`, without reserving anything.
    pub fn peek_completed(
        &self,
        key: &ScopedKey,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let now = self.clock.now();
        Ok(self
            .store
            .get_key(key)?
            .filter(|rec| rec.state == IdempotencyState::Completed && !rec.is_expired(now)))
    }

    /// `reserved → completed`, storing `vote` for replay.
    pub fn complete(
        &self,
        reservation: &Reservation,
        vote: &VoteRecord,
    ) -> Result<(), IdempotencyError> {
        self.store
            .complete_key(reservation, vote, self.clock.now())?;
        Ok(())
    }

    /// `reserved → failed`, releasing the key for a later attempt.
    pub fn fail(&self, reservation: &Reservation) -> Result<(), IdempotencyError> {
        self.store.fail_key(reservation, self.clock.now())?;
        Ok(())
    }

    /// Delete records past their retention window. Returns how many went.
    pub fn purge_expired(&self) -> Result<usize, IdempotencyError> {
        let purged = self.store.purge_expired(self.clock.now())?;
        if purged > 0 {
            info!(purged, "purged expired idempotency keys");
        }
        Ok(purged)
    }
}
