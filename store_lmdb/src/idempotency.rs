use heed::RwTxn;
use provote_store::{
    IdempotencyRecord, IdempotencyState, IdempotencyStore, Reservation, ReserveOutcome, ScopedKey,
    StoreError,
};
use provote_types::{OptionId, PollId, Timestamp, VoteRecord};
use tracing::debug;

use crate::environment::{decode, encode};
use crate::{LmdbEnvironment, LmdbError};

const TOKEN_SEQUENCE: &str = "reservation_token";

impl LmdbEnvironment {
    fn reserve(
        &self,
        key: &ScopedKey,
        poll: PollId,
        option: OptionId,
        now: Timestamp,
        reservation_ttl_ms: u64,
        retention_ms: u64,
    ) -> Result<ReserveOutcome, LmdbError> {
        let storage_key = key.storage_key();
        let mut wtxn = self.env.write_txn()?;

        let existing = match self.keys_db.get(&wtxn, storage_key.as_bytes())? {
            Some(bytes) => Some(decode::<IdempotencyRecord>(bytes)?),
            None => None,
        };
        let reclaimed = match existing {
            None => false,
            Some(rec) if rec.is_reclaimable(now, reservation_ttl_ms) => true,
            Some(rec) if rec.state == IdempotencyState::Completed => {
                return Ok(ReserveOutcome::Completed(rec));
            }
            Some(rec) => {
                return Ok(ReserveOutcome::InFlight {
                    reserved_at: rec.updated_at,
                });
            }
        };

        let token = self.next_sequence(&mut wtxn, TOKEN_SEQUENCE)?;
        let record = IdempotencyRecord {
            storage_key: storage_key.clone(),
            state: IdempotencyState::Reserved,
            token,
            poll,
            option,
            vote: None,
            created_at: now,
            updated_at: now,
            expires_at: now.plus_millis(retention_ms),
        };
        self.keys_db
            .put(&mut wtxn, storage_key.as_bytes(), &encode(&record)?)?;
        wtxn.commit()?;

        if reclaimed {
            debug!(key = %storage_key, token, "reclaimed idempotency key");
        }
        Ok(ReserveOutcome::Reserved(Reservation {
            storage_key,
            token,
            reclaimed,
        }))
    }

    fn read_key(&self, key: &ScopedKey) -> Result<Option<IdempotencyRecord>, LmdbError> {
        let rtxn = self.env.read_txn()?;
        match self.keys_db.get(&rtxn, key.storage_key().as_bytes())? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// Load the record `reservation` must still own, inside `wtxn`.
    fn owned_record(
        &self,
        wtxn: &RwTxn,
        reservation: &Reservation,
    ) -> Result<IdempotencyRecord, LmdbError> {
        let bytes = self
            .keys_db
            .get(wtxn, reservation.storage_key.as_bytes())?
            .ok_or_else(|| LmdbError::NotFound(reservation.storage_key.clone()))?;
        let rec: IdempotencyRecord = decode(bytes)?;
        if rec.token != reservation.token || rec.state != IdempotencyState::Reserved {
            return Err(LmdbError::Conflict(format!(
                "reservation {} on {} is no longer held",
                reservation.token, reservation.storage_key
            )));
        }
        Ok(rec)
    }

    fn transition(
        &self,
        reservation: &Reservation,
        now: Timestamp,
        state: IdempotencyState,
        vote: Option<&VoteRecord>,
    ) -> Result<(), LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        let mut rec = self.owned_record(&wtxn, reservation)?;
        rec.state = state;
        rec.updated_at = now;
        if let Some(vote) = vote {
            rec.vote = Some(vote.clone());
        }
        self.keys_db
            .put(&mut wtxn, reservation.storage_key.as_bytes(), &encode(&rec)?)?;
        wtxn.commit()?;
        Ok(())
    }

    fn purge(&self, now: Timestamp) -> Result<usize, LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        let mut expired = Vec::new();
        for entry in self.keys_db.iter(&wtxn)? {
            let (key, value) = entry?;
            let rec: IdempotencyRecord = decode(value)?;
            if rec.is_expired(now) {
                expired.push(key.to_vec());
            }
        }
        for key in &expired {
            self.keys_db.delete(&mut wtxn, key)?;
        }
        wtxn.commit()?;
        Ok(expired.len())
    }
}

impl IdempotencyStore for LmdbEnvironment {
    fn reserve_key(
        &self,
        key: &ScopedKey,
        poll: PollId,
        option: OptionId,
        now: Timestamp,
        reservation_ttl_ms: u64,
        retention_ms: u64,
    ) -> Result<ReserveOutcome, StoreError> {
        Ok(self.reserve(key, poll, option, now, reservation_ttl_ms, retention_ms)?)
    }

    fn get_key(&self, key: &ScopedKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.read_key(key)?)
    }

    fn complete_key(
        &self,
        reservation: &Reservation,
        vote: &VoteRecord,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        Ok(self.transition(reservation, now, IdempotencyState::Completed, Some(vote))?)
    }

    fn fail_key(&self, reservation: &Reservation, now: Timestamp) -> Result<(), StoreError> {
        Ok(self.transition(reservation, now, IdempotencyState::Failed, None)?)
    }

    fn purge_expired(&self, now: Timestamp) -> Result<usize, StoreError> {
        Ok(self.purge(now)?)
    }
}
