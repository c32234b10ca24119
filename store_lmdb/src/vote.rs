use provote_store::{StoreError, VoteStore};
use provote_types::{NewVote, PollId, VoteId, VoteRecord, VoterIdentity};
use tracing::debug;

use crate::environment::{decode, encode, prefix_scan};
use crate::{LmdbEnvironment, LmdbError};

const VOTE_SEQUENCE: &str = "vote_id";

/// `poll_id (be) ++ voter canonical`.
fn voter_index_key(poll: PollId, voter: &VoterIdentity) -> Vec<u8> {
    let canonical = voter.canonical();
    let mut key = Vec::with_capacity(8 + canonical.len());
    key.extend_from_slice(&poll.to_be_bytes());
    key.extend_from_slice(canonical.as_bytes());
    key
}

impl LmdbEnvironment {
    fn insert_vote(&self, vote: NewVote) -> Result<VoteRecord, LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        let index_key = voter_index_key(vote.poll, &vote.voter);
        if self.voter_index_db.get(&wtxn, &index_key)?.is_some() {
            return Err(LmdbError::Duplicate(format!("{} on {}", vote.voter, vote.poll)));
        }

        let id = VoteId::new(self.next_sequence(&mut wtxn, VOTE_SEQUENCE)?);
        let record = vote.into_record(id);
        self.votes_db
            .put(&mut wtxn, &id.to_be_bytes(), &encode(&record)?)?;
        self.voter_index_db
            .put(&mut wtxn, &index_key, &id.to_be_bytes())?;
        wtxn.commit()?;
        debug!(vote = %id, poll = %record.poll, "vote stored");
        Ok(record)
    }

    fn read_vote(&self, id: VoteId) -> Result<Option<VoteRecord>, LmdbError> {
        let rtxn = self.env.read_txn()?;
        match self.votes_db.get(&rtxn, &id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    fn lookup_vote(
        &self,
        poll: PollId,
        voter: &VoterIdentity,
    ) -> Result<Option<VoteRecord>, LmdbError> {
        let rtxn = self.env.read_txn()?;
        let Some(id_bytes) = self.voter_index_db.get(&rtxn, &voter_index_key(poll, voter))? else {
            return Ok(None);
        };
        match self.votes_db.get(&rtxn, id_bytes)? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Err(LmdbError::Corrupted(format!(
                "voter index for {voter} on {poll} points at a missing vote"
            ))),
        }
    }

    fn poll_vote_count(&self, poll: PollId) -> Result<u64, LmdbError> {
        let rtxn = self.env.read_txn()?;
        Ok(prefix_scan(&self.voter_index_db, &rtxn, &poll.to_be_bytes())?.len() as u64)
    }

    fn remove_poll_votes(&self, poll: PollId) -> Result<u64, LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        let entries = prefix_scan(&self.voter_index_db, &wtxn, &poll.to_be_bytes())?;
        for (index_key, id_bytes) in &entries {
            self.votes_db.delete(&mut wtxn, id_bytes)?;
            self.voter_index_db.delete(&mut wtxn, index_key)?;
        }
        wtxn.commit()?;
        Ok(entries.len() as u64)
    }
}

impl VoteStore for LmdbEnvironment {
    fn insert_unique(&self, vote: NewVote) -> Result<VoteRecord, StoreError> {
        Ok(self.insert_vote(vote)?)
    }

    fn get_vote(&self, id: VoteId) -> Result<Option<VoteRecord>, StoreError> {
        Ok(self.read_vote(id)?)
    }

    fn find_vote(
        &self,
        poll: PollId,
        voter: &VoterIdentity,
    ) -> Result<Option<VoteRecord>, StoreError> {
        Ok(self.lookup_vote(poll, voter)?)
    }

    fn count_votes(&self, poll: PollId) -> Result<u64, StoreError> {
        Ok(self.poll_vote_count(poll)?)
    }

    fn delete_poll_votes(&self, poll: PollId) -> Result<u64, StoreError> {
        Ok(self.remove_poll_votes(poll)?)
    }
}
