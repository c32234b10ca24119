use provote_store::{AttemptLog, StoreError, VoteAttempt};
use provote_types::{PollId, Timestamp};

use crate::environment::{decode, encode, prefix_scan};
use crate::{LmdbEnvironment, LmdbError};

const ATTEMPT_SEQUENCE: &str = "attempt_seq";

impl LmdbEnvironment {
    fn append_attempt(&self, attempt: &VoteAttempt) -> Result<(), LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        let seq = self.next_sequence(&mut wtxn, ATTEMPT_SEQUENCE)?;
        let mut key = Vec::with_capacity(16);
        key.extend_from_slice(&attempt.poll.to_be_bytes());
        key.extend_from_slice(&seq.to_be_bytes());
        self.attempts_db.put(&mut wtxn, &key, &encode(attempt)?)?;
        wtxn.commit()?;
        Ok(())
    }

    fn scan_attempts(&self, poll: PollId) -> Result<Vec<VoteAttempt>, LmdbError> {
        let rtxn = self.env.read_txn()?;
        prefix_scan(&self.attempts_db, &rtxn, &poll.to_be_bytes())?
            .iter()
            .map(|(_, value)| decode(value))
            .collect()
    }

    fn purge_attempts(&self, cutoff: Timestamp) -> Result<usize, LmdbError> {
        let mut wtxn = self.env.write_txn()?;
        let mut stale = Vec::new();
        for entry in self.attempts_db.iter(&wtxn)? {
            let (key, value) = entry?;
            let attempt: VoteAttempt = decode(value)?;
            if attempt.at < cutoff {
                stale.push(key.to_vec());
            }
        }
        for key in &stale {
            self.attempts_db.delete(&mut wtxn, key)?;
        }
        wtxn.commit()?;
        Ok(stale.len())
    }
}

impl AttemptLog for LmdbEnvironment {
    fn record_attempt(&self, attempt: &VoteAttempt) -> Result<(), StoreError> {
        Ok(self.append_attempt(attempt)?)
    }

    fn attempts_for_poll(&self, poll: PollId) -> Result<Vec<VoteAttempt>, StoreError> {
        Ok(self.scan_attempts(poll)?)
    }

    fn purge_attempts_before(&self, cutoff: Timestamp) -> Result<usize, StoreError> {
        Ok(self.purge_attempts(cutoff)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provote_store::AttemptOutcome;
    use provote_types::{OptionId, VoteId, VoterIdentity};

    fn attempt(poll: u64, at_ms: u64, outcome: AttemptOutcome) -> VoteAttempt {
        VoteAttempt {
            poll: PollId::new(poll),
            option: OptionId::new(1),
            voter: VoterIdentity::User(1),
            idempotency_key: None,
            client: "10.0.0.1".into(),
            fingerprint: None,
            outcome,
            risk_score: Some(0.1),
            at: Timestamp::from_millis(at_ms),
        }
    }

    #[test]
    fn attempts_are_listed_per_poll_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let env = LmdbEnvironment::open(dir.path(), 16 << 20).unwrap();
        env.record_attempt(&attempt(1, 10, AttemptOutcome::Created(VoteId::new(1))))
            .unwrap();
        env.record_attempt(&attempt(2, 11, AttemptOutcome::Rejected("rate_limited".into())))
            .unwrap();
        env.record_attempt(&attempt(1, 12, AttemptOutcome::Rejected("duplicate_vote".into())))
            .unwrap();

        let listed = env.attempts_for_poll(PollId::new(1)).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].succeeded());
        assert_eq!(listed[1].at, Timestamp::from_millis(12));
        assert!(!listed[1].succeeded());
    }

    #[test]
    fn purge_drops_attempts_older_than_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let env = LmdbEnvironment::open(dir.path(), 16 << 20).unwrap();
        env.record_attempt(&attempt(1, 10, AttemptOutcome::Created(VoteId::new(1))))
            .unwrap();
        env.record_attempt(&attempt(2, 20, AttemptOutcome::Created(VoteId::new(2))))
            .unwrap();
        env.record_attempt(&attempt(1, 30, AttemptOutcome::Rejected("duplicate_vote".into())))
            .unwrap();

        assert_eq!(env.purge_attempts_before(Timestamp::from_millis(25)).unwrap(), 2);
        let left = env.attempts_for_poll(PollId::new(1)).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].at, Timestamp::from_millis(30));
        assert!(env.attempts_for_poll(PollId::new(2)).unwrap().is_empty());
    }
}
