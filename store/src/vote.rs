//! Vote storage trait.

use crate::StoreError;
use provote_types::{NewVote, PollId, VoteId, VoteRecord, VoterIdentity};

/// Durable storage for accepted votes.
pub trait VoteStore {
    /// Insert a vote, enforcing at most one vote per `(poll, voter)`.
    ///
    /// The check and the insert must be a single atomic step in the backend.
    /// Returns [`StoreError::Duplicate`] when the voter already has a vote for
    /// the poll, and [`StoreError::Contention`] for transient lock failures.
    fn insert_unique(&self, vote: NewVote) -> Result<VoteRecord, StoreError>;

    fn get_vote(&self, id: VoteId) -> Result<Option<VoteRecord>, StoreError>;

    /// The voter's vote on a poll, if any.
    fn find_vote(&self, poll: PollId, voter: &VoterIdentity)
        -> Result<Option<VoteRecord>, StoreError>;

    fn count_votes(&self, poll: PollId) -> Result<u64, StoreError>;

    /// Remove every vote of a poll (poll deletion cascade). Returns the count removed.
    fn delete_poll_votes(&self, poll: PollId) -> Result<u64, StoreError>;
}
