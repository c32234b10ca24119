//! The accepted-vote record.

use serde::{Deserialize, Serialize};

use crate::ids::{OptionId, PollId, VoteId, VoterIdentity};
use crate::key::IdempotencyKey;
use crate::time::Timestamp;

/// A single accepted vote.
///
/// At most one exists per `(poll, voter)`; the durable store enforces this
/// with a uniqueness index. Records are never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub id: VoteId,
    pub poll: PollId,
    pub option: OptionId,
    pub voter: VoterIdentity,
    pub created_at: Timestamp,
    /// Key the vote was first cast under, if the client sent one.
    pub idempotency_key: Option<IdempotencyKey>,
}

/// A vote that has not yet been assigned an id by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVote {
    pub poll: PollId,
    pub option: OptionId,
    pub voter: VoterIdentity,
    pub created_at: Timestamp,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl NewVote {
    /// Attach the store-assigned id.
    pub fn into_record(self, id: VoteId) -> VoteRecord {
        VoteRecord {
            id,
            poll: self.poll,
            option: self.option,
            voter: self.voter,
            created_at: self.created_at,
            idempotency_key: self.idempotency_key,
        }
    }
}

impl VoteRecord {
    /// Whether this vote expresses the same choice as a new request.
    pub fn matches_choice(&self, poll: PollId, option: OptionId) -> bool {
        self.poll == poll && self.option == option
    }
}
