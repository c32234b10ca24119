//! Poll directory trait: the engine's view of externally owned polls.

use serde::{Deserialize, Serialize};

use crate::StoreError;
use provote_types::{OptionId, PollId, Timestamp};

/// What the admission engine needs to know about a poll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollInfo {
    pub id: PollId,
    pub options: Vec<OptionId>,
    pub is_active: bool,
    pub closes_at: Option<Timestamp>,
}

impl PollInfo {
    /// Classify a requested option against this poll at `now`.
    pub fn check(&self, option: OptionId, now: Timestamp) -> OptionCheck {
        if !self.options.contains(&option) {
            return OptionCheck::ForeignOption;
        }
        let closed = !self.is_active || self.closes_at.map(|c| now >= c).unwrap_or(false);
        if closed {
            OptionCheck::PollClosed
        } else {
            OptionCheck::Valid
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionCheck {
    Valid,
    UnknownPoll,
    /// The option exists but belongs to another poll (or does not exist).
    ForeignOption,
    PollClosed,
}

/// Read access to poll/option references, plus the registration hook the
/// external poll service uses to publish them.
pub trait PollDirectory {
    fn put_poll(&self, poll: &PollInfo) -> Result<(), StoreError>;

    fn get_poll(&self, poll: PollId) -> Result<Option<PollInfo>, StoreError>;

    /// Classify `(poll, option)` at `now`.
    fn check_option(
        &self,
        poll: PollId,
        option: OptionId,
        now: Timestamp,
    ) -> Result<OptionCheck, StoreError> {
        Ok(match self.get_poll(poll)? {
            Some(info) => info.check(option, now),
            None => OptionCheck::UnknownPoll,
        })
    }
}
