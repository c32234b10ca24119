//! Span constructors shared by the engine and the HTTP layer.

use provote_types::{PollId, VoterIdentity};
use tracing::{info_span, Span};

/// Span covering one `cast_vote` call, end to end.
pub fn cast_vote_span(poll: PollId, voter: &VoterIdentity) -> Span {
    info_span!("cast_vote", poll = %poll, voter = %voter)
}

/// Span covering one garbage collection pass.
pub fn gc_span() -> Span {
    info_span!("gc")
}
