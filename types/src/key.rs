//! Client-supplied idempotency keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::digest::blake2b_256_hex;
use crate::ids::{OptionId, PollId, VoterIdentity};
use crate::ValidationError;

/// An idempotency key scoping one logical cast-vote operation.
///
/// Client keys are 1..=128 printable ASCII characters. Keys derived by the
/// server are 64 lowercase hex characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub const MAX_LEN: usize = 128;

    /// Validate and wrap a client-supplied key.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ValidationError::InvalidIdempotencyKey("empty".into()));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(ValidationError::InvalidIdempotencyKey(format!(
                "length {} exceeds {}",
                raw.len(),
                Self::MAX_LEN
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(ValidationError::InvalidIdempotencyKey(
                "must be printable ASCII without whitespace".into(),
            ));
        }
        Ok(Self(raw))
    }

    /// Deterministic key for a (voter, poll, option) triple, used when the
    /// client does not send one.
    pub fn derive(voter: &VoterIdentity, poll: PollId, option: OptionId) -> Self {
        Self(blake2b_256_hex(&[
            voter.canonical().as_bytes(),
            &poll.to_be_bytes(),
            &option.to_be_bytes(),
        ]))
    }

    /// Whether this key has the shape of a server-derived key.
    pub fn is_derived_form(&self) -> bool {
        self.0.len() == 64 && self.0.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
