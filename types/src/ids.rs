//! Identifiers for polls, options, votes and voters.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::digest::blake2b_256_hex;
use crate::ValidationError;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn get(&self) -> u64 {
                self.0
            }

            /// Big-endian bytes, so lexicographic key order matches numeric order.
            pub fn to_be_bytes(&self) -> [u8; 8] {
                self.0.to_be_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

numeric_id!(
    /// Reference to a poll owned by the external poll service.
    PollId,
    "poll#"
);
numeric_id!(
    /// Reference to one option (choice) of a poll.
    OptionId,
    "option#"
);
numeric_id!(
    /// Identifier of an accepted vote, assigned by the durable store.
    VoteId,
    "vote#"
);

/// Who cast a vote.
///
/// Authenticated voters are identified by their user id. Anonymous voters are
/// identified by an opaque token derived from network and device signals; the
/// engine never interprets either form beyond equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoterIdentity {
    User(u64),
    Anonymous(String),
}

impl VoterIdentity {
    /// Derive the anonymous voter token from IP, user agent and fingerprint.
    ///
    /// Missing signals hash as empty strings so the token is always defined.
    pub fn anonymous(ip: Option<&str>, user_agent: Option<&str>, fingerprint: Option<&str>) -> Self {
        let token = blake2b_256_hex(&[
            b"anon-voter",
            ip.unwrap_or_default().as_bytes(),
            user_agent.unwrap_or_default().as_bytes(),
            fingerprint.unwrap_or_default().as_bytes(),
        ]);
        Self::Anonymous(token)
    }

    /// Parse the canonical `user:<id>` / `anon:<token>` form.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if let Some(id) = raw.strip_prefix("user:") {
            return id
                .parse::<u64>()
                .map(Self::User)
                .map_err(|_| ValidationError::InvalidVoter(raw.to_string()));
        }
        if let Some(token) = raw.strip_prefix("anon:") {
            if !token.is_empty() {
                return Ok(Self::Anonymous(token.to_string()));
            }
        }
        Err(ValidationError::InvalidVoter(raw.to_string()))
    }

    /// Canonical string form, used as the uniqueness-index component in storage.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous(_))
    }
}

impl fmt::Display for VoterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Anonymous(token) => write!(f, "anon:{token}"),
        }
    }
}
