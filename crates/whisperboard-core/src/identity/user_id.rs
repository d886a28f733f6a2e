//! User identifier derived from a public identity
//!
//! Format: `wb:z{base58-blake3-hash}`

use crate::error::ChatError;
use crate::identity::PublicIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const PREFIX: &str = "wb:z";

/// Stable identifier for an identity (ours or a contact's).
///
/// The identifier is the BLAKE3 hash of the serialized public identity, so it
/// can be shown and stored without revealing the key material itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Derive the identifier for a public identity
    pub fn from_public_identity(public: &PublicIdentity) -> Self {
        let hash = blake3::hash(&public.to_bytes());
        UserId(format!("{}{}", PREFIX, bs58::encode(hash.as_bytes()).into_string()))
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for display and log fields
    pub fn short(&self) -> &str {
        let end = (PREFIX.len() + 8).min(self.0.len());
        &self.0[..end]
    }

    /// Parse and validate an identifier string
    pub fn parse(s: &str) -> Result<Self, ChatError> {
        let encoded = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| ChatError::Identity(format!("User id must start with '{}'", PREFIX)))?;

        if encoded.is_empty() {
            return Err(ChatError::Identity("User id cannot be empty".to_string()));
        }

        let decoded = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| ChatError::Identity("Invalid base58 encoding in user id".to_string()))?;
        if decoded.len() != 32 {
            return Err(ChatError::Identity("User id hash must be 32 bytes".to_string()));
        }

        Ok(UserId(s.to_string()))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
