//! Core record types for Whisperboard
//!
//! These are the records persisted by [`crate::storage::Storage`]. Sessions are
//! deliberately absent: they are re-derived from a [`Discussion`] plus the
//! identity keys whenever needed (see [`crate::session::Session`]).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{PublicIdentity, UserId};

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Deterministic, session-scoped lookup key on the board.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Seeker(pub [u8; 32]);

impl Seeker {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for Seeker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seeker({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Seeker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

/// A remote party known to a local identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// The local identity that owns this contact entry
    pub owner: UserId,
    /// The contact's identifier
    pub user_id: UserId,
    /// Optional display name
    pub name: Option<String>,
    /// Public key material; required before any handshake
    pub public_identity: Option<PublicIdentity>,
    /// When the contact was imported (ms)
    pub created_at: i64,
}

impl Contact {
    /// Contact with full key material, as imported out-of-band or learned from
    /// an announcement.
    pub fn new(owner: UserId, public_identity: PublicIdentity, name: Option<String>) -> Self {
        Self {
            owner,
            user_id: public_identity.user_id(),
            name,
            public_identity: Some(public_identity),
            created_at: now_millis(),
        }
    }

    /// Get a display name, falling back to a shortened user id.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.user_id.short().to_string())
    }
}

/// Identifier of the discussion between one owner and one contact.
///
/// Derived from the pair, which is what makes "one discussion per
/// (owner, contact)" hold at the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscussionId(String);

impl DiscussionId {
    pub fn new(owner: &UserId, contact: &UserId) -> Self {
        Self(format!("{}/{}", owner.as_str(), contact.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiscussionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a discussion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscussionStatus {
    /// Our announcement is out, the peer's has not been seen yet
    Pending,
    /// Both halves of the session exist
    Active,
    /// Explicitly reset by the owner
    Closed,
}

/// Announcement we published to start (or answer) a session.
///
/// Only the nonce is needed to re-derive the ephemeral key and the outgoing
/// session root; the payload is kept so it can be re-published verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingAnnouncement {
    pub nonce: [u8; 16],
    pub created_at: i64,
    pub payload: Vec<u8>,
    /// Whether the board accepted the publish; unpublished entries are retried
    pub published: bool,
}

/// Validated announcement received from the contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingAnnouncement {
    /// BLAKE3 of the announcement payload
    pub id: [u8; 32],
    pub ephemeral_public: [u8; 32],
    pub created_at: i64,
}

/// Persisted seeker ratchet for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetState {
    /// Next index used for an outgoing message
    pub send_index: u64,
    /// Lowest incoming index not yet received
    pub recv_index: u64,
    /// Incoming indices above `recv_index` already received
    pub recv_retired: BTreeSet<u64>,
}

impl RatchetState {
    /// Incoming indices currently expected, lowest first.
    pub fn active_indices(&self, window: u32) -> Vec<u64> {
        (self.recv_index..self.recv_index.saturating_add(u64::from(window)))
            .filter(|i| !self.recv_retired.contains(i))
            .collect()
    }

    /// Whether an incoming index has already been consumed
    pub fn is_retired(&self, index: u64) -> bool {
        index < self.recv_index || self.recv_retired.contains(&index)
    }

    /// Retire an incoming index and advance over the contiguous retired prefix.
    pub fn retire(&mut self, index: u64) {
        if self.is_retired(index) {
            return;
        }
        self.recv_retired.insert(index);
        while self.recv_retired.remove(&self.recv_index) {
            self.recv_index += 1;
        }
    }

    /// Forget incoming progress (a new incoming root was accepted).
    pub fn reset_incoming(&mut self) {
        self.recv_index = 0;
        self.recv_retired.clear();
    }
}

/// Denormalized last-message preview for discussion listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessagePreview {
    pub content: String,
    pub timestamp: i64,
    pub direction: Direction,
}

impl LastMessagePreview {
    /// Build a preview, truncating on a character boundary.
    pub fn from_message(message: &Message, max_chars: usize) -> Self {
        let content = if message.content.chars().count() > max_chars {
            let truncated: String = message.content.chars().take(max_chars).collect();
            format!("{}...", truncated)
        } else {
            message.content.clone()
        };
        Self {
            content,
            timestamp: message.timestamp,
            direction: message.direction,
        }
    }
}

/// Session relationship between a local identity and one contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    pub owner: UserId,
    pub contact: UserId,
    pub status: DiscussionStatus,
    pub outgoing: Option<OutgoingAnnouncement>,
    pub incoming: Option<IncomingAnnouncement>,
    pub ratchet: RatchetState,
    pub last_message: Option<LastMessagePreview>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Discussion {
    /// New discussion created by sending our announcement.
    pub fn new_outgoing(owner: UserId, contact: UserId, outgoing: OutgoingAnnouncement) -> Self {
        let now = now_millis();
        Self {
            owner,
            contact,
            status: DiscussionStatus::Pending,
            outgoing: Some(outgoing),
            incoming: None,
            ratchet: RatchetState::default(),
            last_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// New discussion created by receiving the contact's announcement.
    pub fn new_incoming(owner: UserId, contact: UserId, incoming: IncomingAnnouncement) -> Self {
        let now = now_millis();
        Self {
            owner,
            contact,
            status: DiscussionStatus::Active,
            outgoing: None,
            incoming: Some(incoming),
            ratchet: RatchetState::default(),
            last_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> DiscussionId {
        DiscussionId::new(&self.owner, &self.contact)
    }

    pub fn is_closed(&self) -> bool {
        self.status == DiscussionStatus::Closed
    }

    /// Update the preview if `message` is at least as recent as the current one.
    pub fn refresh_preview(&mut self, message: &Message, max_chars: usize) -> bool {
        let newer = self
            .last_message
            .as_ref()
            .map_or(true, |p| message.timestamp >= p.timestamp);
        if newer {
            self.last_message = Some(LastMessagePreview::from_message(message, max_chars));
        }
        newer
    }
}

/// Message direction relative to the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// A decrypted message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub discussion: DiscussionId,
    pub direction: Direction,
    pub content: String,
    /// Sender-side timestamp (ms)
    pub timestamp: i64,
    /// Seeker the message was exchanged under; unique across all messages
    pub seeker: Seeker,
    /// Ratchet index of the seeker within its direction
    pub index: u64,
}
