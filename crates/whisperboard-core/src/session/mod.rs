//! Sessions between a local identity and its contacts
//!
//! - [`crypto`]: key agreement, seekers and payload sealing behind [`SessionCrypto`]
//! - [`handshake`]: announcement creation, validation and the discussion state machine
//! - [`exchange`]: per-message encryption, publication and ratcheting

pub mod crypto;
pub mod exchange;
pub mod handshake;

use serde::{Deserialize, Serialize};

use crate::types::{Discussion, DiscussionStatus};

pub use crypto::{DefaultSessionCrypto, DirectionRoot, SessionCrypto, ValidatedAnnouncement};
pub use exchange::{SeekerMatch, Session};
pub use handshake::AnnouncementOutcome;

/// Handshake progress with one peer, as seen from the local side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerSessionStatus {
    NoSession,
    AnnouncementSent,
    AnnouncementReceived,
    Established,
    Closed,
}

impl PeerSessionStatus {
    pub fn of(discussion: Option<&Discussion>) -> Self {
        let Some(discussion) = discussion else {
            return PeerSessionStatus::NoSession;
        };
        if discussion.status == DiscussionStatus::Closed {
            return PeerSessionStatus::Closed;
        }
        match (&discussion.outgoing, &discussion.incoming) {
            (Some(_), Some(_)) => PeerSessionStatus::Established,
            (Some(_), None) => PeerSessionStatus::AnnouncementSent,
            (None, Some(_)) => PeerSessionStatus::AnnouncementReceived,
            (None, None) => PeerSessionStatus::NoSession,
        }
    }
}
