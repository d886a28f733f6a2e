//! Seeker-addressed message exchange over an established session

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::crypto::{DirectionRoot, SessionCrypto};
use crate::board::Board;
use crate::context::AccountContext;
use crate::error::ChatError;
use crate::identity::UserId;
use crate::types::{now_millis, Direction, Discussion, DiscussionStatus, Message, Seeker};

/// Plaintext carried inside a message payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MessageBody {
    content: String,
    sent_at: i64,
}

/// How a fetched seeker relates to the session's incoming direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekerMatch {
    /// Expected and not yet consumed
    Active(u64),
    /// Already consumed (replay or duplicate delivery)
    Consumed(u64),
    /// Not one of ours
    Unknown,
}

/// Materialized session for one discussion.
///
/// Built on demand from the persisted [`Discussion`] plus identity keys and
/// dropped after use; the roots never reach storage.
pub struct Session {
    discussion: Discussion,
    crypto: Arc<dyn SessionCrypto>,
    outgoing_root: Option<DirectionRoot>,
    incoming_root: Option<DirectionRoot>,
    /// Active incoming seekers at materialization time
    incoming: HashMap<Seeker, u64>,
}

impl Session {
    /// Re-derive the session roots for `discussion`.
    pub fn materialize(ctx: &AccountContext, discussion: Discussion) -> Result<Self, ChatError> {
        let contact = ctx.contact_public(&discussion.contact)?;

        let outgoing_root = match &discussion.outgoing {
            Some(outgoing) => Some(ctx.crypto.outgoing_root(&ctx.identity, &contact, &outgoing.nonce)?),
            None => None,
        };
        let incoming_root = match &discussion.incoming {
            Some(incoming) => Some(ctx.crypto.incoming_root(
                &ctx.identity,
                &contact,
                &incoming.ephemeral_public,
            )?),
            None => None,
        };

        let incoming = match (&incoming_root, discussion.is_closed()) {
            (Some(root), false) => discussion
                .ratchet
                .active_indices(ctx.config.seeker_window)
                .into_iter()
                .map(|i| (ctx.crypto.seeker(root, i), i))
                .collect(),
            _ => HashMap::new(),
        };

        Ok(Self {
            discussion,
            crypto: ctx.crypto.clone(),
            outgoing_root,
            incoming_root,
            incoming,
        })
    }

    /// Load and materialize the discussion with `contact`.
    pub fn load(ctx: &AccountContext, contact: &UserId) -> Result<Self, ChatError> {
        let discussion = ctx
            .storage
            .load_discussion(ctx.owner(), contact)?
            .ok_or_else(|| ChatError::DiscussionNotFound(contact.to_string()))?;
        Self::materialize(ctx, discussion)
    }

    pub fn discussion(&self) -> &Discussion {
        &self.discussion
    }

    pub fn into_discussion(self) -> Discussion {
        self.discussion
    }

    /// Whether both directions exist and the discussion is open.
    pub fn is_established(&self) -> bool {
        self.discussion.status == DiscussionStatus::Active
            && self.outgoing_root.is_some()
            && self.incoming_root.is_some()
    }

    /// Currently active incoming seekers, lowest index first.
    pub fn compute_seekers(&self) -> Vec<Seeker> {
        let mut seekers: Vec<(u64, Seeker)> = self.incoming.iter().map(|(s, i)| (*i, *s)).collect();
        seekers.sort();
        seekers.into_iter().map(|(_, s)| s).collect()
    }

    pub fn classify(&self, seeker: &Seeker) -> SeekerMatch {
        match self.incoming.get(seeker) {
            Some(&index) if self.discussion.ratchet.is_retired(index) => SeekerMatch::Consumed(index),
            Some(&index) => SeekerMatch::Active(index),
            None => SeekerMatch::Unknown,
        }
    }

    /// Decrypt a board entry and retire its seeker.
    ///
    /// Fails with [`ChatError::DecryptionFailed`] for unknown or consumed
    /// seekers and for payloads that don't authenticate. The ratchet only
    /// moves on success.
    pub fn decrypt(&mut self, seeker: &Seeker, payload: &[u8]) -> Result<Message, ChatError> {
        let index = match self.classify(seeker) {
            SeekerMatch::Active(index) => index,
            SeekerMatch::Consumed(_) => {
                return Err(ChatError::DecryptionFailed("seeker already consumed".to_string()))
            }
            SeekerMatch::Unknown => {
                return Err(ChatError::DecryptionFailed("seeker not active for this session".to_string()))
            }
        };
        let root = self
            .incoming_root
            .as_ref()
            .ok_or_else(|| ChatError::DecryptionFailed("no incoming root".to_string()))?;

        let plaintext = self.crypto.open_message(root, index, payload)?;
        let body: MessageBody = postcard::from_bytes(&plaintext)
            .map_err(|_| ChatError::DecryptionFailed("malformed message body".to_string()))?;

        self.discussion.ratchet.retire(index);
        Ok(Message {
            discussion: self.discussion.id(),
            direction: Direction::Incoming,
            content: body.content,
            timestamp: body.sent_at,
            seeker: *seeker,
            index,
        })
    }

    /// Encrypt `content` under the next outgoing seeker and publish it.
    ///
    /// The send index only advances after the board accepts the entry.
    pub async fn encrypt_and_publish(
        &mut self,
        board: &dyn Board,
        content: &str,
    ) -> Result<Message, ChatError> {
        if !self.is_established() {
            return Err(ChatError::InvalidOperation(format!(
                "Session with {} is not established",
                self.discussion.contact
            )));
        }
        let root = self
            .outgoing_root
            .as_ref()
            .ok_or_else(|| ChatError::InvalidOperation("no outgoing root".to_string()))?;

        let index = self.discussion.ratchet.send_index;
        let seeker = self.crypto.seeker(root, index);
        let body = MessageBody {
            content: content.to_string(),
            sent_at: now_millis(),
        };
        let plaintext = postcard::to_allocvec(&body)?;
        let payload = self.crypto.seal_message(root, index, &plaintext)?;

        board.publish(&seeker, &payload).await?;

        self.discussion.ratchet.send_index += 1;
        Ok(Message {
            discussion: self.discussion.id(),
            direction: Direction::Outgoing,
            content: body.content,
            timestamp: body.sent_at,
            seeker,
            index,
        })
    }
}
