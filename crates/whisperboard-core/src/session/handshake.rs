//! Announcement handshake
//!
//! A discussion becomes active once both directions have a root: ours from
//! the announcement we publish, theirs from the announcement we receive. The
//! side that receives first answers with its own announcement, so a session
//! started by one party, or by both at once, ends with one discussion per side.

use rand::RngCore;

use super::crypto::ANNOUNCEMENT_NONCE_LEN;
use crate::context::AccountContext;
use crate::error::ChatError;
use crate::identity::{PublicIdentity, UserId};
use crate::types::{
    now_millis, Contact, Discussion, DiscussionStatus, OutgoingAnnouncement, RatchetState,
};

/// What processing one announcement did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnouncementOutcome {
    /// First announcement from this contact; discussion is now active
    Established { contact: UserId, new_contact: bool },
    /// Completed a discussion we had already started
    Completed { contact: UserId },
    /// Newer announcement replaced the contact's previous one
    Superseded { contact: UserId },
    /// Newer announcement re-opened a closed discussion
    Reopened { contact: UserId },
    /// Already processed
    Duplicate,
    /// Older than the announcement already accepted
    Stale,
}

impl AnnouncementOutcome {
    /// Contact whose session changed, if any
    pub fn contact(&self) -> Option<&UserId> {
        match self {
            AnnouncementOutcome::Established { contact, .. }
            | AnnouncementOutcome::Completed { contact }
            | AnnouncementOutcome::Superseded { contact }
            | AnnouncementOutcome::Reopened { contact } => Some(contact),
            AnnouncementOutcome::Duplicate | AnnouncementOutcome::Stale => None,
        }
    }
}

fn new_outgoing(
    ctx: &AccountContext,
    recipient: &PublicIdentity,
) -> Result<OutgoingAnnouncement, ChatError> {
    let mut nonce = [0u8; ANNOUNCEMENT_NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);
    let created_at = now_millis();
    let payload = ctx
        .crypto
        .seal_announcement(&ctx.identity, recipient, &nonce, created_at)?;
    Ok(OutgoingAnnouncement {
        nonce,
        created_at,
        payload,
        published: false,
    })
}

/// Publish our announcement if the board hasn't accepted it yet.
async fn publish_outgoing(
    ctx: &AccountContext,
    discussion: &mut Discussion,
    recipient: &PublicIdentity,
) -> Result<(), ChatError> {
    let Some(outgoing) = discussion.outgoing.as_mut() else {
        return Ok(());
    };
    if outgoing.published {
        return Ok(());
    }

    let seeker = ctx.crypto.discovery_seeker(recipient);
    ctx.board.publish(&seeker, &outgoing.payload).await?;
    outgoing.published = true;
    discussion.updated_at = now_millis();
    ctx.storage.save_discussion(discussion)?;

    tracing::debug!(
        owner = %ctx.owner().short(),
        contact = %discussion.contact.short(),
        "Published announcement"
    );
    Ok(())
}

/// Start (or resume) a discussion with `contact`.
///
/// The discussion is persisted before the announcement is published; if the
/// board is unreachable the error is returned and the announcement stays in
/// the outbox for the next sync pass.
pub async fn initiate(ctx: &AccountContext, contact: &UserId) -> Result<Discussion, ChatError> {
    let recipient = ctx.contact_public(contact)?;
    let owner = ctx.owner().clone();

    let mut discussion = match ctx.storage.load_discussion(&owner, contact)? {
        Some(existing) if !existing.is_closed() && existing.outgoing.is_some() => existing,
        Some(mut existing) if !existing.is_closed() => {
            // Their announcement arrived but ours never went out
            existing.outgoing = Some(new_outgoing(ctx, &recipient)?);
            existing.status = DiscussionStatus::Active;
            existing.updated_at = now_millis();
            ctx.storage.save_discussion(&existing)?;
            existing
        }
        Some(mut closed) => {
            closed.outgoing = Some(new_outgoing(ctx, &recipient)?);
            closed.incoming = None;
            closed.ratchet = RatchetState::default();
            closed.status = DiscussionStatus::Pending;
            closed.updated_at = now_millis();
            ctx.storage.save_discussion(&closed)?;
            tracing::info!(contact = %contact.short(), "Restarting closed discussion");
            closed
        }
        None => {
            let fresh =
                Discussion::new_outgoing(owner.clone(), contact.clone(), new_outgoing(ctx, &recipient)?);
            if ctx.storage.insert_discussion_if_absent(&fresh)? {
                tracing::info!(contact = %contact.short(), "Started discussion");
                fresh
            } else {
                ctx.storage
                    .load_discussion(&owner, contact)?
                    .ok_or_else(|| ChatError::DiscussionNotFound(contact.to_string()))?
            }
        }
    };

    publish_outgoing(ctx, &mut discussion, &recipient).await?;
    Ok(discussion)
}

/// Validate an announcement fetched from our discovery seeker and apply it.
///
/// Unknown senders become contacts. Re-processing the same announcement is a
/// no-op. Returns [`ChatError::HandshakeValidationFailed`] for anything that
/// does not decrypt and verify.
pub async fn process_announcement(
    ctx: &AccountContext,
    payload: &[u8],
) -> Result<AnnouncementOutcome, ChatError> {
    let validated = ctx.crypto.open_announcement(&ctx.identity, payload)?;
    let owner = ctx.owner().clone();
    let sender = validated.sender;
    let sender_id = sender.user_id();

    let new_contact = match ctx.storage.load_contact(&owner, &sender_id)? {
        None => {
            ctx.storage
                .insert_contact_if_absent(&Contact::new(owner.clone(), sender, None))?
        }
        Some(mut known) if known.public_identity.is_none() => {
            known.public_identity = Some(sender);
            ctx.storage.save_contact(&known)?;
            false
        }
        Some(_) => false,
    };

    let (mut discussion, outcome) = match ctx.storage.load_discussion(&owner, &sender_id)? {
        None => {
            let mut fresh = Discussion::new_incoming(owner.clone(), sender_id.clone(), validated.to_incoming());
            fresh.outgoing = Some(new_outgoing(ctx, &sender)?);
            if !ctx.storage.insert_discussion_if_absent(&fresh)? {
                return Ok(AnnouncementOutcome::Duplicate);
            }
            let outcome = AnnouncementOutcome::Established {
                contact: sender_id.clone(),
                new_contact,
            };
            (fresh, outcome)
        }
        Some(mut existing) => {
            if let Some(current) = &existing.incoming {
                if current.id == validated.id {
                    return Ok(AnnouncementOutcome::Duplicate);
                }
                if validated.created_at <= current.created_at {
                    tracing::debug!(contact = %sender_id.short(), "Ignoring older announcement");
                    return Ok(AnnouncementOutcome::Stale);
                }
            }

            let outcome = if existing.is_closed() {
                existing.ratchet = RatchetState::default();
                existing.outgoing = Some(new_outgoing(ctx, &sender)?);
                AnnouncementOutcome::Reopened {
                    contact: sender_id.clone(),
                }
            } else if existing.incoming.is_some() {
                existing.ratchet.reset_incoming();
                AnnouncementOutcome::Superseded {
                    contact: sender_id.clone(),
                }
            } else {
                AnnouncementOutcome::Completed {
                    contact: sender_id.clone(),
                }
            };
            if existing.outgoing.is_none() {
                existing.outgoing = Some(new_outgoing(ctx, &sender)?);
            }
            existing.incoming = Some(validated.to_incoming());
            existing.status = DiscussionStatus::Active;
            existing.updated_at = now_millis();
            ctx.storage.save_discussion(&existing)?;
            (existing, outcome)
        }
    };

    tracing::info!(contact = %sender_id.short(), outcome = ?outcome, "Processed announcement");

    // Answer with our own announcement so the contact can derive our direction
    publish_outgoing(ctx, &mut discussion, &sender).await?;
    Ok(outcome)
}

/// Close the discussion with `contact`. History is kept.
pub fn reset(ctx: &AccountContext, contact: &UserId) -> Result<Discussion, ChatError> {
    let mut discussion = ctx
        .storage
        .load_discussion(ctx.owner(), contact)?
        .ok_or_else(|| ChatError::DiscussionNotFound(contact.to_string()))?;
    if discussion.is_closed() {
        return Ok(discussion);
    }
    discussion.status = DiscussionStatus::Closed;
    discussion.updated_at = now_millis();
    ctx.storage.save_discussion(&discussion)?;
    tracing::info!(contact = %contact.short(), "Discussion reset");
    Ok(discussion)
}

/// Re-publish announcements the board has not accepted yet.
///
/// Returns how many were published. Stops at the first board failure.
pub async fn publish_outbox(ctx: &AccountContext) -> Result<usize, ChatError> {
    let mut published = 0;
    for mut discussion in ctx.storage.list_discussions(ctx.owner())? {
        let pending = !discussion.is_closed()
            && discussion.outgoing.as_ref().is_some_and(|o| !o.published);
        if !pending {
            continue;
        }
        let recipient = match ctx.contact_public(&discussion.contact) {
            Ok(public) => public,
            Err(e) => {
                tracing::warn!(contact = %discussion.contact.short(), error = %e, "Skipping outbox entry");
                continue;
            }
        };
        publish_outgoing(ctx, &mut discussion, &recipient).await?;
        published += 1;
    }
    Ok(published)
}
