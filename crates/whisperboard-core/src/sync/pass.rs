//! One sync pass
//!
//! Steps, in order:
//! 1. re-publish announcements still in the outbox
//! 2. fetch our discovery seeker and process announcements
//! 3. fetch every active incoming seeker of every open discussion
//! 4. decrypt per discussion, then commit messages, ratchet and preview
//!    together
//! 5. repeat 3 and 4 for the discussions whose window moved, until none does
//!
//! A board failure aborts the pass before any later step; everything already
//! committed is safe to repeat. Failures inside one discussion are recorded
//! and the remaining discussions still run.

use std::collections::{HashMap, HashSet};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{FailureKind, PassFailure, SyncEvent, SyncReport, TriggerSource};
use crate::board::BoardEntry;
use crate::context::AccountContext;
use crate::error::ChatError;
use crate::identity::UserId;
use crate::session::{handshake, SeekerMatch, Session};
use crate::types::{now_millis, Seeker};

pub(crate) async fn run_pass(
    ctx: &AccountContext,
    pass_seq: u64,
    sources: Vec<TriggerSource>,
    event_tx: &broadcast::Sender<SyncEvent>,
) -> SyncReport {
    let mut report = SyncReport::new(pass_seq, sources);

    if let Err(e) = execute(ctx, &mut report, event_tx).await {
        warn!(pass_seq, error = %e, "Sync pass aborted");
        report.aborted = Some(e.to_string());
    }
    report.finished_at = now_millis();

    info!(
        pass_seq,
        handshakes = report.handshakes_completed,
        new_messages = report.new_messages,
        failures = report.failures.len(),
        aborted = report.is_aborted(),
        "Sync pass finished"
    );
    report
}

async fn execute(
    ctx: &AccountContext,
    report: &mut SyncReport,
    event_tx: &broadcast::Sender<SyncEvent>,
) -> Result<(), ChatError> {
    report.announcements_published = handshake::publish_outbox(ctx).await?;

    process_announcements(ctx, report, event_tx).await?;

    // Each round fetches the windows the previous round opened, so a backlog
    // larger than one window drains within the pass.
    let mut received: Vec<(UserId, usize)> = Vec::new();
    let drained = drain_messages(ctx, report, &mut received).await;

    // Earlier rounds are committed even when a later fetch aborts
    for (contact, count) in received {
        report.new_messages += count;
        let _ = event_tx.send(SyncEvent::MessagesReceived { contact, count });
    }
    drained
}

async fn drain_messages(
    ctx: &AccountContext,
    report: &mut SyncReport,
    received: &mut Vec<(UserId, usize)>,
) -> Result<(), ChatError> {
    let mut advanced: Option<HashSet<UserId>> = None;
    let mut round = 0u32;
    loop {
        round += 1;
        let sessions = materialize_sessions(ctx, advanced.as_ref(), report)?;
        if sessions.is_empty() {
            return Ok(());
        }
        let moved = ingest_round(ctx, sessions, round, report, received).await?;
        if moved.is_empty() {
            return Ok(());
        }
        advanced = Some(moved);
    }
}

/// Fetch every active seeker of `sessions` once and ingest what comes back.
///
/// Returns the contacts whose receive ratchet moved.
async fn ingest_round(
    ctx: &AccountContext,
    sessions: Vec<Session>,
    round: u32,
    report: &mut SyncReport,
    received: &mut Vec<(UserId, usize)>,
) -> Result<HashSet<UserId>, ChatError> {
    let mut routing: HashMap<Seeker, usize> = HashMap::new();
    for (slot, session) in sessions.iter().enumerate() {
        for seeker in session.compute_seekers() {
            routing.insert(seeker, slot);
        }
    }
    let seekers: Vec<Seeker> = routing.keys().copied().collect();
    debug!(round, sessions = sessions.len(), seekers = seekers.len(), "Fetching active seekers");
    let entries = ctx.board.fetch(&seekers).await?;

    let mut grouped: Vec<Vec<BoardEntry>> = vec![Vec::new(); sessions.len()];
    for entry in entries {
        if let Some(&slot) = routing.get(&entry.seeker) {
            grouped[slot].push(entry);
        }
    }

    let mut advanced = HashSet::new();
    for (session, entries) in sessions.into_iter().zip(grouped) {
        if entries.is_empty() {
            continue;
        }
        let contact = session.discussion().contact.clone();
        match ingest(ctx, session, entries, report) {
            Ok(outcome) => {
                if outcome.inserted > 0 {
                    match received.iter_mut().find(|(c, _)| *c == contact) {
                        Some((_, count)) => *count += outcome.inserted,
                        None => received.push((contact.clone(), outcome.inserted)),
                    }
                }
                if outcome.advanced {
                    advanced.insert(contact);
                }
            }
            Err(e) => {
                warn!(contact = %contact.short(), error = %e, "Failed to ingest messages");
                report.failures.push(PassFailure {
                    kind: FailureKind::Storage,
                    contact: Some(contact),
                    seeker: None,
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(advanced)
}

async fn process_announcements(
    ctx: &AccountContext,
    report: &mut SyncReport,
    event_tx: &broadcast::Sender<SyncEvent>,
) -> Result<(), ChatError> {
    let discovery = ctx.crypto.discovery_seeker(&ctx.public_identity());
    let entries = ctx.board.fetch(&[discovery]).await?;

    for entry in entries {
        if ctx.storage.is_rejected_entry(&entry.seeker, &entry.payload)? {
            continue;
        }
        match handshake::process_announcement(ctx, &entry.payload).await {
            Ok(outcome) => {
                if let Some(contact) = outcome.contact() {
                    report.handshakes_completed += 1;
                    let _ = event_tx.send(SyncEvent::SessionChanged {
                        contact: contact.clone(),
                        outcome: outcome.clone(),
                    });
                }
            }
            Err(ChatError::HandshakeValidationFailed(reason)) => {
                // Anyone can write under a discovery seeker
                debug!(reason = %reason, "Dropping invalid announcement");
                ctx.storage.record_rejected_entry(&entry.seeker, &entry.payload)?;
            }
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Failed to process announcement");
                report.failures.push(PassFailure {
                    kind: FailureKind::Session,
                    contact: None,
                    seeker: Some(entry.seeker),
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Open sessions with an incoming half, limited to `only` when given.
fn materialize_sessions(
    ctx: &AccountContext,
    only: Option<&HashSet<UserId>>,
    report: &mut SyncReport,
) -> Result<Vec<Session>, ChatError> {
    let mut sessions = Vec::new();
    for discussion in ctx.storage.list_discussions(ctx.owner())? {
        if discussion.is_closed() || discussion.incoming.is_none() {
            continue;
        }
        if only.is_some_and(|contacts| !contacts.contains(&discussion.contact)) {
            continue;
        }
        let contact = discussion.contact.clone();
        match Session::materialize(ctx, discussion) {
            Ok(session) => sessions.push(session),
            Err(e) => {
                warn!(contact = %contact.short(), error = %e, "Cannot materialize session");
                report.failures.push(PassFailure {
                    kind: FailureKind::Session,
                    contact: Some(contact),
                    seeker: None,
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(sessions)
}

struct IngestOutcome {
    inserted: usize,
    advanced: bool,
}

/// Decrypt a discussion's entries and commit the results in one transaction.
fn ingest(
    ctx: &AccountContext,
    mut session: Session,
    entries: Vec<BoardEntry>,
    report: &mut SyncReport,
) -> Result<IngestOutcome, ChatError> {
    let contact = session.discussion().contact.clone();
    let ratchet_before = session.discussion().ratchet.clone();
    let mut received = Vec::new();

    for entry in entries {
        match session.classify(&entry.seeker) {
            SeekerMatch::Active(_) => {}
            SeekerMatch::Consumed(index) => {
                debug!(contact = %contact.short(), index, seeker = %entry.seeker, "Skipping entry under consumed seeker");
                report.stale_entries += 1;
                continue;
            }
            SeekerMatch::Unknown => continue,
        }
        if ctx.storage.is_rejected_entry(&entry.seeker, &entry.payload)? {
            continue;
        }

        match session.decrypt(&entry.seeker, &entry.payload) {
            Ok(message) => received.push(message),
            Err(ChatError::DecryptionFailed(reason)) => {
                if ctx.storage.record_rejected_entry(&entry.seeker, &entry.payload)? {
                    warn!(contact = %contact.short(), seeker = %entry.seeker, reason = %reason, "Undecryptable entry");
                    report.failures.push(PassFailure {
                        kind: FailureKind::Decryption,
                        contact: Some(contact.clone()),
                        seeker: Some(entry.seeker),
                        error: reason,
                    });
                }
            }
            Err(e) => return Err(e),
        }
    }

    if received.is_empty() {
        return Ok(IngestOutcome {
            inserted: 0,
            advanced: false,
        });
    }

    let mut discussion = session.into_discussion();
    for message in &received {
        discussion.refresh_preview(message, ctx.config.preview_max_chars);
    }
    discussion.updated_at = now_millis();
    let advanced = discussion.ratchet != ratchet_before;
    // Indices re-walked after a restart are already stored and insert nothing
    let inserted = ctx.storage.commit_discussion_update(&discussion, &received)?;
    debug!(contact = %contact.short(), inserted, advanced, "Committed incoming messages");
    Ok(IngestOutcome { inserted, advanced })
}
