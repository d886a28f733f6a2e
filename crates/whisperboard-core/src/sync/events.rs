//! Sync event types and pass reports
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  TriggerSource: why a pass was requested                        │
//! │  SyncReport: outcome of one pass (counts, failures, abort)      │
//! │  SyncEvent: notifications broadcast by the coordinator          │
//! │  ├── PassStarted / PassFinished                                 │
//! │  ├── SessionChanged: an announcement changed a discussion       │
//! │  └── MessagesReceived: new messages committed for a contact     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::UserId;
use crate::session::AnnouncementOutcome;
use crate::types::{now_millis, Seeker};

/// What asked for a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerSource {
    Login,
    Foreground,
    Interval,
    BackgroundWorker,
    PeriodicSync,
    NetworkOnline,
    Manual,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerSource::Login => "login",
            TriggerSource::Foreground => "foreground",
            TriggerSource::Interval => "interval",
            TriggerSource::BackgroundWorker => "background-worker",
            TriggerSource::PeriodicSync => "periodic-sync",
            TriggerSource::NetworkOnline => "network-online",
            TriggerSource::Manual => "manual",
        };
        write!(f, "{}", name)
    }
}

/// Category of a per-item failure inside a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A board entry under an active seeker did not decrypt
    Decryption,
    /// A session could not be materialized
    Session,
    /// Local persistence failed for one discussion
    Storage,
}

/// One isolated failure; the rest of the pass carried on.
#[derive(Debug, Clone, PartialEq)]
pub struct PassFailure {
    pub kind: FailureKind,
    pub contact: Option<UserId>,
    pub seeker: Option<Seeker>,
    pub error: String,
}

/// Outcome of one sync pass
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Monotonic per coordinator; passes never overlap
    pub pass_seq: u64,
    /// Triggers coalesced into this pass
    pub sources: Vec<TriggerSource>,
    pub started_at: i64,
    pub finished_at: i64,
    /// Outbox announcements the board accepted this pass
    pub announcements_published: usize,
    /// Announcements that changed a discussion
    pub handshakes_completed: usize,
    pub new_messages: usize,
    /// Entries skipped because their seeker was already consumed
    pub stale_entries: usize,
    pub failures: Vec<PassFailure>,
    /// Set when the board was unreachable; no later step ran
    pub aborted: Option<String>,
}

impl SyncReport {
    pub(crate) fn new(pass_seq: u64, sources: Vec<TriggerSource>) -> Self {
        Self {
            pass_seq,
            sources,
            started_at: now_millis(),
            finished_at: 0,
            announcements_published: 0,
            handshakes_completed: 0,
            new_messages: 0,
            stale_entries: 0,
            failures: Vec::new(),
            aborted: None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Whether the pass changed anything locally
    pub fn made_progress(&self) -> bool {
        self.handshakes_completed > 0 || self.new_messages > 0 || self.announcements_published > 0
    }
}

/// Events emitted by the sync coordinator
#[derive(Debug, Clone)]
pub enum SyncEvent {
    PassStarted {
        pass_seq: u64,
        sources: Vec<TriggerSource>,
    },
    PassFinished {
        report: SyncReport,
    },
    /// An announcement established, completed or re-keyed a discussion
    SessionChanged {
        contact: UserId,
        outcome: AnnouncementOutcome,
    },
    MessagesReceived {
        contact: UserId,
        count: usize,
    },
}

impl SyncEvent {
    /// Pass sequence number for pass lifecycle events
    pub fn pass_seq(&self) -> Option<u64> {
        match self {
            SyncEvent::PassStarted { pass_seq, .. } => Some(*pass_seq),
            SyncEvent::PassFinished { report } => Some(report.pass_seq),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_source_display() {
        assert_eq!(TriggerSource::NetworkOnline.to_string(), "network-online");
        assert_eq!(TriggerSource::Manual.to_string(), "manual");
    }

    #[test]
    fn test_new_report_is_empty() {
        let report = SyncReport::new(3, vec![TriggerSource::Login]);
        assert_eq!(report.pass_seq, 3);
        assert!(!report.is_aborted());
        assert!(!report.made_progress());
    }

    #[test]
    fn test_event_pass_seq() {
        let event = SyncEvent::PassStarted {
            pass_seq: 7,
            sources: vec![TriggerSource::Interval],
        };
        assert_eq!(event.pass_seq(), Some(7));

        let event = SyncEvent::MessagesReceived {
            contact: crate::identity::IdentityKeypair::generate().unwrap().user_id(),
            count: 1,
        };
        assert_eq!(event.pass_seq(), None);
    }
}
