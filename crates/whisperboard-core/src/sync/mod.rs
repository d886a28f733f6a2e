//! Sync coordination for a logged-in account
//!
//! All work for an account runs on one coordinator task:
//! - [`coordinator`]: command loop, trigger coalescing, single-flight passes
//! - [`pass`]: the steps of one pass (outbox, announcements, messages)
//! - [`triggers`]: interval and edge-triggered sources
//! - [`background`]: JSON bridge for a background worker and its poller
//! - [`events`]: reports and broadcast events

pub mod background;
pub mod coordinator;
pub mod events;
mod pass;
pub mod triggers;

pub use background::{BackgroundBridge, BackgroundPoller, ClientReply, PeriodicSyncRegistration, WorkerMessage};
pub use coordinator::{SyncCoordinator, SyncHandle};
pub use events::{FailureKind, PassFailure, SyncEvent, SyncReport, TriggerSource};
pub use triggers::{spawn_edge_trigger, spawn_foreground_trigger, spawn_interval_trigger, spawn_online_trigger};
