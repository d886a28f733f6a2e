//! Bridge between the coordinator and a background worker
//!
//! The worker cannot see keys or storage. It asks for the current active
//! seekers, polls the board with them, and reports back when something shows
//! up; the coordinator then runs a normal pass. Messages cross the boundary
//! as JSON tagged by `type`.
//!
//! Entries that already failed to decrypt stay on the board under a seeker
//! that is still active. The `SEEKERS` reply carries how many of those each
//! seeker has, and the worker only wakes the coordinator when it sees more.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::coordinator::SyncHandle;
use super::events::TriggerSource;
use crate::board::Board;
use crate::config::CoreConfig;
use crate::error::ChatError;
use crate::types::Seeker;

/// Messages sent by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    RequestSeekers,
    NewMessagesDetected,
    PeriodicSync,
}

/// Replies sent back to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientReply {
    Seekers {
        seekers: Vec<Vec<u8>>,
        /// Entries already handled under each seeker, in the same order
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        known: Vec<u32>,
    },
}

/// Registration requested from the OS periodic-sync facility.
///
/// The interval is a hint; the OS decides when (and whether) to fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicSyncRegistration {
    pub tag: String,
    pub min_interval: Duration,
}

impl PeriodicSyncRegistration {
    pub const TAG: &'static str = "whisperboard-sync";

    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            tag: Self::TAG.to_string(),
            min_interval: config.periodic_sync_min_interval(),
        }
    }
}

/// Coordinator side of the worker channel.
#[derive(Clone)]
pub struct BackgroundBridge {
    handle: SyncHandle,
}

impl BackgroundBridge {
    pub fn new(handle: SyncHandle) -> Self {
        Self { handle }
    }

    pub async fn handle_message(&self, message: WorkerMessage) -> Result<Option<ClientReply>, ChatError> {
        debug!(message = ?message, "Background worker message");
        match message {
            WorkerMessage::RequestSeekers => {
                let watched = self.handle.watched_seekers().await?;
                let known = if watched.iter().any(|(_, known)| *known > 0) {
                    watched.iter().map(|(_, known)| *known).collect()
                } else {
                    Vec::new()
                };
                Ok(Some(ClientReply::Seekers {
                    seekers: watched.iter().map(|(s, _)| s.as_bytes().to_vec()).collect(),
                    known,
                }))
            }
            WorkerMessage::NewMessagesDetected => {
                self.handle.trigger_sync(TriggerSource::BackgroundWorker)?;
                Ok(None)
            }
            WorkerMessage::PeriodicSync => {
                self.handle.trigger_sync(TriggerSource::PeriodicSync)?;
                Ok(None)
            }
        }
    }

    /// JSON entry point used across the worker boundary.
    pub async fn handle_json(&self, raw: &str) -> Result<Option<String>, ChatError> {
        let message: WorkerMessage = serde_json::from_str(raw)
            .map_err(|e| ChatError::Serialization(format!("Invalid worker message: {}", e)))?;
        match self.handle_message(message).await? {
            Some(reply) => Ok(Some(
                serde_json::to_string(&reply).map_err(|e| ChatError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }
}

/// Worker side: polls the board with seekers obtained from the bridge.
pub struct BackgroundPoller {
    board: Arc<dyn Board>,
}

impl BackgroundPoller {
    pub fn new(board: Arc<dyn Board>) -> Self {
        Self { board }
    }

    /// Poll once. Returns `true` if unhandled entries were found and a sync
    /// requested.
    pub async fn poll_once(&self, bridge: &BackgroundBridge) -> Result<bool, ChatError> {
        let request = serde_json::to_string(&WorkerMessage::RequestSeekers)
            .map_err(|e| ChatError::Serialization(e.to_string()))?;
        let Some(raw) = bridge.handle_json(&request).await? else {
            return Ok(false);
        };
        let ClientReply::Seekers { seekers, known } = serde_json::from_str::<ClientReply>(&raw)
            .map_err(|e| ChatError::Serialization(format!("Invalid seekers reply: {}", e)))?;

        let mut expected: HashMap<Seeker, u32> = HashMap::new();
        for (i, raw_seeker) in seekers.iter().enumerate() {
            if let Some(seeker) = Seeker::from_slice(raw_seeker) {
                expected.insert(seeker, known.get(i).copied().unwrap_or(0));
            }
        }
        if expected.is_empty() {
            return Ok(false);
        }

        let watched: Vec<Seeker> = expected.keys().copied().collect();
        let entries = self.board.fetch(&watched).await?;
        let mut found: HashMap<Seeker, u32> = HashMap::new();
        for entry in &entries {
            *found.entry(entry.seeker).or_default() += 1;
        }
        let unhandled = found
            .iter()
            .any(|(seeker, count)| *count > expected.get(seeker).copied().unwrap_or(0));
        if !unhandled {
            return Ok(false);
        }

        debug!(entries = entries.len(), "Background poll found entries");
        let notify = serde_json::to_string(&WorkerMessage::NewMessagesDetected)
            .map_err(|e| ChatError::Serialization(e.to_string()))?;
        bridge.handle_json(&notify).await?;
        Ok(true)
    }
}
