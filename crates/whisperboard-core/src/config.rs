//! Runtime configuration for the messaging core

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Default PBKDF2-HMAC-SHA256 iteration count for password wrapping
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;

/// Tunables for custody, sessions and the sync coordinator.
///
/// Loaded from a JSON file by the CLI; every field has a default so a partial
/// file is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// PBKDF2 iterations used when wrapping a secret under a password
    pub pbkdf2_iterations: u32,
    /// Number of future receive seekers kept active per session
    pub seeker_window: u32,
    /// Interval trigger period while logged in and in the foreground
    pub foreground_interval_secs: u64,
    /// Minimum interval requested from the OS periodic-sync callback (a hint)
    pub periodic_sync_min_interval_secs: u64,
    /// Maximum characters kept in a discussion's last-message preview
    pub preview_max_chars: usize,
    /// Capacity of the coordinator's command channel
    pub command_queue_depth: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            seeker_window: 8,
            foreground_interval_secs: 30,
            periodic_sync_min_interval_secs: 15 * 60,
            preview_max_chars: 80,
            command_queue_depth: 64,
        }
    }
}

impl CoreConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let data = std::fs::read(path.as_ref())?;
        let config: CoreConfig = serde_json::from_slice(&data)
            .map_err(|e| ChatError::Serialization(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the coordinator or weaken custody
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.pbkdf2_iterations == 0 {
            return Err(ChatError::InvalidOperation(
                "pbkdf2_iterations must be greater than zero".to_string(),
            ));
        }
        if self.seeker_window == 0 {
            return Err(ChatError::InvalidOperation(
                "seeker_window must be greater than zero".to_string(),
            ));
        }
        if self.foreground_interval_secs == 0 {
            return Err(ChatError::InvalidOperation(
                "foreground_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.command_queue_depth == 0 {
            return Err(ChatError::InvalidOperation(
                "command_queue_depth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn foreground_interval(&self) -> Duration {
        Duration::from_secs(self.foreground_interval_secs)
    }

    pub fn periodic_sync_min_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_sync_min_interval_secs)
    }

    /// Cheap settings for tests: low PBKDF2 cost, small window.
    pub fn for_tests() -> Self {
        Self {
            pbkdf2_iterations: 1_000,
            seeker_window: 4,
            ..Self::default()
        }
    }
}
