//! Platform credential ceremonies (biometric / device-bound authenticators)
//!
//! A platform authenticator creates a credential bound to the device and,
//! after a successful user-verification ceremony, yields a stable 32-byte
//! key for that credential. The key wraps the identity secret.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use thiserror::Error;

use crate::error::ChatError;
use crate::identity::UserId;

/// Failure of a credential ceremony
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CeremonyError {
    #[error("credential ceremony rejected")]
    Rejected,

    #[error("credential ceremony cancelled by the user")]
    Cancelled,

    #[error("platform authenticator unavailable: {0}")]
    Unavailable(String),
}

impl From<CeremonyError> for ChatError {
    fn from(err: CeremonyError) -> Self {
        tracing::debug!(error = %err, "Platform credential ceremony failed");
        ChatError::AuthenticationFailed
    }
}

/// Device authenticator capable of producing a per-credential wrapping key.
#[async_trait]
pub trait PlatformAuthenticator: Send + Sync {
    /// Register a new credential for `user`, returning its opaque id.
    async fn create_credential(&self, user: &UserId) -> Result<Vec<u8>, CeremonyError>;

    /// Run the verification ceremony and return the credential's key.
    async fn authenticate(&self, credential_id: &[u8]) -> Result<[u8; 32], CeremonyError>;
}

/// Outcome injected into the next [`SoftwareAuthenticator`] ceremony
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyOutcome {
    Approve,
    Reject,
    Cancel,
}

/// In-process authenticator with a device secret held in memory.
///
/// Stands in for a hardware authenticator in tests and the CLI demo. Keys are
/// `BLAKE3-keyed(device_secret, credential_id)`, so the same instance always
/// reproduces the same key for a credential.
pub struct SoftwareAuthenticator {
    device_secret: [u8; 32],
    queued: Mutex<VecDeque<CeremonyOutcome>>,
}

impl SoftwareAuthenticator {
    pub fn new() -> Self {
        let mut device_secret = [0u8; 32];
        rand::rng().fill_bytes(&mut device_secret);
        Self::with_device_secret(device_secret)
    }

    pub fn with_device_secret(device_secret: [u8; 32]) -> Self {
        Self {
            device_secret,
            queued: Mutex::new(VecDeque::new()),
        }
    }

    /// Force the outcome of the next ceremony. Unqueued ceremonies approve.
    pub fn queue_outcome(&self, outcome: CeremonyOutcome) {
        self.queued.lock().push_back(outcome);
    }

    fn next_outcome(&self) -> Result<(), CeremonyError> {
        match self.queued.lock().pop_front() {
            None | Some(CeremonyOutcome::Approve) => Ok(()),
            Some(CeremonyOutcome::Reject) => Err(CeremonyError::Rejected),
            Some(CeremonyOutcome::Cancel) => Err(CeremonyError::Cancelled),
        }
    }
}

impl Default for SoftwareAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SoftwareAuthenticator {
    fn drop(&mut self) {
        zeroize::Zeroize::zeroize(&mut self.device_secret);
    }
}

#[async_trait]
impl PlatformAuthenticator for SoftwareAuthenticator {
    async fn create_credential(&self, user: &UserId) -> Result<Vec<u8>, CeremonyError> {
        self.next_outcome()?;
        let mut credential_id = vec![0u8; 16];
        rand::rng().fill_bytes(&mut credential_id);
        tracing::debug!(user = %user.short(), credential = %hex::encode(&credential_id), "Created software credential");
        Ok(credential_id)
    }

    async fn authenticate(&self, credential_id: &[u8]) -> Result<[u8; 32], CeremonyError> {
        self.next_outcome()?;
        Ok(*blake3::keyed_hash(&self.device_secret, credential_id).as_bytes())
    }
}
