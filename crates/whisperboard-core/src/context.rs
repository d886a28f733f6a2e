//! Per-account context passed explicitly to handshake, exchange and sync code

use std::sync::Arc;

use crate::board::Board;
use crate::config::CoreConfig;
use crate::error::ChatError;
use crate::identity::{IdentityKeypair, PublicIdentity, UserId};
use crate::session::SessionCrypto;
use crate::storage::Storage;
use crate::types::Contact;

/// Everything a logged-in account needs to talk to storage and the board.
#[derive(Clone)]
pub struct AccountContext {
    user_id: UserId,
    pub identity: Arc<IdentityKeypair>,
    pub storage: Storage,
    pub board: Arc<dyn Board>,
    pub crypto: Arc<dyn SessionCrypto>,
    pub config: CoreConfig,
}

impl AccountContext {
    pub fn new(
        identity: IdentityKeypair,
        storage: Storage,
        board: Arc<dyn Board>,
        crypto: Arc<dyn SessionCrypto>,
        config: CoreConfig,
    ) -> Self {
        Self {
            user_id: identity.user_id(),
            identity: Arc::new(identity),
            storage,
            board,
            crypto,
            config,
        }
    }

    /// The logged-in identity
    pub fn owner(&self) -> &UserId {
        &self.user_id
    }

    pub fn public_identity(&self) -> PublicIdentity {
        self.identity.public_identity()
    }

    pub fn load_contact(&self, contact: &UserId) -> Result<Contact, ChatError> {
        self.storage
            .load_contact(&self.user_id, contact)?
            .ok_or_else(|| ChatError::ContactNotFound(contact.to_string()))
    }

    /// Contact's public identity, required for any session work.
    pub fn contact_public(&self, contact: &UserId) -> Result<PublicIdentity, ChatError> {
        self.load_contact(contact)?
            .public_identity
            .ok_or_else(|| ChatError::MissingPeerKeyMaterial(contact.to_string()))
    }
}
