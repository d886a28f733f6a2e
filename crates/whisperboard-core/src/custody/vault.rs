//! Persisted key custody for local identities

use super::{enroll, open, seal, unwrap_secret, wrap_secret, Credential, IdentityRecord, ScopedSecret};
use crate::config::CoreConfig;
use crate::error::ChatError;
use crate::identity::{IdentityKeypair, UserId};
use crate::storage::Storage;
use crate::types::now_millis;

/// Creates, unlocks and re-wraps identity records in storage.
#[derive(Clone)]
pub struct KeyCustody {
    storage: Storage,
    config: CoreConfig,
}

impl KeyCustody {
    pub fn new(storage: Storage, config: CoreConfig) -> Self {
        Self { storage, config }
    }

    /// Generate a fresh identity and persist it wrapped under `credential`.
    pub async fn create_identity(&self, credential: &Credential) -> Result<IdentityRecord, ChatError> {
        let keypair = IdentityKeypair::generate()?;
        self.store_new(ScopedSecret::from_keypair(&keypair), credential)
            .await
    }

    /// Persist an existing secret (e.g. restored from a recovery phrase).
    pub async fn import_identity(
        &self,
        secret: ScopedSecret,
        credential: &Credential,
    ) -> Result<IdentityRecord, ChatError> {
        self.store_new(secret, credential).await
    }

    async fn store_new(
        &self,
        secret: ScopedSecret,
        credential: &Credential,
    ) -> Result<IdentityRecord, ChatError> {
        let keypair = secret.keypair();
        let wrapped = wrap_secret(secret.expose(), credential, &self.config).await?;
        let now = now_millis();
        let record = IdentityRecord {
            user_id: keypair.user_id(),
            public_identity: keypair.public_identity(),
            wrapped,
            created_at: now,
            updated_at: now,
        };
        self.storage.create_identity_record(&record)?;

        tracing::info!(
            user = %record.user_id.short(),
            method = %credential.method(),
            "Created identity"
        );
        Ok(record)
    }

    pub fn load_record(&self, user_id: &UserId) -> Result<IdentityRecord, ChatError> {
        self.storage
            .load_identity_record(user_id)?
            .ok_or_else(|| ChatError::IdentityNotFound(user_id.to_string()))
    }

    pub fn list_identities(&self) -> Result<Vec<IdentityRecord>, ChatError> {
        self.storage.list_identity_records()
    }

    async fn unwrap_checked(
        &self,
        record: &IdentityRecord,
        credential: &Credential,
    ) -> Result<ScopedSecret, ChatError> {
        let secret = unwrap_secret(&record.wrapped, credential).await?;
        if secret.keypair().user_id() != record.user_id {
            return Err(ChatError::Crypto(format!(
                "Unwrapped secret does not match identity {}",
                record.user_id
            )));
        }
        Ok(secret)
    }

    /// Unwrap the identity and rebuild its keypair for a logged-in session.
    pub async fn unlock(
        &self,
        user_id: &UserId,
        credential: &Credential,
    ) -> Result<IdentityKeypair, ChatError> {
        let record = self.load_record(user_id)?;
        let secret = self.unwrap_checked(&record, credential).await?;
        Ok(secret.keypair())
    }

    /// Run `f` with the unwrapped secret; the secret is zeroized on return.
    pub async fn with_secret<T>(
        &self,
        user_id: &UserId,
        credential: &Credential,
        f: impl FnOnce(&ScopedSecret) -> Result<T, ChatError>,
    ) -> Result<T, ChatError> {
        let record = self.load_record(user_id)?;
        let secret = self.unwrap_checked(&record, credential).await?;
        f(&secret)
    }

    /// Re-wrap the identity under a different credential.
    ///
    /// The stored record is only replaced once the new wrap has been verified
    /// to open; any failure leaves the existing record untouched.
    pub async fn switch_method(
        &self,
        user_id: &UserId,
        current: &Credential,
        new: &Credential,
    ) -> Result<IdentityRecord, ChatError> {
        let record = self.load_record(user_id)?;
        let secret = self.unwrap_checked(&record, current).await?;

        let (params, key) = enroll(secret.expose(), new, &self.config).await?;
        let wrapped = seal(secret.expose(), params, &key)?;
        let reopened = open(&wrapped, &key)?;
        if reopened.expose() != secret.expose() {
            return Err(ChatError::Crypto(
                "Re-wrapped secret failed verification".to_string(),
            ));
        }

        let updated = IdentityRecord {
            wrapped,
            updated_at: now_millis(),
            ..record
        };
        self.storage.save_identity_record(&updated)?;

        tracing::info!(
            user = %user_id.short(),
            method = %new.method(),
            "Switched wrapping method"
        );
        Ok(updated)
    }
}
