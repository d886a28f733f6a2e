//! Messenger - the caller-facing entry point
//!
//! `Messenger` owns the local store, the board and key custody for every
//! identity on this device. Logging in unwraps one identity and spawns its
//! sync coordinator; the returned [`LoggedIn`] handle carries every
//! operation that needs the unlocked account.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use whisperboard_core::{Credential, CoreConfig, MemoryBoard, Messenger, Storage};
//!
//! let storage = Storage::new("~/.whisperboard/alice/whisperboard.redb")?;
//! let messenger = Messenger::new(storage, Arc::new(MemoryBoard::new()), CoreConfig::default())?;
//!
//! let credential = Credential::password("correct horse");
//! let record = messenger.create_account(&credential).await?;
//! let alice = messenger.login(&record.user_id, &credential).await?;
//!
//! alice.add_contact(bob_public, Some("bob".into()))?;
//! alice.initialize_discussion(&bob_id).await?;
//! alice.trigger_sync()?;
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::board::Board;
use crate::config::CoreConfig;
use crate::context::AccountContext;
use crate::custody::{Credential, IdentityRecord, KeyCustody, PlatformAuthenticator, WrappingMethod};
use crate::error::ChatError;
use crate::identity::{PublicIdentity, UserId};
use crate::recovery;
use crate::session::{DefaultSessionCrypto, PeerSessionStatus, SessionCrypto};
use crate::storage::Storage;
use crate::sync::{
    spawn_foreground_trigger, spawn_interval_trigger, spawn_online_trigger, BackgroundBridge,
    PeriodicSyncRegistration, SyncCoordinator, SyncEvent, SyncHandle, SyncReport, TriggerSource,
};
use crate::types::{now_millis, Contact, Discussion, DiscussionId, Message, Seeker};

/// Device-level entry point: accounts, custody and login.
pub struct Messenger {
    storage: Storage,
    board: Arc<dyn Board>,
    crypto: Arc<dyn SessionCrypto>,
    authenticator: Option<Arc<dyn PlatformAuthenticator>>,
    custody: KeyCustody,
    config: CoreConfig,
}

impl Messenger {
    /// Create a messenger over `storage` and `board`.
    ///
    /// Fails if `config` does not validate.
    pub fn new(storage: Storage, board: Arc<dyn Board>, config: CoreConfig) -> Result<Self, ChatError> {
        config.validate()?;
        Ok(Self {
            custody: KeyCustody::new(storage.clone(), config.clone()),
            storage,
            board,
            crypto: Arc::new(DefaultSessionCrypto::new()),
            authenticator: None,
            config,
        })
    }

    /// Replace the session crypto capability.
    pub fn with_session_crypto(mut self, crypto: Arc<dyn SessionCrypto>) -> Self {
        self.crypto = crypto;
        self
    }

    /// Platform authenticator used to re-authenticate platform-wrapped identities.
    pub fn with_platform_authenticator(mut self, authenticator: Arc<dyn PlatformAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn custody(&self) -> &KeyCustody {
        &self.custody
    }

    /// Generate a new identity wrapped under `credential`.
    pub async fn create_account(&self, credential: &Credential) -> Result<IdentityRecord, ChatError> {
        self.custody.create_identity(credential).await
    }

    /// Restore an identity from its 24-word recovery phrase.
    pub async fn restore_account(
        &self,
        phrase: &str,
        credential: &Credential,
    ) -> Result<IdentityRecord, ChatError> {
        let secret = recovery::secret_from_mnemonic(phrase)?;
        self.custody.import_identity(secret, credential).await
    }

    /// Restore an identity from its base58 private key.
    pub async fn restore_account_from_private_key(
        &self,
        encoded: &str,
        credential: &Credential,
    ) -> Result<IdentityRecord, ChatError> {
        let secret = recovery::secret_from_private_key(encoded)?;
        self.custody.import_identity(secret, credential).await
    }

    pub fn list_accounts(&self) -> Result<Vec<IdentityRecord>, ChatError> {
        self.custody.list_identities()
    }

    /// Unlock `user_id`, spawn its coordinator and fire a login sync.
    pub async fn login(&self, user_id: &UserId, credential: &Credential) -> Result<LoggedIn, ChatError> {
        let identity = self.custody.unlock(user_id, credential).await?;
        let ctx = AccountContext::new(
            identity,
            self.storage.clone(),
            self.board.clone(),
            self.crypto.clone(),
            self.config.clone(),
        );
        let (handle, task) = SyncCoordinator::spawn(ctx.clone());
        handle.trigger_sync(TriggerSource::Login)?;

        info!(user = %user_id.short(), "Logged in");
        Ok(LoggedIn {
            ctx,
            handle,
            task: Mutex::new(Some(task)),
            triggers: Mutex::new(Vec::new()),
            custody: self.custody.clone(),
            authenticator: self.authenticator.clone(),
        })
    }
}

/// An unlocked account with a running sync coordinator.
///
/// Mutations go through the coordinator; reads go straight to storage.
pub struct LoggedIn {
    ctx: AccountContext,
    handle: SyncHandle,
    task: Mutex<Option<JoinHandle<()>>>,
    triggers: Mutex<Vec<JoinHandle<()>>>,
    custody: KeyCustody,
    authenticator: Option<Arc<dyn PlatformAuthenticator>>,
}

impl LoggedIn {
    pub fn user_id(&self) -> &UserId {
        self.ctx.owner()
    }

    pub fn public_identity(&self) -> PublicIdentity {
        self.ctx.public_identity()
    }

    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Contacts
    // ═══════════════════════════════════════════════════════════════════════

    /// Add or update a contact from its public identity.
    pub fn add_contact(&self, public: PublicIdentity, name: Option<String>) -> Result<Contact, ChatError> {
        let user_id = public.user_id();
        if &user_id == self.user_id() {
            return Err(ChatError::InvalidOperation("Cannot add yourself as a contact".to_string()));
        }

        let contact = match self.ctx.storage.load_contact(self.user_id(), &user_id)? {
            Some(existing) => Contact {
                name: name.or(existing.name),
                public_identity: Some(public),
                ..existing
            },
            None => Contact::new(self.user_id().clone(), public, name),
        };
        self.ctx.storage.save_contact(&contact)?;
        debug!(contact = %user_id.short(), "Saved contact");
        Ok(contact)
    }

    /// Record a contact known only by id. Session work with it fails with
    /// [`ChatError::MissingPeerKeyMaterial`] until its key arrives.
    pub fn add_contact_id(&self, user_id: UserId, name: Option<String>) -> Result<Contact, ChatError> {
        if &user_id == self.user_id() {
            return Err(ChatError::InvalidOperation("Cannot add yourself as a contact".to_string()));
        }
        let contact = Contact {
            owner: self.user_id().clone(),
            user_id,
            name,
            public_identity: None,
            created_at: now_millis(),
        };
        self.ctx.storage.insert_contact_if_absent(&contact)?;
        Ok(contact)
    }

    pub fn list_contacts(&self) -> Result<Vec<Contact>, ChatError> {
        self.ctx.storage.list_contacts(self.user_id())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync
    // ═══════════════════════════════════════════════════════════════════════

    /// Request a sync pass; returns once the request is queued.
    pub fn trigger_sync(&self) -> Result<(), ChatError> {
        self.handle.trigger_sync(TriggerSource::Manual)
    }

    /// Request a sync pass and wait for its report.
    pub async fn trigger_sync_and_wait(&self) -> Result<SyncReport, ChatError> {
        self.handle.sync_now(TriggerSource::Manual).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.handle.subscribe()
    }

    /// Fire an interval trigger every `foreground_interval_secs` until logout.
    pub fn start_interval_sync(&self) {
        let task = spawn_interval_trigger(self.handle.clone(), self.ctx.config.foreground_interval());
        self.triggers.lock().push(task);
    }

    /// Trigger a sync whenever `online` flips to `true`.
    pub fn watch_connectivity(&self, online: watch::Receiver<bool>) {
        let task = spawn_online_trigger(self.handle.clone(), online);
        self.triggers.lock().push(task);
    }

    /// Trigger a sync whenever `visible` flips to `true`.
    pub fn watch_visibility(&self, visible: watch::Receiver<bool>) {
        let task = spawn_foreground_trigger(self.handle.clone(), visible);
        self.triggers.lock().push(task);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Discussions
    // ═══════════════════════════════════════════════════════════════════════

    /// Start (or restart) a discussion with `contact` by announcing to it.
    pub async fn initialize_discussion(&self, contact: &UserId) -> Result<Discussion, ChatError> {
        self.handle.initialize_discussion(contact).await
    }

    pub async fn send_message(&self, contact: &UserId, text: &str) -> Result<Message, ChatError> {
        self.handle.send_message(contact, text).await
    }

    pub async fn reset_discussion(&self, contact: &UserId) -> Result<Discussion, ChatError> {
        self.handle.reset_discussion(contact).await
    }

    pub fn get_discussions_for_contact(
        &self,
        owner: &UserId,
        contact: &UserId,
    ) -> Result<Vec<Discussion>, ChatError> {
        self.ctx.storage.get_discussions_for_contact(owner, contact)
    }

    /// Discussions of this account, most recently updated first.
    pub fn list_discussions(&self) -> Result<Vec<Discussion>, ChatError> {
        self.ctx.storage.list_discussions(self.user_id())
    }

    /// Messages of one of this account's discussions, oldest first.
    pub fn list_messages(&self, discussion: &DiscussionId) -> Result<Vec<Message>, ChatError> {
        match self.ctx.storage.load_discussion_by_id(discussion)? {
            Some(found) if &found.owner == self.user_id() => self.ctx.storage.list_messages(discussion),
            _ => Err(ChatError::DiscussionNotFound(discussion.to_string())),
        }
    }

    pub fn peer_session_status(&self, contact: &UserId) -> Result<PeerSessionStatus, ChatError> {
        let discussion = self.ctx.storage.load_discussion(self.user_id(), contact)?;
        Ok(PeerSessionStatus::of(discussion.as_ref()))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Background worker
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn active_seekers(&self) -> Result<Vec<Seeker>, ChatError> {
        self.handle.active_seekers().await
    }

    pub fn background_bridge(&self) -> BackgroundBridge {
        BackgroundBridge::new(self.handle.clone())
    }

    pub fn periodic_sync_registration(&self) -> PeriodicSyncRegistration {
        PeriodicSyncRegistration::from_config(&self.ctx.config)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Recovery and custody
    // ═══════════════════════════════════════════════════════════════════════

    /// Render the identity secret as a 24-word recovery phrase.
    ///
    /// Password-wrapped identities must re-enter the password; platform-wrapped
    /// identities run the authenticator ceremony.
    pub async fn show_mnemonic_backup(&self, password: Option<&str>) -> Result<Zeroizing<String>, ChatError> {
        let credential = self.reauthenticate(password)?;
        self.custody
            .with_secret(self.user_id(), &credential, recovery::render_mnemonic)
            .await
    }

    /// Render the identity secret as a base58 private key.
    pub async fn show_private_key(&self, password: Option<&str>) -> Result<Zeroizing<String>, ChatError> {
        let credential = self.reauthenticate(password)?;
        self.custody
            .with_secret(self.user_id(), &credential, |secret| {
                Ok(recovery::render_private_key(secret))
            })
            .await
    }

    pub async fn switch_wrapping_method(
        &self,
        current: &Credential,
        new: &Credential,
    ) -> Result<IdentityRecord, ChatError> {
        self.custody.switch_method(self.user_id(), current, new).await
    }

    pub fn wrapping_method(&self) -> Result<WrappingMethod, ChatError> {
        Ok(self.custody.load_record(self.user_id())?.wrapped.method())
    }

    fn reauthenticate(&self, password: Option<&str>) -> Result<Credential, ChatError> {
        match self.wrapping_method()? {
            WrappingMethod::Password => password
                .map(Credential::password)
                .ok_or(ChatError::AuthenticationFailed),
            WrappingMethod::PlatformCredential => self
                .authenticator
                .clone()
                .map(Credential::platform)
                .ok_or(ChatError::AuthenticationFailed),
        }
    }

    /// Stop trigger tasks and the coordinator, waiting for it to finish.
    pub async fn logout(self) {
        for task in self.triggers.lock().drain(..) {
            task.abort();
        }
        self.handle.shutdown().await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!(user = %self.user_id().short(), "Logged out");
    }
}
