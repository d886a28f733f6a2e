//! Whisperboard Core Library
//!
//! End-to-end encrypted messaging over a shared, untrusted, append-only board.
//!
//! ## Overview
//!
//! Peers never address each other directly. Everything is published to a
//! board under a *seeker*: a lookup key only the two parties of a session can
//! compute. Observers of the board see opaque keys and ciphertext.
//!
//! - **Key custody** ([`custody`]): the long-term identity secret lives on disk
//!   wrapped under a password (PBKDF2 + ChaCha20-Poly1305) or a platform
//!   credential, and is only unwrapped inside a short scope.
//! - **Handshake** ([`session::handshake`]): an announcement under the
//!   recipient's discovery seeker roots one direction of a session; the
//!   recipient answers with its own.
//! - **Exchange** ([`session::exchange`]): one seeker per message, derived
//!   from the direction root and a ratcheting index.
//! - **Sync** ([`sync`]): a single coordinator task per logged-in identity
//!   coalesces triggers and runs one pass at a time.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use whisperboard_core::{CoreConfig, Credential, MemoryBoard, Messenger, Storage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = Storage::new("./data/whisperboard.redb")?;
//!     let messenger = Messenger::new(storage, Arc::new(MemoryBoard::new()), CoreConfig::default())?;
//!
//!     let credential = Credential::password("hunter2");
//!     let record = messenger.create_account(&credential).await?;
//!     let me = messenger.login(&record.user_id, &credential).await?;
//!
//!     let report = me.trigger_sync_and_wait().await?;
//!     println!("pass {} found {} new messages", report.pass_seq, report.new_messages);
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod config;
pub mod context;
pub mod crypto;
pub mod custody;
pub mod error;
pub mod identity;
pub mod logging;
pub mod messenger;
pub mod recovery;
pub mod session;
pub mod storage;
pub mod sync;
pub mod types;

// Re-exports
pub use board::{Board, BoardEntry, MemoryBoard};
pub use config::CoreConfig;
pub use context::AccountContext;
pub use crypto::AeadCipher;
pub use custody::{
    CeremonyError, CeremonyOutcome, Credential, IdentityRecord, KeyCustody, PlatformAuthenticator,
    ScopedSecret, SoftwareAuthenticator, WrappedKey, WrappingMethod,
};
pub use error::{ChatError, ChatResult};
pub use identity::{IdentityKeypair, PublicIdentity, UserId};
pub use messenger::{LoggedIn, Messenger};
pub use session::{AnnouncementOutcome, DefaultSessionCrypto, PeerSessionStatus, Session, SessionCrypto};
pub use storage::Storage;
pub use sync::{
    BackgroundBridge, BackgroundPoller, SyncCoordinator, SyncEvent, SyncHandle, SyncReport, TriggerSource,
};
pub use types::*;
