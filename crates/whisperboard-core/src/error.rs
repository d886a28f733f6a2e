//! Error types for Whisperboard

use thiserror::Error;

/// Main error type for Whisperboard operations
#[derive(Error, Debug)]
pub enum ChatError {
    /// Wrong password (AEAD tag mismatch) or a rejected/cancelled credential ceremony
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Contact has no public key material, so no handshake can start
    #[error("Missing peer key material for contact: {0}")]
    MissingPeerKeyMaterial(String),

    /// Announcement failed decryption or signature validation
    #[error("Handshake validation failed: {0}")]
    HandshakeValidationFailed(String),

    /// Board entry could not be decrypted under the expected seeker
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// The board could not be reached; retried on the next trigger
    #[error("Board unavailable: {0}")]
    BoardUnavailable(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Identity-related error (keys, user ids)
    #[error("Identity error: {0}")]
    Identity(String),

    /// No identity record exists for this user id
    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    /// Contact not found in storage
    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    /// Discussion not found in storage
    #[error("Discussion not found: {0}")]
    DiscussionNotFound(String),

    /// Invalid operation for current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The sync coordinator task is no longer running
    #[error("Sync coordinator stopped")]
    CoordinatorStopped,

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether the failure is expected to clear on a later sync trigger.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::BoardUnavailable(_))
    }
}

impl From<postcard::Error> for ChatError {
    fn from(err: postcard::Error) -> Self {
        ChatError::Serialization(err.to_string())
    }
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;
