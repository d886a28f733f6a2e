//! Persistent storage using redb.
//!
//! This module provides ACID-compliant storage for:
//! - Identity records (public identity + wrapped secret)
//! - Contacts, scoped to the owning identity
//! - Discussions (one per owner/contact pair) including ratchet state
//! - Messages, keyed by the seeker they were exchanged under
//! - Board entries known to be undecryptable
//!
//! Sessions are never stored; they are re-derived from discussions.

use parking_lot::RwLock;
use redb::Database;
use std::path::Path;
use std::sync::Arc;

use crate::error::ChatError;

mod contacts;
mod discussions;
mod identity;
mod messages;

use contacts::CONTACTS_TABLE;
use discussions::DISCUSSIONS_TABLE;
use identity::IDENTITY_TABLE;
use messages::{DISCUSSION_MESSAGES_INDEX, MESSAGES_TABLE, REJECTED_ENTRIES_TABLE};

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(IDENTITY_TABLE)?;
            let _ = write_txn.open_table(CONTACTS_TABLE)?;
            let _ = write_txn.open_table(DISCUSSIONS_TABLE)?;
            let _ = write_txn.open_table(MESSAGES_TABLE)?;
            let _ = write_txn.open_table(DISCUSSION_MESSAGES_INDEX)?;
            let _ = write_txn.open_table(REJECTED_ENTRIES_TABLE)?;
        }
        write_txn.commit()?;

        tracing::debug!(path = %path.display(), "Opened storage");

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Get a reference to the shared database handle
    pub(crate) fn db_handle(&self) -> Arc<RwLock<Database>> {
        self.db.clone()
    }
}

/// Key for records scoped to one owner: `{owner}/{suffix}`
pub(crate) fn scoped_key(owner: &str, suffix: &str) -> String {
    format!("{}/{}", owner, suffix)
}

/// Exclusive upper bound for a prefix range scan over `&str` keys.
pub(crate) fn prefix_end(prefix: &str) -> String {
    // Keys are ASCII, so every key under the prefix sorts below this.
    let mut end = prefix.to_string();
    end.push('\u{10FFFF}');
    end
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ChatError> {
    postcard::to_allocvec(value).map_err(|e| ChatError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ChatError> {
    postcard::from_bytes(bytes).map_err(|e| ChatError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_storage_creation() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let _storage = Storage::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_storage_creates_parent_dirs() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("dir").join("test.redb");
        let _storage = Storage::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_storage_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        {
            let _storage = Storage::new(&db_path).unwrap();
        }
        assert!(Storage::new(&db_path).is_ok());
    }

    #[test]
    fn test_prefix_end_bounds_prefix() {
        let prefix = scoped_key("wb:zA", "");
        let end = prefix_end(&prefix);
        assert!(scoped_key("wb:zA", "wb:zzzz").as_str() < end.as_str());
        assert!(end.as_str() < scoped_key("wb:zB", "").as_str());
    }
}
