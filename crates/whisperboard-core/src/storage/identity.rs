//! Identity record storage
//!
//! One record per local identity, keyed by user id. The record carries the
//! wrapped secret and is only ever replaced as a whole.

use redb::{ReadableTable, TableDefinition};

use super::{decode, encode, Storage};
use crate::custody::IdentityRecord;
use crate::error::ChatError;
use crate::identity::UserId;

/// Table for identity records (key: user id, value: postcard IdentityRecord)
pub(crate) const IDENTITY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("identity");

impl Storage {
    /// Insert a new identity record. Fails if the identity already exists.
    pub fn create_identity_record(&self, record: &IdentityRecord) -> Result<(), ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITY_TABLE)?;
            if table.get(record.user_id.as_str())?.is_some() {
                return Err(ChatError::InvalidOperation(format!(
                    "Identity {} already exists",
                    record.user_id
                )));
            }
            let data = encode(record)?;
            table.insert(record.user_id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Replace an existing identity record.
    pub fn save_identity_record(&self, record: &IdentityRecord) -> Result<(), ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITY_TABLE)?;
            let data = encode(record)?;
            table.insert(record.user_id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load an identity record, `None` if unknown.
    pub fn load_identity_record(&self, user_id: &UserId) -> Result<Option<IdentityRecord>, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(IDENTITY_TABLE)?;

        match table.get(user_id.as_str())? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// List all local identities
    pub fn list_identity_records(&self) -> Result<Vec<IdentityRecord>, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(IDENTITY_TABLE)?;

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }
}
