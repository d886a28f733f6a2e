//! Discussion storage
//!
//! Keyed by [`DiscussionId`] (`{owner}/{contact}`), so an owner can never hold
//! two discussions with the same contact.

use redb::{ReadableTable, TableDefinition};

use super::{decode, encode, prefix_end, scoped_key, Storage};
use crate::error::ChatError;
use crate::identity::UserId;
use crate::types::{Discussion, DiscussionId};

/// Table for discussions (key: `{owner}/{contact}`, value: postcard Discussion)
pub(crate) const DISCUSSIONS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("discussions");

impl Storage {
    /// Insert a discussion unless one already exists for the pair.
    ///
    /// Returns `true` if the discussion was inserted.
    pub fn insert_discussion_if_absent(&self, discussion: &Discussion) -> Result<bool, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(DISCUSSIONS_TABLE)?;
            let id = discussion.id();
            if table.get(id.as_str())?.is_some() {
                false
            } else {
                let data = encode(discussion)?;
                table.insert(id.as_str(), data.as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    /// Save (insert or overwrite) a discussion.
    pub fn save_discussion(&self, discussion: &Discussion) -> Result<(), ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(DISCUSSIONS_TABLE)?;
            let data = encode(discussion)?;
            table.insert(discussion.id().as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load the discussion between `owner` and `contact`
    pub fn load_discussion(
        &self,
        owner: &UserId,
        contact: &UserId,
    ) -> Result<Option<Discussion>, ChatError> {
        self.load_discussion_by_id(&DiscussionId::new(owner, contact))
    }

    pub fn load_discussion_by_id(&self, id: &DiscussionId) -> Result<Option<Discussion>, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(DISCUSSIONS_TABLE)?;

        match table.get(id.as_str())? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// All discussions of `owner`, most recently updated first.
    pub fn list_discussions(&self, owner: &UserId) -> Result<Vec<Discussion>, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(DISCUSSIONS_TABLE)?;

        let start = scoped_key(owner.as_str(), "");
        let end = prefix_end(&start);
        let mut discussions: Vec<Discussion> = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            discussions.push(decode(value.value())?);
        }
        discussions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(discussions)
    }

    /// Discussions between `owner` and `contact`.
    ///
    /// Holds zero or one element; the list shape lets callers assert that.
    pub fn get_discussions_for_contact(
        &self,
        owner: &UserId,
        contact: &UserId,
    ) -> Result<Vec<Discussion>, ChatError> {
        Ok(self.load_discussion(owner, contact)?.into_iter().collect())
    }
}
