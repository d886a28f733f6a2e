//! Message storage
//!
//! Messages are keyed by the seeker they travelled under, which makes
//! ingesting the same board entry twice a no-op. A secondary index orders a
//! discussion's messages by timestamp.

use redb::{ReadableTable, TableDefinition};

use super::discussions::DISCUSSIONS_TABLE;
use super::{decode, encode, prefix_end, Storage};
use crate::error::ChatError;
use crate::types::{now_millis, Discussion, DiscussionId, Message, Seeker};

/// Messages (key: seeker hex, value: postcard Message)
pub(crate) const MESSAGES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");

/// Ordering index (key: `{discussion}/{timestamp:020}/{seeker}`, value: empty)
pub(crate) const DISCUSSION_MESSAGES_INDEX: TableDefinition<&str, &[u8]> =
    TableDefinition::new("discussion_messages");

/// Board entries that failed to decrypt (key: `{seeker}/{payload hash}`, value: timestamp)
pub(crate) const REJECTED_ENTRIES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("rejected_entries");

fn index_key(discussion: &DiscussionId, timestamp: i64, seeker: &Seeker) -> String {
    format!(
        "{}/{:020}/{}",
        discussion.as_str(),
        timestamp.max(0),
        seeker.to_hex()
    )
}

fn rejected_key(seeker: &Seeker, payload: &[u8]) -> String {
    format!("{}/{}", seeker.to_hex(), blake3::hash(payload).to_hex())
}

impl Storage {
    /// Persist new messages and the updated discussion in one transaction.
    ///
    /// Messages whose seeker is already stored are skipped. Returns the number
    /// of messages actually inserted.
    pub fn commit_discussion_update(
        &self,
        discussion: &Discussion,
        messages: &[Message],
    ) -> Result<usize, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let mut inserted = 0;
        {
            let mut table = write_txn.open_table(MESSAGES_TABLE)?;
            let mut index = write_txn.open_table(DISCUSSION_MESSAGES_INDEX)?;
            for message in messages {
                let key = message.seeker.to_hex();
                if table.get(key.as_str())?.is_some() {
                    continue;
                }
                let data = encode(message)?;
                table.insert(key.as_str(), data.as_slice())?;
                let ikey = index_key(&message.discussion, message.timestamp, &message.seeker);
                let empty: &[u8] = &[];
                index.insert(ikey.as_str(), empty)?;
                inserted += 1;
            }

            let mut discussions = write_txn.open_table(DISCUSSIONS_TABLE)?;
            let data = encode(discussion)?;
            discussions.insert(discussion.id().as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(inserted)
    }

    /// Whether a message exists for `seeker`
    pub fn has_message(&self, seeker: &Seeker) -> Result<bool, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;
        Ok(table.get(seeker.to_hex().as_str())?.is_some())
    }

    /// Messages of a discussion ordered by timestamp (oldest first)
    pub fn list_messages(&self, discussion: &DiscussionId) -> Result<Vec<Message>, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let index = read_txn.open_table(DISCUSSION_MESSAGES_INDEX)?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;

        let start = format!("{}/", discussion.as_str());
        let end = prefix_end(&start);
        let mut messages = Vec::new();
        for entry in index.range(start.as_str()..end.as_str())? {
            let (key, _) = entry?;
            let seeker_hex = key.value().rsplit('/').next().unwrap_or_default().to_string();
            match table.get(seeker_hex.as_str())? {
                Some(data) => messages.push(decode(data.value())?),
                None => {
                    tracing::warn!(seeker = %seeker_hex, "Message index points at a missing message");
                }
            }
        }
        Ok(messages)
    }

    /// Remember that `payload` under `seeker` failed to decrypt.
    ///
    /// Returns `true` the first time a given entry is recorded.
    pub fn record_rejected_entry(&self, seeker: &Seeker, payload: &[u8]) -> Result<bool, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let recorded = {
            let mut table = write_txn.open_table(REJECTED_ENTRIES_TABLE)?;
            let key = rejected_key(seeker, payload);
            if table.get(key.as_str())?.is_some() {
                false
            } else {
                table.insert(key.as_str(), now_millis().to_le_bytes().as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(recorded)
    }

    pub fn is_rejected_entry(&self, seeker: &Seeker, payload: &[u8]) -> Result<bool, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(REJECTED_ENTRIES_TABLE)?;
        Ok(table.get(rejected_key(seeker, payload).as_str())?.is_some())
    }

    /// How many rejected entries are recorded under `seeker`.
    pub fn count_rejected_entries(&self, seeker: &Seeker) -> Result<u32, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(REJECTED_ENTRIES_TABLE)?;
        let start = format!("{}/", seeker.to_hex());
        let end = prefix_end(&start);
        let mut count = 0;
        for entry in table.range(start.as_str()..end.as_str())? {
            entry?;
            count += 1;
        }
        Ok(count)
    }
}
