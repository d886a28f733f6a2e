//! Contact Storage - CRUD operations for an identity's contacts
//!
//! Contacts are scoped to the owning identity: key is `{owner}/{contact}`.

use redb::{ReadableTable, TableDefinition};

use super::{decode, encode, prefix_end, scoped_key, Storage};
use crate::error::ChatError;
use crate::identity::UserId;
use crate::types::Contact;

/// Table for contacts (key: `{owner}/{contact}`, value: postcard Contact)
pub(crate) const CONTACTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("contacts");

impl Storage {
    // ═══════════════════════════════════════════════════════════════════════
    // Contact Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a contact to the database
    ///
    /// If the owner already has a contact with the same id, it is overwritten.
    pub fn save_contact(&self, contact: &Contact) -> Result<(), ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(CONTACTS_TABLE)?;
            let key = scoped_key(contact.owner.as_str(), contact.user_id.as_str());
            let serialized = encode(contact)?;
            table.insert(key.as_str(), serialized.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Insert a contact unless the owner already has one with this id.
    ///
    /// Returns `true` if the contact was inserted.
    pub fn insert_contact_if_absent(&self, contact: &Contact) -> Result<bool, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(CONTACTS_TABLE)?;
            let key = scoped_key(contact.owner.as_str(), contact.user_id.as_str());
            if table.get(key.as_str())?.is_some() {
                false
            } else {
                let serialized = encode(contact)?;
                table.insert(key.as_str(), serialized.as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    /// Load a contact of `owner`
    ///
    /// Returns `None` if the owner has no such contact.
    pub fn load_contact(&self, owner: &UserId, contact: &UserId) -> Result<Option<Contact>, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(CONTACTS_TABLE)?;
        let key = scoped_key(owner.as_str(), contact.as_str());

        if let Some(data) = table.get(key.as_str())? {
            Ok(Some(decode(data.value())?))
        } else {
            Ok(None)
        }
    }

    /// Delete a contact
    ///
    /// Returns `Ok(())` even if the contact doesn't exist.
    pub fn delete_contact(&self, owner: &UserId, contact: &UserId) -> Result<(), ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let write_txn = db_guard.begin_write()?;
        {
            let mut table = write_txn.open_table(CONTACTS_TABLE)?;
            let key = scoped_key(owner.as_str(), contact.as_str());
            table.remove(key.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// List all contacts of `owner`
    pub fn list_contacts(&self, owner: &UserId) -> Result<Vec<Contact>, ChatError> {
        let db = self.db_handle();
        let db_guard = db.read();
        let read_txn = db_guard.begin_read()?;
        let table = read_txn.open_table(CONTACTS_TABLE)?;

        let start = scoped_key(owner.as_str(), "");
        let end = prefix_end(&start);
        let mut contacts = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            contacts.push(decode(value.value())?);
        }
        Ok(contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityKeypair;
    use tempfile::tempdir;

    fn create_test_contact(owner: &UserId, name: &str) -> Contact {
        let public = IdentityKeypair::generate().unwrap().public_identity();
        Contact::new(owner.clone(), public, Some(name.to_string()))
    }

    #[test]
    fn test_save_and_load_contact() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.redb")).unwrap();
        let owner = IdentityKeypair::generate().unwrap().user_id();

        let contact = create_test_contact(&owner, "Alice");
        storage.save_contact(&contact).unwrap();

        let loaded = storage.load_contact(&owner, &contact.user_id).unwrap().unwrap();
        assert_eq!(loaded, contact);
    }

    #[test]
    fn test_load_nonexistent_contact() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.redb")).unwrap();
        let owner = IdentityKeypair::generate().unwrap().user_id();
        let other = IdentityKeypair::generate().unwrap().user_id();

        assert!(storage.load_contact(&owner, &other).unwrap().is_none());
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.redb")).unwrap();
        let owner = IdentityKeypair::generate().unwrap().user_id();

        let contact = create_test_contact(&owner, "Alice");
        assert!(storage.insert_contact_if_absent(&contact).unwrap());

        let mut renamed = contact.clone();
        renamed.name = Some("Mallory".to_string());
        assert!(!storage.insert_contact_if_absent(&renamed).unwrap());

        let loaded = storage.load_contact(&owner, &contact.user_id).unwrap().unwrap();
        assert_eq!(loaded.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_delete_contact() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.redb")).unwrap();
        let owner = IdentityKeypair::generate().unwrap().user_id();

        let contact = create_test_contact(&owner, "Bob");
        storage.save_contact(&contact).unwrap();
        storage.delete_contact(&owner, &contact.user_id).unwrap();
        assert!(storage.load_contact(&owner, &contact.user_id).unwrap().is_none());
    }

    #[test]
    fn test_list_contacts_scoped_to_owner() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(temp_dir.path().join("test.redb")).unwrap();
        let alice = IdentityKeypair::generate().unwrap().user_id();
        let bob = IdentityKeypair::generate().unwrap().user_id();

        storage.save_contact(&create_test_contact(&alice, "C1")).unwrap();
        storage.save_contact(&create_test_contact(&alice, "C2")).unwrap();
        storage.save_contact(&create_test_contact(&bob, "C3")).unwrap();

        assert_eq!(storage.list_contacts(&alice).unwrap().len(), 2);
        assert_eq!(storage.list_contacts(&bob).unwrap().len(), 1);
    }
}
