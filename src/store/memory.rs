//! In-memory [`ContactStore`] implementation for tests.
//!
//! Contacts live in a `Vec` behind `std::sync::RwLock`. A transaction clones
//! the full state, stages its writes on the clone, and swaps it back on
//! commit only if no other transaction committed in between (version check).
//! The loser of a concurrent write gets [`StoreError::Conflict`], the same
//! contract the SQLite backend surfaces for WAL snapshot upgrades.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::models::{Contact, ContactId, LinkPrecedence, NewContact};

use super::{ContactFilter, ContactStore, ContactTx};

#[derive(Debug, Clone)]
struct MemoryState {
    contacts: Vec<Contact>,
    next_id: ContactId,
    version: u64,
}

/// In-memory contact store.
pub struct MemoryContactStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryContactStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState {
                contacts: Vec::new(),
                next_id: 1,
                version: 0,
            })),
        }
    }

    /// Store seeded with existing contacts, for tests that need fixed ids
    /// and timestamps. Id assignment continues above the highest seeded id.
    pub fn with_contacts(contacts: Vec<Contact>) -> Self {
        let next_id = contacts.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        Self {
            state: Arc::new(RwLock::new(MemoryState {
                contacts,
                next_id,
                version: 0,
            })),
        }
    }

    /// Snapshot of every stored contact, tombstoned ones included.
    pub fn contacts(&self) -> Vec<Contact> {
        self.state.read().unwrap().contacts.clone()
    }
}

impl Default for MemoryContactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn begin(&self) -> Result<Box<dyn ContactTx>, StoreError> {
        let staged = self.state.read().unwrap().clone();
        let base_version = staged.version;
        Ok(Box::new(MemoryContactTx {
            shared: self.state.clone(),
            staged,
            base_version,
            dirty: false,
        }))
    }
}

struct MemoryContactTx {
    shared: Arc<RwLock<MemoryState>>,
    staged: MemoryState,
    base_version: u64,
    dirty: bool,
}

#[async_trait]
impl ContactTx for MemoryContactTx {
    async fn find_contacts(&mut self, filter: &ContactFilter) -> Result<Vec<Contact>, StoreError> {
        Ok(self
            .staged
            .contacts
            .iter()
            .filter(|c| c.deleted_at.is_none() && filter.matches(c))
            .cloned()
            .collect())
    }

    async fn create_contact(&mut self, new: NewContact) -> Result<Contact, StoreError> {
        let contact = Contact {
            id: self.staged.next_id,
            email: new.email,
            phone_number: new.phone_number,
            linked_id: new.linked_id,
            link_precedence: new.link_precedence,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.staged.next_id += 1;
        self.staged.contacts.push(contact.clone());
        self.dirty = true;
        Ok(contact)
    }

    async fn link_to_primary(
        &mut self,
        id: ContactId,
        primary_id: ContactId,
    ) -> Result<(), StoreError> {
        let contact = self
            .staged
            .contacts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::Corrupt {
                id,
                reason: "link target does not exist".to_string(),
            })?;
        contact.linked_id = Some(primary_id);
        contact.link_precedence = LinkPrecedence::Secondary;
        self.dirty = true;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        // Read-only transactions publish nothing and cannot conflict.
        if !self.dirty {
            return Ok(());
        }
        let mut shared = self.shared.write().unwrap();
        if shared.version != self.base_version {
            return Err(StoreError::Conflict {
                message: format!(
                    "state advanced from version {} to {} since this transaction began",
                    self.base_version, shared.version
                ),
            });
        }
        shared.contacts = self.staged.contacts;
        shared.next_id = self.staged.next_id;
        shared.version = self.base_version + 1;
        Ok(())
    }
}
