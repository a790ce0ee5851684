//! Storage abstraction for the identity graph.
//!
//! The [`ContactStore`] trait hands out transactions; every resolver
//! operation runs against a [`ContactTx`] so that one resolve call is one
//! atomic unit. Implementations must be `Send + Sync` to work with async
//! runtimes.
//!
//! Queries are expressed as a [`ContactFilter`]: an OR-combination of
//! equality/membership clauses over a closed set of fields. Stores apply the
//! "not deleted" condition themselves; callers never see tombstoned rows.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Contact, ContactId, NewContact};

/// One disjunct of a [`ContactFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactClause {
    /// `email = value`
    EmailEquals(String),
    /// `phone_number = value`
    PhoneEquals(String),
    /// `id IN (values)`
    IdIn(Vec<ContactId>),
    /// `linked_id IN (values)`
    LinkedIdIn(Vec<ContactId>),
}

/// An OR-combination of [`ContactClause`]s.
///
/// The empty filter matches nothing (an empty OR is false), as does a
/// membership clause with an empty id list.
#[derive(Debug, Clone, Default)]
pub struct ContactFilter {
    clauses: Vec<ContactClause>,
}

impl ContactFilter {
    pub fn any_of(clauses: Vec<ContactClause>) -> Self {
        Self { clauses }
    }

    pub fn clauses(&self) -> &[ContactClause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Reference evaluation of the filter against one contact. The memory
    /// store uses this directly; the SQLite store renders the same semantics
    /// to SQL.
    pub fn matches(&self, contact: &Contact) -> bool {
        self.clauses.iter().any(|clause| match clause {
            ContactClause::EmailEquals(value) => contact.email.as_deref() == Some(value.as_str()),
            ContactClause::PhoneEquals(value) => {
                contact.phone_number.as_deref() == Some(value.as_str())
            }
            ContactClause::IdIn(ids) => ids.contains(&contact.id),
            ContactClause::LinkedIdIn(ids) => contact
                .linked_id
                .map(|id| ids.contains(&id))
                .unwrap_or(false),
        })
    }
}

/// Abstract contact storage.
///
/// A store only hands out transactions; all reads and writes go through
/// [`ContactTx`].
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Opens a transaction with a stable snapshot of the contact set.
    async fn begin(&self) -> Result<Box<dyn ContactTx>, StoreError>;
}

/// One atomic unit of resolver work.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_contacts`](ContactTx::find_contacts) | Non-deleted contacts matching an OR-filter |
/// | [`create_contact`](ContactTx::create_contact) | Insert; the store assigns `id` and `created_at` |
/// | [`link_to_primary`](ContactTx::link_to_primary) | Point a contact at a primary, demoting it |
/// | [`commit`](ContactTx::commit) | Publish every write atomically |
///
/// Dropping an uncommitted transaction discards every write. Query results
/// carry no ordering guarantee; callers sort.
#[async_trait]
pub trait ContactTx: Send {
    /// Returns all non-deleted contacts matching the filter.
    async fn find_contacts(&mut self, filter: &ContactFilter) -> Result<Vec<Contact>, StoreError>;

    /// Inserts a contact and returns the stored record.
    async fn create_contact(&mut self, new: NewContact) -> Result<Contact, StoreError>;

    /// Sets `linked_id` and marks the contact secondary. The only mutation
    /// the model permits.
    async fn link_to_primary(
        &mut self,
        id: ContactId,
        primary_id: ContactId,
    ) -> Result<(), StoreError>;

    /// Publishes the transaction. A concurrent conflicting commit surfaces
    /// as [`StoreError::Conflict`].
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
