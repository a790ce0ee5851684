//! Core data types for the identity graph.
//!
//! A [`Contact`] is one observed (email, phone) fragment. Contacts are linked
//! into clusters: one primary record per cluster, every other member a
//! secondary pointing at the primary via `linked_id`.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifier of a stored contact. Assigned by the store, strictly
/// increasing in creation order.
pub type ContactId = i64;

/// Whether a contact is the canonical record of its cluster or a member
/// linked beneath one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    /// Text form stored in the `link_precedence` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPrecedence::Primary => "primary",
            LinkPrecedence::Secondary => "secondary",
        }
    }

    /// Parses the stored text form. Returns `None` for unknown values.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(LinkPrecedence::Primary),
            "secondary" => Some(LinkPrecedence::Secondary),
            _ => None,
        }
    }
}

/// A stored contact record.
///
/// `email`, `phone_number`, and `created_at` never change after insert.
/// Only `link_precedence` and `linked_id` are mutated, and precedence only
/// ever moves primary to secondary, never back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    /// Present iff this contact is a secondary; points at the cluster primary.
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    /// Tombstone. A non-null value means the record is invisible to queries.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }
}

/// Insert payload for a new contact. The store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

impl NewContact {
    /// A new cluster of one: primary precedence, no link.
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
        }
    }

    /// A new member of an existing cluster, linked to its primary.
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        primary_id: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(primary_id),
        }
    }
}

/// Canonical view of one identity cluster, returned by the resolver.
///
/// `emails` and `phone_numbers` are deduplicated in first-seen order over
/// members sorted by `(created_at, id)`, so the primary's values come first.
/// Serialized in camelCase for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterView {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}
