//! Error types for the identity graph.
//!
//! Two layers: [`StoreError`] for failures raised by contact store backends,
//! and [`ResolveError`] for everything the resolver surfaces to callers. The
//! split carries the retry contract: a store conflict means the whole resolve
//! can safely re-run from scratch, an invariant violation must not.

use thiserror::Error;

use crate::models::ContactId;

/// Failures raised by a contact store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer committed a conflicting change after this transaction
    /// took its snapshot. The enclosing resolve is safe to retry from step 1.
    #[error("write conflict: {message}")]
    Conflict { message: String },

    /// The backend rejected or failed an operation.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A stored record could not be decoded.
    #[error("corrupt contact record {id}: {reason}")]
    Corrupt { id: ContactId, reason: String },
}

impl From<sqlx::Error> for StoreError {
    /// Classifies SQLite busy/locked failures as [`StoreError::Conflict`];
    /// everything else stays a database error.
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            StoreError::Conflict {
                message: err.to_string(),
            }
        } else {
            StoreError::Database(err)
        }
    }
}

/// SQLITE_BUSY (5), SQLITE_BUSY_RECOVERY (261), and SQLITE_BUSY_SNAPSHOT
/// (517) all mean a concurrent writer won the race. The snapshot variant is
/// what a WAL read transaction gets when it tries to write after another
/// writer moved the database past its snapshot.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("5") | Some("261") | Some("517"))
                || db.message().contains("database is locked")
        }
        _ => false,
    }
}

/// Everything a resolve call can fail with.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Neither an email nor a phone number was supplied.
    #[error("at least one of email or phone number is required")]
    MissingContactInfo,

    /// An expanded cluster contained no primary record. The store is in a
    /// state the invariants forbid; retrying would see the same state.
    #[error("no primary contact in cluster {cluster_ids:?}")]
    MissingPrimary { cluster_ids: Vec<ContactId> },

    /// The store failed beneath the resolver.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    /// True when re-running the resolve from scratch can succeed. Only write
    /// conflicts qualify; every other failure is permanent for the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::Store(StoreError::Conflict { .. }))
    }
}
