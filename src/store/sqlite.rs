//! SQLite [`ContactStore`] backed by `sqlx`.
//!
//! One resolver call maps to one `sqlx` transaction. WAL mode plus the busy
//! timeout set in [`crate::db`] give concurrent resolves snapshot isolation;
//! a write that loses a snapshot race comes back as SQLITE_BUSY_SNAPSHOT and
//! is classified as [`StoreError::Conflict`] by the error layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite};

use crate::error::StoreError;
use crate::models::{Contact, ContactId, LinkPrecedence, NewContact};

use super::{ContactClause, ContactFilter, ContactStore, ContactTx};

const CONTACT_COLUMNS: &str =
    "id, email, phone_number, linked_id, link_precedence, created_at, deleted_at";

/// SQLite-backed contact store.
pub struct SqliteContactStore {
    pool: SqlitePool,
}

impl SqliteContactStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactStore for SqliteContactStore {
    async fn begin(&self) -> Result<Box<dyn ContactTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteContactTx { tx }))
    }
}

struct SqliteContactTx {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl ContactTx for SqliteContactTx {
    async fn find_contacts(&mut self, filter: &ContactFilter) -> Result<Vec<Contact>, StoreError> {
        if filter.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM contacts WHERE deleted_at IS NULL AND ({})",
            CONTACT_COLUMNS,
            filter_sql(filter)
        );

        let mut query = sqlx::query(&sql);
        for clause in filter.clauses() {
            match clause {
                ContactClause::EmailEquals(value) | ContactClause::PhoneEquals(value) => {
                    query = query.bind(value);
                }
                ContactClause::IdIn(ids) | ContactClause::LinkedIdIn(ids) => {
                    for id in ids {
                        query = query.bind(id);
                    }
                }
            }
        }

        let rows = query.fetch_all(&mut *self.tx).await?;
        rows.iter().map(row_to_contact).collect()
    }

    async fn create_contact(&mut self, new: NewContact) -> Result<Contact, StoreError> {
        let created_at = Utc::now().timestamp_millis();
        let sql = format!(
            "INSERT INTO contacts (email, phone_number, linked_id, link_precedence, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {}",
            CONTACT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&new.email)
            .bind(&new.phone_number)
            .bind(new.linked_id)
            .bind(new.link_precedence.as_str())
            .bind(created_at)
            .fetch_one(&mut *self.tx)
            .await?;
        row_to_contact(&row)
    }

    async fn link_to_primary(
        &mut self,
        id: ContactId,
        primary_id: ContactId,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE contacts SET linked_id = ?, link_precedence = ? WHERE id = ?")
                .bind(primary_id)
                .bind(LinkPrecedence::Secondary.as_str())
                .bind(id)
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Corrupt {
                id,
                reason: "link target does not exist".to_string(),
            });
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Renders the filter as an OR of SQL conditions with `?` placeholders, in
/// clause order. Bind order must match: one value per equality clause, then
/// every id of a membership clause.
fn filter_sql(filter: &ContactFilter) -> String {
    let conditions: Vec<String> = filter.clauses().iter().map(clause_sql).collect();
    conditions.join(" OR ")
}

fn clause_sql(clause: &ContactClause) -> String {
    match clause {
        ContactClause::EmailEquals(_) => "email = ?".to_string(),
        ContactClause::PhoneEquals(_) => "phone_number = ?".to_string(),
        ContactClause::IdIn(ids) => membership_sql("id", ids.len()),
        ContactClause::LinkedIdIn(ids) => membership_sql("linked_id", ids.len()),
    }
}

/// `IN ()` is a syntax error in SQLite, so an empty list renders as a
/// constant false.
fn membership_sql(column: &str, len: usize) -> String {
    if len == 0 {
        return "1 = 0".to_string();
    }
    let placeholders = vec!["?"; len].join(", ");
    format!("{} IN ({})", column, placeholders)
}

fn row_to_contact(row: &SqliteRow) -> Result<Contact, StoreError> {
    let id: ContactId = row.get("id");

    let precedence_text: String = row.get("link_precedence");
    let link_precedence =
        LinkPrecedence::parse(&precedence_text).ok_or_else(|| StoreError::Corrupt {
            id,
            reason: format!("unknown link_precedence '{}'", precedence_text),
        })?;

    let created_at = timestamp_from_millis(id, row.get("created_at"))?;
    let deleted_at = match row.get::<Option<i64>, _>("deleted_at") {
        Some(ms) => Some(timestamp_from_millis(id, ms)?),
        None => None,
    };

    Ok(Contact {
        id,
        email: row.get("email"),
        phone_number: row.get("phone_number"),
        linked_id: row.get("linked_id"),
        link_precedence,
        created_at,
        deleted_at,
    })
}

fn timestamp_from_millis(id: ContactId, ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt {
        id,
        reason: format!("timestamp {} out of range", ms),
    })
}
