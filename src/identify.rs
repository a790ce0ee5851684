//! One-shot resolve from the command line.
//!
//! Runs a single reconciliation against the configured database and prints
//! the resulting cluster view. Used by the `idg identify` command.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::error::ResolveError;
use crate::resolver::{self, ResolveRequest};
use crate::store::sqlite::SqliteContactStore;

/// CLI entry point — resolves one observation and prints the cluster.
pub async fn run_identify(
    config: &Config,
    email: Option<String>,
    phone: Option<String>,
) -> Result<()> {
    let request = match ResolveRequest::new(email, phone) {
        Ok(request) => request,
        Err(ResolveError::MissingContactInfo) => {
            bail!("at least one of --email or --phone is required")
        }
        Err(e) => return Err(e.into()),
    };

    let pool = db::connect(config).await?;
    let store = SqliteContactStore::new(pool);
    let view =
        resolver::resolve_with_retry(&store, &request, config.resolver.max_attempts).await?;

    println!("--- Cluster ---");
    println!("primary id:    {}", view.primary_contact_id);
    println!("emails:        {}", join_or_none(&view.emails));
    println!("phone numbers: {}", join_or_none(&view.phone_numbers));
    let secondary_ids: Vec<String> = view
        .secondary_contact_ids
        .iter()
        .map(|id| id.to_string())
        .collect();
    println!("secondary ids: {}", join_or_none(&secondary_ids));

    Ok(())
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "(none)".to_string()
    } else {
        values.join(", ")
    }
}
