//! Identity reconciliation.
//!
//! [`resolve`] takes one observed (email, phone) fragment and reconciles it
//! against the stored contact graph inside a single transaction: match the
//! supplied values, expand the matches to the full clusters they belong to,
//! pick the canonical primary, merge everything else beneath it, record any
//! novel value as a new secondary, then re-read and assemble the cluster
//! view. The whole call either commits or rolls back.
//!
//! [`resolve_with_retry`] re-runs the call from scratch when a concurrent
//! writer wins the transaction race; because a converged cluster resolves to
//! a no-op, the retry is safe at any point.

use std::collections::HashSet;

use crate::error::ResolveError;
use crate::models::{ClusterView, Contact, ContactId, NewContact};
use crate::store::{ContactClause, ContactFilter, ContactStore, ContactTx};

/// A validated resolve input: at least one of email / phone number present.
/// Empty strings count as absent.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    email: Option<String>,
    phone_number: Option<String>,
}

impl ResolveRequest {
    pub fn new(email: Option<String>, phone_number: Option<String>) -> Result<Self, ResolveError> {
        let email = email.filter(|v| !v.is_empty());
        let phone_number = phone_number.filter(|v| !v.is_empty());
        if email.is_none() && phone_number.is_none() {
            return Err(ResolveError::MissingContactInfo);
        }
        Ok(Self {
            email,
            phone_number,
        })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    /// Equality clause for each supplied value, OR-combined.
    fn match_filter(&self) -> ContactFilter {
        let mut clauses = Vec::new();
        if let Some(email) = &self.email {
            clauses.push(ContactClause::EmailEquals(email.clone()));
        }
        if let Some(phone) = &self.phone_number {
            clauses.push(ContactClause::PhoneEquals(phone.clone()));
        }
        ContactFilter::any_of(clauses)
    }
}

/// Runs one reconciliation inside one store transaction.
pub async fn resolve(
    store: &dyn ContactStore,
    request: &ResolveRequest,
) -> Result<ClusterView, ResolveError> {
    let mut tx = store.begin().await?;
    // An error drops the transaction, rolling every write back.
    let view = reconcile(tx.as_mut(), request).await?;
    tx.commit().await?;
    Ok(view)
}

/// Re-runs [`resolve`] when a concurrent writer causes a store conflict,
/// up to `max_attempts` total attempts. Each retry re-enters against fresh
/// state. Fatal errors return immediately.
pub async fn resolve_with_retry(
    store: &dyn ContactStore,
    request: &ResolveRequest,
    max_attempts: u32,
) -> Result<ClusterView, ResolveError> {
    let mut attempt = 1;
    loop {
        match resolve(store, request).await {
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                attempt += 1;
            }
            result => return result,
        }
    }
}

async fn reconcile(
    tx: &mut dyn ContactTx,
    request: &ResolveRequest,
) -> Result<ClusterView, ResolveError> {
    // 1. Exact matches on the supplied values.
    let matches = tx.find_contacts(&request.match_filter()).await?;

    // 2. Nothing matched: open a new cluster of one.
    if matches.is_empty() {
        let created = tx
            .create_contact(NewContact::primary(
                request.email.clone(),
                request.phone_number.clone(),
            ))
            .await?;
        let primary_id = created.id;
        return Ok(assemble_view(primary_id, vec![created]));
    }

    // 3. Expand the matches to the union of every cluster they touch.
    // Matched secondaries contribute their primary's id, so one find reaches
    // each whole cluster.
    let mut seed_ids: Vec<ContactId> = matches.iter().map(|c| c.id).collect();
    seed_ids.extend(matches.iter().filter_map(|c| c.linked_id));
    seed_ids.sort_unstable();
    seed_ids.dedup();

    let cluster = tx
        .find_contacts(&ContactFilter::any_of(vec![
            ContactClause::IdIn(seed_ids.clone()),
            ContactClause::LinkedIdIn(seed_ids),
        ]))
        .await?;

    // 4. Canonical primary: earliest created_at, lowest id on ties.
    let canonical = canonical_primary(&cluster)?.clone();

    // 5. Merge. Demote every other primary and point every secondary of a
    // losing cluster at the canonical primary. Converged members are left
    // untouched, which makes a repeated request write nothing.
    for member in &cluster {
        let converged = if member.is_primary() {
            member.id == canonical.id
        } else {
            member.linked_id == Some(canonical.id)
        };
        if !converged {
            tx.link_to_primary(member.id, canonical.id).await?;
        }
    }

    // 6. Novelty: a supplied value unknown anywhere in the expanded cluster
    // gets recorded as a new secondary carrying exactly the supplied fields.
    let known_emails: HashSet<&str> = cluster.iter().filter_map(|c| c.email.as_deref()).collect();
    let known_phones: HashSet<&str> = cluster
        .iter()
        .filter_map(|c| c.phone_number.as_deref())
        .collect();
    let novel_email = request
        .email()
        .map(|e| !known_emails.contains(e))
        .unwrap_or(false);
    let novel_phone = request
        .phone_number()
        .map(|p| !known_phones.contains(p))
        .unwrap_or(false);
    if novel_email || novel_phone {
        tx.create_contact(NewContact::secondary(
            request.email.clone(),
            request.phone_number.clone(),
            canonical.id,
        ))
        .await?;
    }

    // 7. Re-read the converged cluster so the view reflects every write made
    // in this transaction.
    let members = tx
        .find_contacts(&ContactFilter::any_of(vec![
            ContactClause::IdIn(vec![canonical.id]),
            ContactClause::LinkedIdIn(vec![canonical.id]),
        ]))
        .await?;

    Ok(assemble_view(canonical.id, members))
}

/// The canonical primary of an expanded cluster set: earliest `created_at`,
/// lowest `id` on ties. A set with no primary violates the single-primary
/// invariant and is fatal.
fn canonical_primary(cluster: &[Contact]) -> Result<&Contact, ResolveError> {
    cluster
        .iter()
        .filter(|c| c.is_primary())
        .min_by_key(|c| (c.created_at, c.id))
        .ok_or_else(|| ResolveError::MissingPrimary {
            cluster_ids: cluster.iter().map(|c| c.id).collect(),
        })
}

/// Deterministic view of a final cluster: members ordered by
/// `(created_at, id)`, emails and phone numbers deduplicated in first-seen
/// order, secondaries listed in the same order.
fn assemble_view(primary_id: ContactId, mut members: Vec<Contact>) -> ClusterView {
    members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut emails: Vec<String> = Vec::new();
    let mut phone_numbers: Vec<String> = Vec::new();
    let mut secondary_contact_ids: Vec<ContactId> = Vec::new();

    for member in &members {
        if let Some(email) = &member.email {
            if !emails.iter().any(|e| e == email) {
                emails.push(email.clone());
            }
        }
        if let Some(phone) = &member.phone_number {
            if !phone_numbers.iter().any(|p| p == phone) {
                phone_numbers.push(phone.clone());
            }
        }
        if !member.is_primary() {
            secondary_contact_ids.push(member.id);
        }
    }

    ClusterView {
        primary_contact_id: primary_id,
        emails,
        phone_numbers,
        secondary_contact_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::LinkPrecedence;
    use crate::store::memory::MemoryContactStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn resolve_ok(
        store: &MemoryContactStore,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> ClusterView {
        let request =
            ResolveRequest::new(email.map(str::to_string), phone.map(str::to_string)).unwrap();
        resolve(store, &request).await.unwrap()
    }

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    fn seeded(
        id: ContactId,
        email: Option<&str>,
        phone: Option<&str>,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
        created_at: DateTime<Utc>,
    ) -> Contact {
        Contact {
            id,
            email: email.map(str::to_string),
            phone_number: phone.map(str::to_string),
            linked_id,
            link_precedence: precedence,
            created_at,
            deleted_at: None,
        }
    }

    fn primary_count(store: &MemoryContactStore) -> usize {
        store.contacts().iter().filter(|c| c.is_primary()).count()
    }

    #[test]
    fn test_request_requires_some_identifier() {
        assert!(matches!(
            ResolveRequest::new(None, None),
            Err(ResolveError::MissingContactInfo)
        ));
        // Empty strings count as absent.
        assert!(matches!(
            ResolveRequest::new(Some(String::new()), Some(String::new())),
            Err(ResolveError::MissingContactInfo)
        ));

        let request = ResolveRequest::new(Some(String::new()), Some("111".to_string())).unwrap();
        assert_eq!(request.email(), None);
        assert_eq!(request.phone_number(), Some("111"));
    }

    #[tokio::test]
    async fn test_new_pair_creates_primary() {
        let store = MemoryContactStore::new();
        let view = resolve_ok(&store, Some("a@x.com"), Some("111")).await;

        assert_eq!(view.primary_contact_id, 1);
        assert_eq!(view.emails, vec!["a@x.com"]);
        assert_eq!(view.phone_numbers, vec!["111"]);
        assert!(view.secondary_contact_ids.is_empty());

        let stored = store.contacts();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_primary());
        assert_eq!(stored[0].linked_id, None);
    }

    #[tokio::test]
    async fn test_identical_request_is_idempotent() {
        let store = MemoryContactStore::new();
        let first = resolve_ok(&store, Some("a@x.com"), Some("111")).await;
        let second = resolve_ok(&store, Some("a@x.com"), Some("111")).await;
        let third = resolve_ok(&store, Some("a@x.com"), Some("111")).await;

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(store.contacts().len(), 1);
    }

    #[tokio::test]
    async fn test_new_phone_for_known_email_creates_secondary() {
        let store = MemoryContactStore::new();
        resolve_ok(&store, Some("a@x.com"), Some("111")).await;
        let view = resolve_ok(&store, Some("a@x.com"), Some("222")).await;

        assert_eq!(view.primary_contact_id, 1);
        assert_eq!(view.emails, vec!["a@x.com"]);
        assert_eq!(view.phone_numbers, vec!["111", "222"]);
        assert_eq!(view.secondary_contact_ids, vec![2]);

        // The new row carries exactly the supplied fields.
        let stored = store.contacts();
        assert_eq!(stored.len(), 2);
        let secondary = stored.iter().find(|c| c.id == 2).unwrap();
        assert_eq!(secondary.email.as_deref(), Some("a@x.com"));
        assert_eq!(secondary.phone_number.as_deref(), Some("222"));
        assert_eq!(secondary.linked_id, Some(1));
    }

    #[tokio::test]
    async fn test_new_email_for_known_phone_creates_secondary() {
        let store = MemoryContactStore::new();
        resolve_ok(&store, Some("a@x.com"), Some("111")).await;
        let view = resolve_ok(&store, Some("b@x.com"), Some("111")).await;

        assert_eq!(view.primary_contact_id, 1);
        assert_eq!(view.emails, vec!["a@x.com", "b@x.com"]);
        assert_eq!(view.phone_numbers, vec!["111"]);
        assert_eq!(view.secondary_contact_ids, vec![2]);
    }

    #[tokio::test]
    async fn test_redundant_request_adds_nothing() {
        let store = MemoryContactStore::new();
        resolve_ok(&store, Some("a@x.com"), Some("111")).await;
        resolve_ok(&store, Some("a@x.com"), Some("222")).await;

        // Both values already known to the cluster, in different rows.
        let view = resolve_ok(&store, Some("a@x.com"), Some("222")).await;
        assert_eq!(store.contacts().len(), 2);
        assert_eq!(view.secondary_contact_ids, vec![2]);
    }

    #[tokio::test]
    async fn test_bridging_request_merges_clusters() {
        let store = MemoryContactStore::new();
        resolve_ok(&store, Some("x@x.com"), Some("111")).await;
        resolve_ok(&store, Some("y@x.com"), Some("222")).await;
        assert_eq!(primary_count(&store), 2);

        // Bridges both clusters without contributing any new value.
        let view = resolve_ok(&store, Some("x@x.com"), Some("222")).await;

        assert_eq!(view.primary_contact_id, 1);
        assert_eq!(view.emails, vec!["x@x.com", "y@x.com"]);
        assert_eq!(view.phone_numbers, vec!["111", "222"]);
        assert_eq!(view.secondary_contact_ids, vec![2]);

        // Merge demoted the younger primary in place; nothing was inserted.
        assert_eq!(store.contacts().len(), 2);
        assert_eq!(primary_count(&store), 1);
        let demoted = store.contacts().into_iter().find(|c| c.id == 2).unwrap();
        assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(demoted.linked_id, Some(1));
    }

    #[tokio::test]
    async fn test_merge_prefers_earlier_created_at() {
        // Seeded so the higher id is the older record.
        let store = MemoryContactStore::with_contacts(vec![
            seeded(
                1,
                Some("x@x.com"),
                Some("111"),
                LinkPrecedence::Primary,
                None,
                ts(2_000),
            ),
            seeded(
                2,
                Some("y@x.com"),
                Some("222"),
                LinkPrecedence::Primary,
                None,
                ts(1_000),
            ),
        ]);

        let view = resolve_ok(&store, Some("x@x.com"), Some("222")).await;
        assert_eq!(view.primary_contact_id, 2);
        assert_eq!(view.secondary_contact_ids, vec![1]);
        // Member order follows (created_at, id), so the older record's
        // values lead the lists.
        assert_eq!(view.emails, vec!["y@x.com", "x@x.com"]);
        assert_eq!(view.phone_numbers, vec!["222", "111"]);
    }

    #[tokio::test]
    async fn test_merge_tie_breaks_on_lower_id() {
        let store = MemoryContactStore::with_contacts(vec![
            seeded(
                1,
                Some("x@x.com"),
                None,
                LinkPrecedence::Primary,
                None,
                ts(1_000),
            ),
            seeded(
                2,
                Some("y@x.com"),
                None,
                LinkPrecedence::Primary,
                None,
                ts(1_000),
            ),
        ]);

        // First attach a phone to cluster 2, then bridge both clusters
        // through it. The equal timestamps force the id tie-break.
        let view = resolve_ok(&store, Some("y@x.com"), Some("999")).await;
        assert_eq!(view.primary_contact_id, 2);

        let view = resolve_ok(&store, Some("x@x.com"), Some("999")).await;
        assert_eq!(view.primary_contact_id, 1);
        assert_eq!(primary_count(&store), 1);
    }

    #[tokio::test]
    async fn test_email_only_request() {
        let store = MemoryContactStore::new();
        let view = resolve_ok(&store, Some("solo@x.com"), None).await;

        assert_eq!(view.emails, vec!["solo@x.com"]);
        assert!(view.phone_numbers.is_empty());
        assert!(view.secondary_contact_ids.is_empty());
    }

    #[tokio::test]
    async fn test_phone_only_request() {
        let store = MemoryContactStore::new();
        let view = resolve_ok(&store, None, Some("555")).await;

        assert!(view.emails.is_empty());
        assert_eq!(view.phone_numbers, vec!["555"]);
    }

    #[tokio::test]
    async fn test_match_via_secondary_returns_full_cluster() {
        let store = MemoryContactStore::new();
        resolve_ok(&store, Some("a@x.com"), Some("111")).await;
        resolve_ok(&store, Some("a@x.com"), Some("222")).await;

        // Matches only the secondary row; the view must still cover the
        // whole cluster and insert nothing.
        let view = resolve_ok(&store, None, Some("222")).await;
        assert_eq!(view.primary_contact_id, 1);
        assert_eq!(view.emails, vec!["a@x.com"]);
        assert_eq!(view.phone_numbers, vec!["111", "222"]);
        assert_eq!(view.secondary_contact_ids, vec![2]);
        assert_eq!(store.contacts().len(), 2);
    }

    #[tokio::test]
    async fn test_merge_relinks_secondaries_of_losing_cluster() {
        let store = MemoryContactStore::new();
        resolve_ok(&store, Some("a@x.com"), Some("111")).await; // id 1
        resolve_ok(&store, Some("b@x.com"), Some("222")).await; // id 2
        resolve_ok(&store, Some("b@x.com"), Some("333")).await; // id 3, secondary of 2

        let view = resolve_ok(&store, Some("a@x.com"), Some("222")).await;
        assert_eq!(view.primary_contact_id, 1);
        assert_eq!(view.secondary_contact_ids, vec![2, 3]);
        assert_eq!(view.emails, vec!["a@x.com", "b@x.com"]);
        assert_eq!(view.phone_numbers, vec!["111", "222", "333"]);

        // The losing cluster's secondary now points at the canonical
        // primary directly.
        let relinked = store.contacts().into_iter().find(|c| c.id == 3).unwrap();
        assert_eq!(relinked.linked_id, Some(1));

        // A later match on that secondary resolves to the same view.
        let again = resolve_ok(&store, None, Some("333")).await;
        assert_eq!(again, view);
    }

    #[tokio::test]
    async fn test_unmatched_value_opens_new_cluster() {
        let store = MemoryContactStore::new();
        resolve_ok(&store, Some("a@x.com"), Some("111")).await;
        resolve_ok(&store, None, Some("111")).await; // known, no insert
        assert_eq!(store.contacts().len(), 1);

        resolve_ok(&store, None, Some("444")).await; // no match, new primary
        assert_eq!(store.contacts().len(), 2);
        let solo = store.contacts().into_iter().find(|c| c.id == 2).unwrap();
        assert_eq!(solo.email, None);
        assert!(solo.is_primary());
    }

    #[tokio::test]
    async fn test_view_orders_members_by_created_at_then_id() {
        // Equal timestamps force the id tie-break; store order is scrambled.
        let t = ts(5_000);
        let store = MemoryContactStore::with_contacts(vec![
            seeded(
                3,
                Some("c@x.com"),
                None,
                LinkPrecedence::Secondary,
                Some(1),
                t,
            ),
            seeded(1, Some("a@x.com"), None, LinkPrecedence::Primary, None, t),
            seeded(
                2,
                Some("b@x.com"),
                Some("111"),
                LinkPrecedence::Secondary,
                Some(1),
                t,
            ),
        ]);

        let view = resolve_ok(&store, Some("a@x.com"), None).await;
        assert_eq!(view.primary_contact_id, 1);
        assert_eq!(view.emails, vec!["a@x.com", "b@x.com", "c@x.com"]);
        assert_eq!(view.secondary_contact_ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_cluster_without_primary_is_fatal() {
        // A secondary whose primary is gone: forbidden by the invariants,
        // must surface as a non-retryable error.
        let store = MemoryContactStore::with_contacts(vec![seeded(
            5,
            Some("orphan@x.com"),
            None,
            LinkPrecedence::Secondary,
            Some(99),
            ts(1_000),
        )]);

        let request = ResolveRequest::new(Some("orphan@x.com".to_string()), None).unwrap();
        let err = resolve(&store, &request).await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingPrimary { .. }));
        assert!(!err.is_retryable());

        // The failed call wrote nothing.
        assert_eq!(store.contacts().len(), 1);
    }

    // ─── Conflict retry ─────────────────────────────────────────────────

    /// Store wrapper that fails the first N commits with a conflict.
    struct FlakyStore {
        inner: MemoryContactStore,
        remaining_failures: Arc<AtomicU32>,
    }

    impl FlakyStore {
        fn failing(times: u32) -> Self {
            Self {
                inner: MemoryContactStore::new(),
                remaining_failures: Arc::new(AtomicU32::new(times)),
            }
        }
    }

    #[async_trait]
    impl ContactStore for FlakyStore {
        async fn begin(&self) -> Result<Box<dyn ContactTx>, StoreError> {
            Ok(Box::new(FlakyTx {
                inner: self.inner.begin().await?,
                remaining_failures: self.remaining_failures.clone(),
            }))
        }
    }

    struct FlakyTx {
        inner: Box<dyn ContactTx>,
        remaining_failures: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ContactTx for FlakyTx {
        async fn find_contacts(
            &mut self,
            filter: &ContactFilter,
        ) -> Result<Vec<Contact>, StoreError> {
            self.inner.find_contacts(filter).await
        }

        async fn create_contact(&mut self, new: NewContact) -> Result<Contact, StoreError> {
            self.inner.create_contact(new).await
        }

        async fn link_to_primary(
            &mut self,
            id: ContactId,
            primary_id: ContactId,
        ) -> Result<(), StoreError> {
            self.inner.link_to_primary(id, primary_id).await
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Conflict {
                    message: "injected conflict".to_string(),
                });
            }
            self.inner.commit().await
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_conflicts() {
        let store = FlakyStore::failing(2);
        let request =
            ResolveRequest::new(Some("a@x.com".to_string()), Some("111".to_string())).unwrap();

        let view = resolve_with_retry(&store, &request, 3).await.unwrap();
        assert_eq!(view.emails, vec!["a@x.com"]);

        // The two rolled-back attempts left nothing behind.
        assert_eq!(store.inner.contacts().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_surfaces_conflict() {
        let store = FlakyStore::failing(5);
        let request = ResolveRequest::new(None, Some("111".to_string())).unwrap();

        let err = resolve_with_retry(&store, &request, 2).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.inner.contacts().is_empty());
    }
}
