//! In-memory ledger store for fast, deterministic testing.
//!
//! [`InMemoryLedgerStore`] applies a commit under one write lock after
//! validating every part of it, so a refused commit leaves nothing behind,
//! the same as the Postgres transaction.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use dishware_ledger_core::allocation::{Allocation, AllocationKey};
use dishware_ledger_core::item::InventoryItem;
use dishware_ledger_core::ledger_store::{LedgerCommit, LedgerStore, LedgerStoreError, StoreFuture};
use dishware_ledger_core::movement::Movement;
use dishware_ledger_core::reconciliation::AuditSession;
use dishware_ledger_core::types::{AuditSessionId, ItemId, Reference};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct State {
    items: HashMap<ItemId, InventoryItem>,
    movements: HashMap<ItemId, Vec<Movement>>,
    allocations: BTreeMap<AllocationKey, Allocation>,
    sessions: HashMap<AuditSessionId, AuditSession>,
    fail_next_commit: Option<LedgerStoreError>,
    commits: usize,
}

/// In-memory [`LedgerStore`].
///
/// # Example
///
/// ```
/// use dishware_ledger_testing::InMemoryLedgerStore;
/// use dishware_ledger_core::ledger_store::LedgerStore;
/// use dishware_ledger_core::types::ItemId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryLedgerStore::new();
/// assert!(store.load_item(ItemId::new()).await?.is_none());
/// assert_eq!(store.commit_count(), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryLedgerStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful commits
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.state.read().unwrap().commits
    }

    /// Total number of movements across all items
    #[must_use]
    pub fn movement_count(&self) -> usize {
        self.state.read().unwrap().movements.values().map(Vec::len).sum()
    }

    /// Refuse the next commit with `error`, without applying it
    pub fn fail_next_commit(&self, error: LedgerStoreError) {
        self.state.write().unwrap().fail_next_commit = Some(error);
    }

    /// Replace a stored item bypassing every check.
    ///
    /// Lets tests simulate corrupted projections.
    pub fn overwrite_item(&self, item: InventoryItem) {
        self.state.write().unwrap().items.insert(item.id, item);
    }

    fn validate(state: &State, commit: &LedgerCommit) -> Result<(), LedgerStoreError> {
        for change in &commit.items {
            let item_id = change.item.id;
            let stored = state
                .items
                .get(&item_id)
                .ok_or_else(|| LedgerStoreError::NotFound(format!("item {item_id}")))?;
            if stored.version != change.expected_version {
                return Err(LedgerStoreError::ConcurrencyConflict {
                    item_id,
                    expected: change.expected_version,
                    actual: stored.version,
                });
            }
            if let Some(movement) = &change.movement {
                let recorded = state.movements.get(&item_id).map_or(0, Vec::len) as u64;
                if movement.sequence != recorded + 1 {
                    return Err(LedgerStoreError::Duplicate(format!(
                        "movement sequence {} for item {item_id}",
                        movement.sequence
                    )));
                }
            }
        }
        Ok(())
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn insert_item(&self, item: InventoryItem) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if state.items.contains_key(&item.id) {
                return Err(LedgerStoreError::Duplicate(format!("item {}", item.id)));
            }
            state.items.insert(item.id, item);
            Ok(())
        })
    }

    fn load_item(&self, item_id: ItemId) -> StoreFuture<'_, Option<InventoryItem>> {
        Box::pin(async move { Ok(self.state.read().unwrap().items.get(&item_id).cloned()) })
    }

    fn list_items(&self) -> StoreFuture<'_, Vec<InventoryItem>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let mut items: Vec<_> = state.items.values().filter(|item| !item.is_deleted()).cloned().collect();
            items.sort_by_key(|item| (item.created_at, item.id));
            Ok(items)
        })
    }

    fn load_movements(&self, item_id: ItemId, from_sequence: Option<u64>) -> StoreFuture<'_, Vec<Movement>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let from = from_sequence.unwrap_or(0);
            Ok(state
                .movements
                .get(&item_id)
                .map(|movements| movements.iter().filter(|m| m.sequence >= from).cloned().collect())
                .unwrap_or_default())
        })
    }

    fn load_allocation(&self, key: AllocationKey) -> StoreFuture<'_, Option<Allocation>> {
        Box::pin(async move { Ok(self.state.read().unwrap().allocations.get(&key).cloned()) })
    }

    fn load_allocations(&self, item_id: ItemId) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state
                .allocations
                .values()
                .filter(|allocation| allocation.item_id == item_id)
                .cloned()
                .collect())
        })
    }

    fn load_allocations_for_reference(&self, reference: Reference) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state
                .allocations
                .values()
                .filter(|allocation| allocation.reference == reference)
                .cloned()
                .collect())
        })
    }

    fn commit(&self, commit: LedgerCommit) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if let Some(error) = state.fail_next_commit.take() {
                return Err(error);
            }
            Self::validate(&state, &commit)?;

            for change in commit.items {
                let item_id = change.item.id;
                if let Some(movement) = change.movement {
                    state.movements.entry(item_id).or_default().push(movement);
                }
                for allocation in change.allocations {
                    state.allocations.insert(allocation.key(), allocation);
                }
                state.items.insert(item_id, change.item);
            }
            if let Some(session) = commit.audit_session {
                state.sessions.insert(session.id, session);
            }
            state.commits += 1;
            Ok(())
        })
    }

    fn save_audit_session(&self, session: AuditSession) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.state.write().unwrap().sessions.insert(session.id, session);
            Ok(())
        })
    }

    fn load_audit_session(&self, id: AuditSessionId) -> StoreFuture<'_, Option<AuditSession>> {
        Box::pin(async move { Ok(self.state.read().unwrap().sessions.get(&id).cloned()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dishware_ledger_core::item::NewItem;
    use dishware_ledger_core::ledger_store::ItemCommit;
    use dishware_ledger_core::types::UserId;

    fn item() -> InventoryItem {
        InventoryItem::register(ItemId::new(), NewItem::named("Tumbler"), UserId::new(), Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = InMemoryLedgerStore::new();
        let item = item();
        store.insert_item(item.clone()).await.unwrap();

        assert_eq!(store.load_item(item.id).await.unwrap(), Some(item.clone()));
        assert!(matches!(
            store.insert_item(item).await,
            Err(LedgerStoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_version_conflict_rejects_whole_commit() {
        let store = InMemoryLedgerStore::new();
        let (a, b) = (item(), item());
        store.insert_item(a.clone()).await.unwrap();
        store.insert_item(b.clone()).await.unwrap();

        let mut next_a = a.clone();
        next_a.version = 1;
        let mut next_b = b.clone();
        next_b.version = 6;
        let commit = LedgerCommit {
            items: vec![ItemCommit::item(0, next_a), ItemCommit::item(5, next_b)],
            audit_session: None,
        };

        let err = store.commit(commit).await.unwrap_err();
        assert!(matches!(err, LedgerStoreError::ConcurrencyConflict { expected: 5, actual: 0, .. }));
        assert_eq!(store.load_item(a.id).await.unwrap().unwrap().version, 0);
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = InMemoryLedgerStore::new();
        let a = item();
        store.insert_item(a.clone()).await.unwrap();
        store.fail_next_commit(LedgerStoreError::DatabaseError("connection reset".into()));

        let mut next = a.clone();
        next.version = 1;
        let commit = LedgerCommit::single(ItemCommit::item(0, next.clone()));
        assert!(store.commit(commit.clone()).await.is_err());
        assert!(store.commit(commit).await.is_ok());
        assert_eq!(store.load_item(a.id).await.unwrap(), Some(next));
    }
}
