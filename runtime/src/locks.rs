//! Single-writer locks per item and per audit session.
//!
//! Every stock-affecting operation holds the lock of each item it touches for
//! the whole load → validate → commit sequence, which closes the
//! check-then-act window between reading counters and appending a movement.
//! Multi-key acquisitions take keys in sorted order so two operations over
//! overlapping item sets cannot deadlock.

use crate::metrics::LedgerMetrics;
use dishware_ledger_core::types::{AuditSessionId, ItemId};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// What a lock protects
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    /// An inventory item (its counters, movement log and allocations)
    Item(ItemId),
    /// An audit session
    AuditSession(AuditSessionId),
}

/// Guards for a set of keys; dropping releases them all
#[derive(Debug)]
pub struct LockSet {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// Registry of per-key async mutexes
#[derive(Debug, Default)]
pub struct LockTable {
    entries: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every key in `keys`, in sorted order.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = LockKey>) -> LockSet {
        let ordered: BTreeSet<LockKey> = keys.into_iter().collect();
        let mutexes: Vec<_> = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop entries nobody holds or waits on.
            entries.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            let mutexes = ordered
                .iter()
                .map(|key| Arc::clone(entries.entry(*key).or_default()))
                .collect();
            LedgerMetrics::record_lock_table(entries.len());
            mutexes
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        tracing::debug!(keys = ?ordered, "Acquired ledger locks");
        LockSet { _guards: guards }
    }

    /// Acquire the lock of one item
    pub async fn item(&self, item_id: ItemId) -> LockSet {
        self.acquire([LockKey::Item(item_id)]).await
    }

    /// Number of entries in the table
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_item_serializes() {
        let table = Arc::new(LockTable::new());
        let item = ItemId::new();

        let held = table.item(item).await;
        let contender = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                let _set = table.item(item).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(held);
        assert!(tokio::time::timeout(Duration::from_secs(1), contender).await.is_ok());
    }

    #[tokio::test]
    async fn overlapping_sets_do_not_deadlock() {
        let table = Arc::new(LockTable::new());
        let (a, b) = (ItemId::new(), ItemId::new());

        let mut handles = Vec::new();
        for flip in [false, true, false, true] {
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move {
                let keys = if flip {
                    [LockKey::Item(b), LockKey::Item(a)]
                } else {
                    [LockKey::Item(a), LockKey::Item(b)]
                };
                let _set = table.acquire(keys).await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for handle in handles {
            assert!(tokio::time::timeout(Duration::from_secs(2), handle).await.is_ok());
        }
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let table = LockTable::new();
        drop(table.item(ItemId::new()).await);
        drop(table.item(ItemId::new()).await);
        assert!(table.len() <= 1);
    }
}
