//! Persistence seam for the ledger.
//!
//! A [`LedgerStore`] holds four kinds of records: items (with their projected
//! counters), the append-only movement log, allocations, and audit sessions.
//! Every stock-affecting change reaches the store as one [`LedgerCommit`],
//! which the store must apply atomically: either every movement, item update,
//! allocation and audit session in it becomes visible, or none does.
//!
//! # Optimistic Concurrency
//!
//! Each [`ItemCommit`] names the item version it was computed from. If the
//! stored version differs, the whole commit is refused with
//! [`LedgerStoreError::ConcurrencyConflict`]. The runtime serializes writers
//! per item, so a conflict indicates a second process writing the same item.
//!
//! # Implementations
//!
//! - `PostgresLedgerStore` (in `dishware-ledger-postgres`): production
//! - `InMemoryLedgerStore` (in `dishware-ledger-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! service can hold an `Arc<dyn LedgerStore>`.

use crate::allocation::{Allocation, AllocationKey};
use crate::item::InventoryItem;
use crate::movement::Movement;
use crate::reconciliation::AuditSession;
use crate::types::{AuditSessionId, ItemId, Reference};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`LedgerStore`] methods
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerStoreError>> + Send + 'a>>;

/// Errors that can occur during ledger store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerStoreError {
    /// Optimistic concurrency conflict: the item changed since it was loaded.
    #[error("Concurrency conflict on item {item_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Item where the conflict occurred
        item_id: ItemId,
        /// Version the commit was computed from
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// A record the commit updates does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A record being inserted already exists.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Changes to one item inside a [`LedgerCommit`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemCommit {
    /// Version the change was computed from
    pub expected_version: u64,
    /// New item state; its version must be `expected_version + 1`
    pub item: InventoryItem,
    /// Movement to append, if any
    pub movement: Option<Movement>,
    /// Allocations to insert or replace
    pub allocations: Vec<Allocation>,
}

impl ItemCommit {
    /// Commit of a new item state with nothing else attached
    #[must_use]
    pub fn item(expected_version: u64, item: InventoryItem) -> Self {
        Self {
            expected_version,
            item,
            movement: None,
            allocations: Vec::new(),
        }
    }

    /// Attach the movement to append
    #[must_use]
    pub fn with_movement(mut self, movement: Movement) -> Self {
        self.movement = Some(movement);
        self
    }

    /// Attach an allocation to upsert
    #[must_use]
    pub fn with_allocation(mut self, allocation: Allocation) -> Self {
        self.allocations.push(allocation);
        self
    }
}

/// A unit of work applied atomically by [`LedgerStore::commit`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerCommit {
    /// Per-item changes
    pub items: Vec<ItemCommit>,
    /// Audit session to upsert in the same transaction
    pub audit_session: Option<AuditSession>,
}

impl LedgerCommit {
    /// Commit touching a single item
    #[must_use]
    pub fn single(item: ItemCommit) -> Self {
        Self {
            items: vec![item],
            audit_session: None,
        }
    }

    /// Attach an audit session
    #[must_use]
    pub fn with_audit_session(mut self, session: AuditSession) -> Self {
        self.audit_session = Some(session);
        self
    }

    /// Whether the commit changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.audit_session.is_none()
    }
}

/// Ledger persistence.
///
/// Implementations must be `Send + Sync` to be shared across tasks.
pub trait LedgerStore: Send + Sync {
    /// Insert a newly registered item.
    ///
    /// # Errors
    ///
    /// - `Duplicate`: an item with this id exists
    /// - `DatabaseError`: database connection or query failed
    fn insert_item(&self, item: InventoryItem) -> StoreFuture<'_, ()>;

    /// Load an item, deleted or not. `Ok(None)` if it was never registered.
    ///
    /// # Errors
    ///
    /// - `DatabaseError` / `SerializationError`
    fn load_item(&self, item_id: ItemId) -> StoreFuture<'_, Option<InventoryItem>>;

    /// Load all items that are not deleted, ordered by creation time.
    ///
    /// # Errors
    ///
    /// - `DatabaseError` / `SerializationError`
    fn list_items(&self) -> StoreFuture<'_, Vec<InventoryItem>>;

    /// Load the movements of an item ordered by sequence.
    ///
    /// - `from_sequence`: `Some(n)` loads movements with sequence `>= n`,
    ///   `None` loads the full history.
    ///
    /// # Errors
    ///
    /// - `DatabaseError` / `SerializationError`
    fn load_movements(&self, item_id: ItemId, from_sequence: Option<u64>) -> StoreFuture<'_, Vec<Movement>>;

    /// Load one allocation, open or closed.
    ///
    /// # Errors
    ///
    /// - `DatabaseError` / `SerializationError`
    fn load_allocation(&self, key: AllocationKey) -> StoreFuture<'_, Option<Allocation>>;

    /// Load every allocation of an item.
    ///
    /// # Errors
    ///
    /// - `DatabaseError` / `SerializationError`
    fn load_allocations(&self, item_id: ItemId) -> StoreFuture<'_, Vec<Allocation>>;

    /// Load every allocation of a subscription/event across items.
    ///
    /// # Errors
    ///
    /// - `DatabaseError` / `SerializationError`
    fn load_allocations_for_reference(&self, reference: Reference) -> StoreFuture<'_, Vec<Allocation>>;

    /// Apply a commit atomically.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: an item's stored version is not `expected_version`
    /// - `NotFound`: an item in the commit does not exist
    /// - `Duplicate`: a movement id or sequence already exists
    /// - `DatabaseError` / `SerializationError`
    fn commit(&self, commit: LedgerCommit) -> StoreFuture<'_, ()>;

    /// Insert or replace an audit session outside of a stock commit.
    ///
    /// # Errors
    ///
    /// - `DatabaseError` / `SerializationError`
    fn save_audit_session(&self, session: AuditSession) -> StoreFuture<'_, ()>;

    /// Load an audit session.
    ///
    /// # Errors
    ///
    /// - `DatabaseError` / `SerializationError`
    fn load_audit_session(&self, id: AuditSessionId) -> StoreFuture<'_, Option<AuditSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display() {
        let error = LedgerStoreError::ConcurrencyConflict {
            item_id: ItemId::from_uuid(uuid::Uuid::nil()),
            expected: 3,
            actual: 4,
        };
        let display = error.to_string();
        assert!(display.contains("expected version 3"));
        assert!(display.contains("found 4"));
    }

    #[test]
    fn empty_commit() {
        assert!(LedgerCommit::default().is_empty());
    }
}
