//! The ledger boundary.
//!
//! [`LedgerService`] is the imperative shell around the pure pipeline in
//! `dishware_ledger_core`: it resolves the actor's role, takes the per-item
//! lock, loads current state from the [`LedgerStore`], runs the pure
//! validation/projection, and commits the result atomically.

use crate::locks::{LockKey, LockTable};
use crate::metrics::LedgerMetrics;
use dishware_ledger_core::allocation::{self, Allocation, AllocationKey};
use dishware_ledger_core::environment::{Clock, RoleDirectory};
use dishware_ledger_core::item::{InventoryItem, ItemSnapshot, NewItem};
use dishware_ledger_core::ledger_store::{ItemCommit, LedgerCommit, LedgerStore};
use dishware_ledger_core::lifecycle::{self, LifecycleTarget};
use dishware_ledger_core::movement::{Movement, NewMovement};
use dishware_ledger_core::pipeline::{self, MovementContext};
use dishware_ledger_core::policy::{Policy, PolicyAction};
use dishware_ledger_core::settings::LedgerSettings;
use dishware_ledger_core::stock::StockLevels;
use dishware_ledger_core::types::{ItemId, Reference, Role, UserId};
use dishware_ledger_core::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

/// Outcome of [`LedgerService::verify_item`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Item verified
    pub item_id: ItemId,
    /// Movements replayed
    pub movements: u64,
    /// Allocations reconciled against the replay
    pub allocations: usize,
    /// Counters obtained by replay (equal to the stored ones)
    pub stock: StockLevels,
}

/// Status a subscription or event moved to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    /// Cancelled before or during fulfilment
    Cancelled,
    /// Ran to completion
    Completed,
}

/// Notification from the subscription/event collaborator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceStatusChanged {
    /// Subscription or event whose status changed
    pub reference: Reference,
    /// New status
    pub status: ReferenceStatus,
    /// Who changed it
    pub changed_by: UserId,
}

/// The ledger service.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct LedgerService {
    pub(crate) store: Arc<dyn LedgerStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) roles: Arc<dyn RoleDirectory>,
    pub(crate) settings: LedgerSettings,
    pub(crate) locks: LockTable,
}

impl LedgerService {
    /// Create a service over `store`
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        roles: Arc<dyn RoleDirectory>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            store,
            clock,
            roles,
            settings,
            locks: LockTable::new(),
        }
    }

    /// Policy windows in effect
    #[must_use]
    pub const fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Register a new draft item.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Authorization`] for unknown actors,
    /// [`LedgerError::Validation`] for a blank name, or a store failure.
    #[tracing::instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_item(&self, input: NewItem, actor: UserId) -> Result<ItemSnapshot> {
        Policy::authorize(PolicyAction::CreateItem, None, self.role_of(actor))?;
        let item = InventoryItem::register(ItemId::new(), input, actor, self.clock.now())?;
        let snapshot = item.snapshot();
        self.store.insert_item(item).await?;
        tracing::info!(item_id = %snapshot.item_id, "Registered item");
        Ok(snapshot)
    }

    /// Validate and append one movement.
    ///
    /// The movement, the updated counters and the allocation change are
    /// committed together or not at all.
    ///
    /// # Errors
    ///
    /// Any domain error from the pipeline (see
    /// [`pipeline::record_movement`]), [`LedgerError::NotFound`] for an
    /// unknown or deleted item, or a store failure.
    #[tracing::instrument(
        skip(self, input),
        fields(item_id = %input.item_id, movement_type = %input.movement_type, quantity = input.quantity)
    )]
    pub async fn append_movement(&self, input: NewMovement) -> Result<Movement> {
        let started = Instant::now();
        match self.append_locked(input).await {
            Ok(movement) => {
                LedgerMetrics::record_movement(&movement, started.elapsed());
                tracing::info!(sequence = movement.sequence, movement_id = %movement.id, "Movement appended");
                Ok(movement)
            }
            Err(error) => {
                LedgerMetrics::record_rejection(&error, started.elapsed());
                tracing::warn!(kind = error.kind(), %error, "Movement rejected");
                Err(error)
            }
        }
    }

    async fn append_locked(&self, input: NewMovement) -> Result<Movement> {
        let role = self.role_of(input.actor);
        let _locks = self.locks.item(input.item_id).await;

        let item = self.live_item(input.item_id).await?;
        let existing = match input.reference {
            Some(reference) => {
                self.store
                    .load_allocation(AllocationKey {
                        item_id: item.id,
                        reference,
                    })
                    .await?
            }
            None => None,
        };

        let ctx = MovementContext {
            role,
            now: self.clock.now(),
            settings: &self.settings,
        };
        let recorded = pipeline::record_movement(&item, existing.as_ref(), input, &ctx)?;

        let mut commit = ItemCommit::item(item.version, recorded.item).with_movement(recorded.movement.clone());
        if let Some(allocation) = recorded.allocation {
            commit = commit.with_allocation(allocation);
        }
        self.store.commit(LedgerCommit::single(commit)).await?;
        Ok(recorded.movement)
    }

    /// Current counters and lifecycle facts of an item.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown or deleted item.
    pub async fn item_state(&self, item_id: ItemId) -> Result<ItemSnapshot> {
        let item = self.live_item(item_id).await?;
        Ok(self.snapshot_now(&item))
    }

    /// Snapshots of every live item.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn list_items(&self) -> Result<Vec<ItemSnapshot>> {
        let items = self.store.list_items().await?;
        Ok(items.iter().map(|item| self.snapshot_now(item)).collect())
    }

    /// The allocation of `item_id` to `reference`, open or closed.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn allocation(&self, item_id: ItemId, reference: Reference) -> Result<Option<Allocation>> {
        Ok(self.store.load_allocation(AllocationKey { item_id, reference }).await?)
    }

    /// Every allocation of an item.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn allocations(&self, item_id: ItemId) -> Result<Vec<Allocation>> {
        Ok(self.store.load_allocations(item_id).await?)
    }

    /// Immutable movement history of an item, in sequence order.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an item that was never registered.
    pub async fn movements(&self, item_id: ItemId) -> Result<Vec<Movement>> {
        self.any_item(item_id).await?;
        Ok(self.store.load_movements(item_id, None).await?)
    }

    /// Move an item through its lifecycle.
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] for an illegal transition or an unmet guard,
    /// [`LedgerError::Authorization`] if the actor's role is too low.
    #[tracing::instrument(skip(self), fields(item_id = %item_id, target = %target))]
    pub async fn transition_lifecycle(
        &self,
        item_id: ItemId,
        target: LifecycleTarget,
        actor: UserId,
    ) -> Result<ItemSnapshot> {
        let role = self.role_of(actor);
        let _locks = self.locks.item(item_id).await;

        let item = self.live_item(item_id).await?;
        let from = item.lifecycle_status;
        let now = self.clock.now();

        let action = lifecycle::transition_action(from, target)?;
        Policy::authorize(action, Some(from), role)?;
        lifecycle::check_guards(&item, target, now, &self.settings)?;

        let next = lifecycle::apply(&item, target, now);
        let snapshot = next.snapshot();
        self.store
            .commit(LedgerCommit::single(ItemCommit::item(item.version, next)))
            .await?;

        LedgerMetrics::record_transition(from, target);
        tracing::info!(from = %from, "Lifecycle transition applied");
        Ok(snapshot)
    }

    /// Replay the movement log of an item and compare with the stored
    /// counters and allocations.
    ///
    /// # Errors
    ///
    /// [`LedgerError::ReplayMismatch`] if the replay disagrees with what is
    /// stored, [`LedgerError::NotFound`] for an unknown item.
    #[tracing::instrument(skip(self), fields(item_id = %item_id))]
    pub async fn verify_item(&self, item_id: ItemId) -> Result<ReplayReport> {
        let _locks = self.locks.item(item_id).await;
        let item = self.any_item(item_id).await?;
        let movements = self.store.load_movements(item_id, None).await?;
        let stored_allocations = self.store.load_allocations(item_id).await?;

        let mismatch = |stored: String, replayed: String| {
            tracing::error!(%stored, %replayed, "Replay verification failed");
            LedgerError::ReplayMismatch {
                item: item_id.to_string(),
                stored,
                replayed,
            }
        };

        let sequences_contiguous = movements
            .iter()
            .zip(1_u64..)
            .all(|(movement, expected)| movement.sequence == expected);
        if !sequences_contiguous || item.movement_count != movements.len() as u64 {
            return Err(mismatch(
                format!("movement_count {}", item.movement_count),
                format!("{} movements with contiguous sequences: {sequences_contiguous}", movements.len()),
            ));
        }

        let stock = StockLevels::replay(&movements)
            .map_err(|error| mismatch(format!("{:?}", item.stock), format!("replay failed: {error}")))?;
        if stock != item.stock {
            return Err(mismatch(format!("{:?}", item.stock), format!("{stock:?}")));
        }

        let mut replayed: BTreeMap<AllocationKey, Allocation> = BTreeMap::new();
        for movement in &movements {
            let Some(reference) = movement.reference else {
                continue;
            };
            let key = AllocationKey { item_id, reference };
            let tracked = allocation::track(replayed.get(&key), movement)
                .map_err(|error| mismatch(format!("allocation {key}"), format!("replay failed: {error}")))?;
            if let Some(next) = tracked {
                replayed.insert(key, next);
            }
        }
        for stored in &stored_allocations {
            let same = replayed.get(&stored.key()).is_some_and(|r| {
                (r.original, r.returned, r.damaged, r.lost) == (stored.original, stored.returned, stored.damaged, stored.lost)
            });
            if !same {
                return Err(mismatch(
                    format!("{stored:?}"),
                    format!("{:?}", replayed.get(&stored.key())),
                ));
            }
        }
        if replayed.len() != stored_allocations.len() {
            return Err(mismatch(
                format!("{} allocations", stored_allocations.len()),
                format!("{} allocations", replayed.len()),
            ));
        }

        tracing::info!(movements = movements.len(), "Replay verification passed");
        Ok(ReplayReport {
            item_id,
            movements: item.movement_count,
            allocations: stored_allocations.len(),
            stock,
        })
    }

    /// Close every allocation of a cancelled or completed subscription/event.
    ///
    /// Succeeds only when nothing is outstanding on any item; otherwise
    /// nothing changes and the error names the items still out. Allocations
    /// already settled are marked as closed by their parent. Returns the
    /// allocations changed by this call.
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] while any allocation of the reference has an
    /// outstanding quantity, [`LedgerError::Authorization`] below manager.
    #[tracing::instrument(skip(self), fields(reference = %reference))]
    pub async fn cancel_reference(&self, reference: Reference, actor: UserId) -> Result<Vec<Allocation>> {
        Policy::authorize(PolicyAction::CloseReference, None, self.role_of(actor))?;

        let item_ids: BTreeSet<ItemId> = self
            .store
            .load_allocations_for_reference(reference)
            .await?
            .iter()
            .map(|allocation| allocation.item_id)
            .collect();
        let _locks = self.locks.acquire(item_ids.iter().map(|id| LockKey::Item(*id))).await;

        // Reload under the locks; a movement may have landed in between.
        let allocations = self.store.load_allocations_for_reference(reference).await?;
        let outstanding: Vec<String> = allocations
            .iter()
            .filter(|allocation| allocation.outstanding() > 0)
            .map(|allocation| format!("{} ({} outstanding)", allocation.item_id, allocation.outstanding()))
            .collect();
        if !outstanding.is_empty() {
            return Err(LedgerError::state(format!(
                "Cannot close {reference}: items still outstanding: {}",
                outstanding.join(", ")
            )));
        }

        let now = self.clock.now();
        let mut commit = LedgerCommit::default();
        let mut closed = Vec::new();
        for allocation in allocations.iter().filter(|allocation| !allocation.closed_by_parent) {
            let item = self.any_item(allocation.item_id).await?;
            let next_allocation = allocation.close_for_parent(now)?;
            let mut next_item = item.clone();
            next_item.version += 1;
            commit
                .items
                .push(ItemCommit::item(item.version, next_item).with_allocation(next_allocation.clone()));
            closed.push(next_allocation);
        }

        if !commit.is_empty() {
            self.store.commit(commit).await?;
        }
        tracing::info!(closed = closed.len(), "Closed reference allocations");
        Ok(closed)
    }

    /// Entry point for subscription/event status notifications.
    ///
    /// # Errors
    ///
    /// Same as [`cancel_reference`](Self::cancel_reference).
    pub async fn on_reference_status_changed(&self, change: ReferenceStatusChanged) -> Result<Vec<Allocation>> {
        tracing::debug!(reference = %change.reference, status = ?change.status, "Reference status changed");
        self.cancel_reference(change.reference, change.changed_by).await
    }

    /// Snapshot with the opening-balance lock evaluated at the current time
    fn snapshot_now(&self, item: &InventoryItem) -> ItemSnapshot {
        let mut snapshot = item.snapshot();
        snapshot.opening_balance_confirmed =
            item.opening_balance_locked(self.clock.now(), self.settings.opening_balance_auto_confirm_days);
        snapshot
    }

    pub(crate) fn role_of(&self, user: UserId) -> Option<Role> {
        self.roles.role_of(&user)
    }

    /// Load an item that must exist and not be deleted
    pub(crate) async fn live_item(&self, item_id: ItemId) -> Result<InventoryItem> {
        let item = self.any_item(item_id).await?;
        if item.is_deleted() {
            return Err(LedgerError::not_found(format!("Item {item_id} was deleted")));
        }
        Ok(item)
    }

    async fn any_item(&self, item_id: ItemId) -> Result<InventoryItem> {
        self.store
            .load_item(item_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("Item {item_id}")))
    }
}
