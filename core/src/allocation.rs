//! Allocation tracker: outstanding balance per (item, subscription/event).
//!
//! An allocation is opened by the outflow movement for a reference and then
//! worn down by returns and client-side writeoffs against the same
//! reference. It closes itself when nothing is outstanding.
//!
//! `outstanding == original - returned - damaged - lost`, never negative.

use crate::error::{LedgerError, Result};
use crate::movement::{Movement, MovementType};
use crate::types::{ItemId, Reference};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of an allocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AllocationKey {
    /// Item allocated
    pub item_id: ItemId,
    /// Subscription or event it went to
    pub reference: Reference,
}

impl fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.item_id, self.reference)
    }
}

/// Open or closed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Something may still be outstanding
    Open,
    /// Fully resolved
    Closed,
}

impl AllocationStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    /// Parse from the database string representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Reconciliation record for one (item, reference) pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Item allocated
    pub item_id: ItemId,
    /// Subscription or event
    pub reference: Reference,
    /// Quantity originally sent out
    pub original: u64,
    /// Returned in good condition
    pub returned: u64,
    /// Returned damaged or damaged at the client
    pub damaged: u64,
    /// Lost at the client
    pub lost: u64,
    /// Open or closed
    pub status: AllocationStatus,
    /// When the allocation movement was recorded
    pub opened_at: DateTime<Utc>,
    /// When it closed
    pub closed_at: Option<DateTime<Utc>>,
    /// Closed because the parent subscription/event ended
    pub closed_by_parent: bool,
}

impl Allocation {
    /// Open a new allocation
    #[must_use]
    pub const fn open(item_id: ItemId, reference: Reference, quantity: u64, now: DateTime<Utc>) -> Self {
        Self {
            item_id,
            reference,
            original: quantity,
            returned: 0,
            damaged: 0,
            lost: 0,
            status: AllocationStatus::Open,
            opened_at: now,
            closed_at: None,
            closed_by_parent: false,
        }
    }

    /// Key of this allocation
    #[must_use]
    pub const fn key(&self) -> AllocationKey {
        AllocationKey {
            item_id: self.item_id,
            reference: self.reference,
        }
    }

    /// `original - returned - damaged - lost`
    #[must_use]
    pub const fn outstanding(&self) -> u64 {
        self.original
            .saturating_sub(self.returned)
            .saturating_sub(self.damaged)
            .saturating_sub(self.lost)
    }

    /// Whether the allocation is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == AllocationStatus::Open
    }

    /// Record a return or client-side writeoff against this allocation.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::OverReturn`] if the quantity exceeds what is
    /// outstanding, and [`LedgerError::Validation`] for movement types that do
    /// not settle an allocation.
    pub fn settle(&self, movement_type: MovementType, quantity: u64, now: DateTime<Utc>) -> Result<Self> {
        let outstanding = self.outstanding();
        if quantity > outstanding {
            return Err(LedgerError::OverReturn {
                requested: quantity,
                outstanding,
            });
        }

        let mut next = self.clone();
        match movement_type {
            MovementType::ReturnGood => next.returned += quantity,
            MovementType::ReturnDamaged | MovementType::DamageClient => next.damaged += quantity,
            MovementType::Loss => next.lost += quantity,
            other => {
                return Err(LedgerError::validation(format!(
                    "{other} movements do not settle allocations"
                )));
            }
        }

        if next.outstanding() == 0 {
            next.status = AllocationStatus::Closed;
            next.closed_at = Some(now);
        }
        Ok(next)
    }

    /// Close because the parent subscription/event was cancelled or completed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::State`] while anything is outstanding.
    pub fn close_for_parent(&self, now: DateTime<Utc>) -> Result<Self> {
        let outstanding = self.outstanding();
        if outstanding > 0 {
            return Err(LedgerError::state(format!(
                "Allocation {} still has {outstanding} outstanding",
                self.key()
            )));
        }

        let mut next = self.clone();
        next.closed_by_parent = true;
        if next.status == AllocationStatus::Open {
            next.status = AllocationStatus::Closed;
            next.closed_at = Some(now);
        }
        Ok(next)
    }
}

/// Update the allocation affected by a movement, if any.
///
/// Returns the allocation to persist alongside the movement, or `None` when
/// the movement does not touch an allocation.
///
/// # Errors
///
/// - [`LedgerError::Conflict`] when an allocation movement targets a key that
///   already has an allocation (open or closed)
/// - [`LedgerError::OverReturn`] when a return/writeoff exceeds the
///   outstanding quantity (including against a missing allocation)
pub fn track(existing: Option<&Allocation>, movement: &Movement) -> Result<Option<Allocation>> {
    let Some(reference) = movement.reference else {
        return Ok(None);
    };
    let quantity = movement.quantity.get();

    match movement.movement_type {
        MovementType::Allocation => match existing {
            Some(allocation) => Err(LedgerError::conflict(format!(
                "Allocation {} already exists ({})",
                allocation.key(),
                allocation.status.as_str()
            ))),
            None => Ok(Some(Allocation::open(
                movement.item_id,
                reference,
                quantity,
                movement.recorded_at,
            ))),
        },
        MovementType::ReturnGood
        | MovementType::ReturnDamaged
        | MovementType::DamageClient
        | MovementType::Loss => match existing {
            Some(allocation) => allocation
                .settle(movement.movement_type, quantity, movement.recorded_at)
                .map(Some),
            None => Err(LedgerError::OverReturn {
                requested: quantity,
                outstanding: 0,
            }),
        },
        _ => Ok(None),
    }
}
