//! Lifecycle state machine for inventory items.
//!
//! ```text
//!            activate             discontinue           archive
//!   draft ─────────────► active ─────────────► discontinued ─────────► archived
//!     │                   │  ▲                      │
//!     │ delete            │  └──── reactivate ──────┘
//!     ▼                   ▼ delete
//!  (deleted)           (deleted)
//! ```
//!
//! Transitions are split in two steps so that authorization happens between
//! them: [`transition_action`] maps (from, target) to the [`PolicyAction`]
//! that must be authorized, and [`check_guards`] evaluates the item-level
//! preconditions.

use crate::error::{LedgerError, Result};
use crate::item::{InventoryItem, LifecycleStatus};
use crate::movement::MovementCategory;
use crate::policy::PolicyAction;
use crate::settings::LedgerSettings;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a transition request wants the item to go
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleTarget {
    /// Into service (from draft or discontinued)
    Active,
    /// Phase out
    Discontinued,
    /// Terminal archive
    Archived,
    /// Remove the item
    Deleted,
}

impl LifecycleTarget {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Discontinued => "discontinued",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for LifecycleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an item in `status` accepts movements of `category`
#[must_use]
pub const fn admits(status: LifecycleStatus, category: MovementCategory) -> bool {
    match status {
        LifecycleStatus::Draft => {
            matches!(category, MovementCategory::Inflow | MovementCategory::Adjustment)
        }
        LifecycleStatus::Active => true,
        LifecycleStatus::Discontinued => matches!(
            category,
            MovementCategory::Return
                | MovementCategory::Writeoff
                | MovementCategory::Adjustment
                | MovementCategory::Repair
        ),
        LifecycleStatus::Archived => false,
    }
}

/// Check that `status` accepts movements of `category`.
///
/// # Errors
///
/// Returns [`LedgerError::Validation`] if the category is not admissible.
pub fn ensure_admits(status: LifecycleStatus, category: MovementCategory) -> Result<()> {
    if admits(status, category) {
        Ok(())
    } else {
        Err(LedgerError::validation(format!(
            "{category} movements are not allowed while the item is {status}"
        )))
    }
}

/// The policy action a transition from `from` to `target` represents.
///
/// # Errors
///
/// Returns [`LedgerError::State`] for transitions the state machine does not
/// have, including anything out of `archived`.
pub fn transition_action(from: LifecycleStatus, target: LifecycleTarget) -> Result<PolicyAction> {
    match (from, target) {
        (LifecycleStatus::Draft, LifecycleTarget::Active) => Ok(PolicyAction::Activate),
        (LifecycleStatus::Draft, LifecycleTarget::Deleted) => Ok(PolicyAction::DeleteDraft),
        (LifecycleStatus::Active, LifecycleTarget::Discontinued) => Ok(PolicyAction::Discontinue),
        (LifecycleStatus::Active, LifecycleTarget::Deleted) => Ok(PolicyAction::DeleteActive),
        (LifecycleStatus::Discontinued, LifecycleTarget::Active) => Ok(PolicyAction::Reactivate),
        (LifecycleStatus::Discontinued, LifecycleTarget::Archived) => Ok(PolicyAction::Archive),
        (LifecycleStatus::Archived, _) => Err(LedgerError::state(format!(
            "Item is archived; cannot move to {target}"
        ))),
        (from, target) => Err(LedgerError::state(format!(
            "No transition from {from} to {target}"
        ))),
    }
}

/// Evaluate the item-level preconditions of a transition.
///
/// # Errors
///
/// Returns [`LedgerError::State`] naming the unmet precondition.
pub fn check_guards(
    item: &InventoryItem,
    target: LifecycleTarget,
    now: DateTime<Utc>,
    settings: &LedgerSettings,
) -> Result<()> {
    let from = item.lifecycle_status;
    transition_action(from, target)?;

    match (from, target) {
        (LifecycleStatus::Draft, LifecycleTarget::Active) => {
            let mut missing = Vec::new();
            if item.category.is_none() {
                missing.push("category");
            }
            if item.outlet.is_none() {
                missing.push("outlet");
            }
            if !missing.is_empty() {
                return Err(LedgerError::state(format!(
                    "Cannot activate: missing {}",
                    missing.join(", ")
                )));
            }
        }
        (LifecycleStatus::Draft, LifecycleTarget::Deleted) => {
            if item.movement_count > 0 {
                return Err(LedgerError::state(format!(
                    "Cannot delete draft: {} movements recorded",
                    item.movement_count
                )));
            }
        }
        (LifecycleStatus::Active, LifecycleTarget::Discontinued) => {
            if item.stock.allocated > 0 {
                return Err(LedgerError::state(format!(
                    "Cannot discontinue: {} units still allocated",
                    item.stock.allocated
                )));
            }
        }
        (LifecycleStatus::Active, LifecycleTarget::Deleted) => {
            if item.has_reference_history {
                return Err(LedgerError::state(
                    "Cannot delete: item has subscription/event history",
                ));
            }
            if item.stock.total > 0 {
                return Err(LedgerError::state(format!(
                    "Cannot delete: {} units still owned",
                    item.stock.total
                )));
            }
        }
        (LifecycleStatus::Discontinued, LifecycleTarget::Archived) => {
            if item.stock.total > 0 {
                return Err(LedgerError::state(format!(
                    "Cannot archive: {} units still owned",
                    item.stock.total
                )));
            }
            let window = Duration::days(i64::from(settings.archive_inactivity_days));
            if let Some(last) = item.last_movement_at.filter(|last| now - *last < window) {
                return Err(LedgerError::state(format!(
                    "Cannot archive: last movement at {last} is within {} days",
                    settings.archive_inactivity_days
                )));
            }
        }
        _ => {}
    }

    Ok(())
}

/// Apply a checked transition, returning the updated item.
#[must_use]
pub fn apply(item: &InventoryItem, target: LifecycleTarget, now: DateTime<Utc>) -> InventoryItem {
    let mut next = item.clone();
    match target {
        LifecycleTarget::Active => next.lifecycle_status = LifecycleStatus::Active,
        LifecycleTarget::Discontinued => next.lifecycle_status = LifecycleStatus::Discontinued,
        LifecycleTarget::Archived => next.lifecycle_status = LifecycleStatus::Archived,
        LifecycleTarget::Deleted => next.deleted_at = Some(now),
    }
    next.version += 1;
    next
}
