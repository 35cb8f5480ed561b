//! Authorization policy table.
//!
//! All role checks go through [`Policy::authorize`], keyed by
//! (action, lifecycle state, role). The ledger boundary consults it once per
//! operation; nothing else in the workspace compares roles.

use crate::error::{LedgerError, Result};
use crate::item::LifecycleStatus;
use crate::movement::MovementCategory;
use crate::types::Role;
use std::fmt;

/// Something an actor can attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolicyAction {
    /// Register a new item
    CreateItem,
    /// Record a movement of the given category. `locked` is the
    /// opening-balance lock state at check time.
    RecordMovement {
        /// Category of the movement
        category: MovementCategory,
        /// Whether the opening balance is locked
        locked: bool,
    },
    /// draft → active
    Activate,
    /// draft → deleted
    DeleteDraft,
    /// active → deleted
    DeleteActive,
    /// active → discontinued
    Discontinue,
    /// discontinued → active
    Reactivate,
    /// discontinued → archived
    Archive,
    /// Close allocations of a cancelled/completed subscription or event
    CloseReference,
    /// Create, count, submit or close an audit session
    CountStock,
    /// Approve or reject an audit session with shortages
    ApproveAudit,
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateItem => f.write_str("create item"),
            Self::RecordMovement { category, locked: true } => {
                write!(f, "record {category} movement on locked opening balance")
            }
            Self::RecordMovement { category, locked: false } => write!(f, "record {category} movement"),
            Self::Activate => f.write_str("activate item"),
            Self::DeleteDraft => f.write_str("delete draft item"),
            Self::DeleteActive => f.write_str("delete active item"),
            Self::Discontinue => f.write_str("discontinue item"),
            Self::Reactivate => f.write_str("reactivate item"),
            Self::Archive => f.write_str("archive item"),
            Self::CloseReference => f.write_str("close reference allocations"),
            Self::CountStock => f.write_str("count stock"),
            Self::ApproveAudit => f.write_str("approve audit"),
        }
    }
}

/// The authorization policy table
#[derive(Clone, Copy, Debug, Default)]
pub struct Policy;

impl Policy {
    /// Minimum role for `action` on an item in `status`.
    ///
    /// `status` is `None` for actions that are not tied to one item
    /// (creating items, audits, reference closing). `None` means nobody may
    /// perform the action in that state.
    #[must_use]
    pub const fn required_role(action: PolicyAction, status: Option<LifecycleStatus>) -> Option<Role> {
        if matches!(status, Some(LifecycleStatus::Archived)) {
            return None;
        }

        match action {
            PolicyAction::RecordMovement {
                category: MovementCategory::Adjustment,
                locked: true,
            }
            | PolicyAction::DeleteActive
            | PolicyAction::Archive
            | PolicyAction::ApproveAudit => Some(Role::Admin),
            PolicyAction::Activate
            | PolicyAction::DeleteDraft
            | PolicyAction::Discontinue
            | PolicyAction::Reactivate
            | PolicyAction::CloseReference => Some(Role::Manager),
            PolicyAction::CreateItem
            | PolicyAction::RecordMovement { .. }
            | PolicyAction::CountStock => Some(Role::Staff),
        }
    }

    /// Check that `role` may perform `action`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Authorization`] if the role is unknown or below
    /// the required role, or if nobody may perform the action in that state.
    pub fn authorize(action: PolicyAction, status: Option<LifecycleStatus>, role: Option<Role>) -> Result<()> {
        let required = Self::required_role(action, status);
        match (required, role) {
            (Some(required), Some(role)) if role.satisfies(required) => Ok(()),
            _ => Err(LedgerError::unauthorized(action.to_string(), required, role)),
        }
    }
}
