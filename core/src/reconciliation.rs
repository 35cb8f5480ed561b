//! Physical audit sessions.
//!
//! ```text
//! draft → counting → review ─┬─► auto_approved ──────────────┐
//!                            └─► pending_approval ─┬─► approved ─┼─► closed
//!                                                  └─► rejected ─┘
//! ```
//!
//! The session is a plain value; every transition returns a new session or an
//! error. Adjustment movements are derived from the counted lines and go
//! through the ordinary movement pipeline.

use crate::error::{LedgerError, Result};
use crate::movement::{MovementType, NewMovement, ReasonCode};
use crate::settings::LedgerSettings;
use crate::types::{AuditSessionId, ItemId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Status of an audit session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Lines chosen, nothing counted yet
    Draft,
    /// Book quantities captured, physical counts being entered
    Counting,
    /// Submitted; routing pending
    Review,
    /// Surplus only, adjustments emitted without approval
    AutoApproved,
    /// Waiting for an admin
    PendingApproval,
    /// Admin approved, adjustments emitted
    Approved,
    /// Admin rejected, nothing emitted
    Rejected,
    /// Done
    Closed,
}

impl AuditStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Counting => "counting",
            Self::Review => "review",
            Self::AutoApproved => "auto_approved",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        }
    }

    /// Parse from the database string representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "counting" => Some(Self::Counting),
            "review" => Some(Self::Review),
            "auto_approved" => Some(Self::AutoApproved),
            "pending_approval" => Some(Self::PendingApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One counted item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLine {
    /// Item counted
    pub item_id: ItemId,
    /// Book quantity (`available`) when counting started
    pub system_quantity: u64,
    /// Entered physical count
    pub physical_quantity: Option<u64>,
    /// Reason for a nonzero variance
    pub reason_code: Option<ReasonCode>,
    /// Free-form notes
    pub notes: Option<String>,
}

impl AuditLine {
    /// `physical - system`, `None` until counted
    #[must_use]
    pub fn variance(&self) -> Option<i64> {
        let physical = i128::from(self.physical_quantity?);
        let diff = physical - i128::from(self.system_quantity);
        i64::try_from(diff).ok()
    }

    /// Whether the variance exceeds `threshold_pct` percent of the book
    /// quantity. Any variance on an empty book counts as large.
    #[must_use]
    pub fn is_large_variance(&self, threshold_pct: u32) -> bool {
        match self.variance() {
            None | Some(0) => false,
            Some(variance) => {
                u128::from(variance.unsigned_abs()) * 100
                    > u128::from(threshold_pct) * u128::from(self.system_quantity)
            }
        }
    }

    /// The adjustment that would correct the book to the count
    #[must_use]
    pub fn adjustment(&self, session: AuditSessionId, actor: UserId) -> Option<NewMovement> {
        let variance = self.variance()?;
        let movement_type = match variance.signum() {
            1 => MovementType::AdjustmentPositive,
            -1 => MovementType::AdjustmentNegative,
            _ => return None,
        };
        let quantity = i64::try_from(variance.unsigned_abs()).ok()?;

        let mut notes = format!("Physical audit {session}");
        if let Some(line_notes) = &self.notes {
            notes.push_str(": ");
            notes.push_str(line_notes);
        }

        let mut movement = NewMovement::new(self.item_id, movement_type, quantity, actor).with_notes(notes);
        movement.reason_code = self.reason_code;
        Some(movement)
    }
}

/// A physical count across one or more items
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSession {
    /// Identifier
    pub id: AuditSessionId,
    /// Workflow status
    pub status: AuditStatus,
    /// One line per item, in creation order
    pub lines: Vec<AuditLine>,
    /// Who opened the session
    pub created_by: UserId,
    /// Who submitted it for review
    pub submitted_by: Option<UserId>,
    /// Who approved or rejected it
    pub decided_by: Option<UserId>,
    /// Reason given on rejection
    pub rejection_reason: Option<String>,
    /// Opened at
    pub created_at: DateTime<Utc>,
    /// Last transition
    pub updated_at: DateTime<Utc>,
}

impl AuditSession {
    /// Open a draft session over `item_ids`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for an empty or duplicated item list.
    pub fn create(id: AuditSessionId, item_ids: &[ItemId], created_by: UserId, now: DateTime<Utc>) -> Result<Self> {
        if item_ids.is_empty() {
            return Err(LedgerError::validation("Audit session needs at least one item"));
        }
        let distinct: BTreeSet<_> = item_ids.iter().collect();
        if distinct.len() != item_ids.len() {
            return Err(LedgerError::validation("Audit session lists an item more than once"));
        }

        Ok(Self {
            id,
            status: AuditStatus::Draft,
            lines: item_ids
                .iter()
                .map(|&item_id| AuditLine {
                    item_id,
                    system_quantity: 0,
                    physical_quantity: None,
                    reason_code: None,
                    notes: None,
                })
                .collect(),
            created_by,
            submitted_by: None,
            decided_by: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Items covered by the session
    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.lines.iter().map(|line| line.item_id)
    }

    /// draft → counting, capturing the book quantity of every line.
    ///
    /// `book` maps each item to its current `available` counter.
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] outside draft, [`LedgerError::NotFound`] if a
    /// book quantity is missing.
    pub fn start_counting(&self, book: impl Fn(ItemId) -> Option<u64>, now: DateTime<Utc>) -> Result<Self> {
        self.expect_status(AuditStatus::Draft, "start counting")?;
        let mut next = self.clone();
        for line in &mut next.lines {
            line.system_quantity = book(line.item_id)
                .ok_or_else(|| LedgerError::not_found(format!("Item {} is not in the ledger", line.item_id)))?;
        }
        next.status = AuditStatus::Counting;
        next.updated_at = now;
        Ok(next)
    }

    /// Enter (or re-enter) the physical count of one line.
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] outside counting; [`LedgerError::Validation`]
    /// for a negative count, an item not in the session, or reason `other`
    /// without notes.
    pub fn record_count(
        &self,
        item_id: ItemId,
        physical: i64,
        reason_code: Option<ReasonCode>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        self.expect_status(AuditStatus::Counting, "record a count")?;
        let physical = u64::try_from(physical)
            .map_err(|_| LedgerError::validation(format!("Physical count cannot be negative, got {physical}")))?;
        let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if reason_code == Some(ReasonCode::Other) && notes.is_none() {
            return Err(LedgerError::validation("Reason 'other' requires notes"));
        }

        let mut next = self.clone();
        let line = next
            .lines
            .iter_mut()
            .find(|line| line.item_id == item_id)
            .ok_or_else(|| LedgerError::validation(format!("Item {item_id} is not part of audit {}", self.id)))?;
        line.physical_quantity = Some(physical);
        line.reason_code = reason_code;
        line.notes = notes;
        next.updated_at = now;
        Ok(next)
    }

    /// counting → review.
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] outside counting; [`LedgerError::Validation`]
    /// if a line is uncounted or a nonzero variance lacks a reason code.
    pub fn submit(&self, submitted_by: UserId, now: DateTime<Utc>) -> Result<Self> {
        self.expect_status(AuditStatus::Counting, "submit")?;
        for line in &self.lines {
            match line.variance() {
                None => {
                    return Err(LedgerError::validation(format!(
                        "Item {} has not been counted",
                        line.item_id
                    )));
                }
                Some(variance) if variance != 0 && line.reason_code.is_none() => {
                    return Err(LedgerError::validation(format!(
                        "Item {} has variance {variance} but no reason code",
                        line.item_id
                    )));
                }
                Some(_) => {}
            }
        }

        let mut next = self.clone();
        next.status = AuditStatus::Review;
        next.submitted_by = Some(submitted_by);
        next.updated_at = now;
        Ok(next)
    }

    /// Whether the session can skip the approval gate: no shortages, and no
    /// large variance when large variances require approval.
    #[must_use]
    pub fn qualifies_for_auto_approval(&self, settings: &LedgerSettings) -> bool {
        self.lines.iter().all(|line| {
            line.variance().is_some_and(|v| v >= 0)
                && !(settings.large_variance_requires_approval
                    && line.is_large_variance(settings.large_variance_threshold_pct))
        })
    }

    /// review → auto_approved or pending_approval.
    ///
    /// `needs_elevation` forces the approval gate, e.g. when the submitter
    /// may not record the adjustments themselves.
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] outside review.
    pub fn route(&self, settings: &LedgerSettings, needs_elevation: bool, now: DateTime<Utc>) -> Result<Self> {
        self.expect_status(AuditStatus::Review, "route")?;
        let mut next = self.clone();
        next.status = if !needs_elevation && self.qualifies_for_auto_approval(settings) {
            AuditStatus::AutoApproved
        } else {
            AuditStatus::PendingApproval
        };
        next.updated_at = now;
        Ok(next)
    }

    /// pending_approval → approved
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] outside pending_approval.
    pub fn approve(&self, approver: UserId, now: DateTime<Utc>) -> Result<Self> {
        self.expect_status(AuditStatus::PendingApproval, "approve")?;
        let mut next = self.clone();
        next.status = AuditStatus::Approved;
        next.decided_by = Some(approver);
        next.updated_at = now;
        Ok(next)
    }

    /// pending_approval → rejected
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] outside pending_approval.
    pub fn reject(&self, approver: UserId, reason: Option<String>, now: DateTime<Utc>) -> Result<Self> {
        self.expect_status(AuditStatus::PendingApproval, "reject")?;
        let mut next = self.clone();
        next.status = AuditStatus::Rejected;
        next.decided_by = Some(approver);
        next.rejection_reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        next.updated_at = now;
        Ok(next)
    }

    /// approved / auto_approved / rejected → closed
    ///
    /// # Errors
    ///
    /// [`LedgerError::State`] from any other status.
    pub fn close(&self, now: DateTime<Utc>) -> Result<Self> {
        if !matches!(
            self.status,
            AuditStatus::Approved | AuditStatus::AutoApproved | AuditStatus::Rejected
        ) {
            return Err(LedgerError::state(format!(
                "Cannot close audit {} while {}",
                self.id, self.status
            )));
        }
        let mut next = self.clone();
        next.status = AuditStatus::Closed;
        next.updated_at = now;
        Ok(next)
    }

    /// One adjustment per nonzero-variance line
    #[must_use]
    pub fn adjustments(&self, actor: UserId) -> Vec<NewMovement> {
        self.lines
            .iter()
            .filter_map(|line| line.adjustment(self.id, actor))
            .collect()
    }

    fn expect_status(&self, expected: AuditStatus, action: &str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(LedgerError::state(format!(
                "Cannot {action} audit {}: status is {}, expected {expected}",
                self.id, self.status
            )))
        }
    }
}
