//! The movement pipeline: validate → project → update allocation.
//!
//! [`record_movement`] is a pure function from the current item (and the
//! allocation the movement refers to, if any) to the movement that would be
//! appended plus the item and allocation as they would look afterwards. It
//! never mutates its inputs; the caller persists the three results together
//! or not at all.

use crate::allocation::{self, Allocation};
use crate::error::{LedgerError, Result};
use crate::item::InventoryItem;
use crate::lifecycle;
use crate::movement::{Movement, MovementCategory, MovementType, NewMovement, Quantity, ReasonCode, ReferenceRule};
use crate::policy::{Policy, PolicyAction};
use crate::settings::LedgerSettings;
use crate::types::{MovementId, Role};
use chrono::{DateTime, Utc};

/// Who is recording, when, and under which settings
#[derive(Clone, Copy, Debug)]
pub struct MovementContext<'a> {
    /// Role of the actor, `None` if unknown
    pub role: Option<Role>,
    /// Current time
    pub now: DateTime<Utc>,
    /// Policy windows
    pub settings: &'a LedgerSettings,
}

/// Outcome of a successful pipeline run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedMovement {
    /// The movement to append
    pub movement: Movement,
    /// The item after projection
    pub item: InventoryItem,
    /// The allocation after tracking, if the movement touched one
    pub allocation: Option<Allocation>,
}

/// Run a movement request through the pipeline.
///
/// `allocation` must be the stored allocation for
/// `(input.item_id, input.reference)` when the request has a reference.
///
/// # Errors
///
/// - [`LedgerError::Validation`]: bad quantity, reference, reason or notes,
///   or a category the lifecycle state does not admit
/// - [`LedgerError::Authorization`]: role below the policy table
/// - [`LedgerError::InsufficientStock`]: a counter would go negative
/// - [`LedgerError::Conflict`] / [`LedgerError::OverReturn`]: allocation rules
pub fn record_movement(
    item: &InventoryItem,
    allocation: Option<&Allocation>,
    input: NewMovement,
    ctx: &MovementContext<'_>,
) -> Result<RecordedMovement> {
    if item.is_deleted() {
        return Err(LedgerError::not_found(format!("Item {} was deleted", item.id)));
    }
    if input.item_id != item.id {
        return Err(LedgerError::validation(format!(
            "Movement targets item {} but was applied to {}",
            input.item_id, item.id
        )));
    }

    let quantity = Quantity::new(input.quantity)?;
    validate_reference(&input)?;
    let notes = input
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    validate_reason(input.movement_type, input.reason_code, notes.as_deref())?;

    let category = input.movement_type.category();
    lifecycle::ensure_admits(item.lifecycle_status, category)?;

    let locked = item.opening_balance_locked(ctx.now, ctx.settings.opening_balance_auto_confirm_days);
    if locked && input.movement_type == MovementType::OpeningStock {
        return Err(LedgerError::validation(
            "Opening balance is confirmed; record a purchase or an adjustment instead",
        ));
    }
    Policy::authorize(
        PolicyAction::RecordMovement { category, locked },
        Some(item.lifecycle_status),
        ctx.role,
    )?;

    let movement = Movement {
        id: MovementId::new(),
        item_id: item.id,
        sequence: item.movement_count + 1,
        category,
        movement_type: input.movement_type,
        quantity,
        reference: input.reference,
        reason_code: input.reason_code,
        notes,
        actor: input.actor,
        recorded_at: ctx.now,
    };

    // Allocation first: a return beyond the outstanding balance is an
    // over-return even when it would also overdraw `allocated`.
    let allocation = allocation::track(allocation, &movement)?;
    let stock = item.stock.project(&movement)?;

    let mut next = item.clone();
    next.stock = stock;
    next.movement_count = movement.sequence;
    next.has_reference_history |= movement.reference.is_some();
    next.first_movement_at = next.first_movement_at.or(Some(ctx.now));
    next.last_movement_at = Some(ctx.now);
    next.opening_balance_confirmed = locked || category == MovementCategory::Outflow;
    next.version += 1;

    Ok(RecordedMovement {
        movement,
        item: next,
        allocation,
    })
}

fn validate_reference(input: &NewMovement) -> Result<()> {
    match (input.movement_type.reference_rule(), input.reference) {
        (ReferenceRule::Required, None) => Err(LedgerError::validation(format!(
            "{} movements must reference a subscription or event",
            input.movement_type
        ))),
        (ReferenceRule::Forbidden, Some(reference)) => Err(LedgerError::validation(format!(
            "{} movements cannot reference {reference}",
            input.movement_type
        ))),
        _ => Ok(()),
    }
}

fn validate_reason(movement_type: MovementType, reason: Option<ReasonCode>, notes: Option<&str>) -> Result<()> {
    if movement_type.requires_reason() && reason.is_none() {
        return Err(LedgerError::validation(format!(
            "{movement_type} movements require a reason code"
        )));
    }
    if reason == Some(ReasonCode::Other) && notes.is_none() {
        return Err(LedgerError::validation(
            "Reason 'other' requires notes explaining the movement",
        ));
    }
    Ok(())
}
