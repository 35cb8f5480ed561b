//! Stock projector: per-item counters as a left fold over the ledger.
//!
//! [`StockDelta::for_movement`] is the pure mapping from a movement to counter
//! changes; [`StockLevels::apply`] applies a delta and refuses (never clamps)
//! anything that would take a counter below zero.
//!
//! # Balance invariant
//!
//! `total == available + allocated + damaged + in_repair` after every
//! admissible movement. `lost` is a cumulative tally outside the equation.

use crate::error::{LedgerError, Result};
use crate::movement::{Movement, MovementType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Names of the projected counters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    /// In the warehouse, ready to go out
    Available,
    /// Out at subscriptions and events
    Allocated,
    /// Damaged, awaiting repair or disposal
    Damaged,
    /// At the repair shop
    InRepair,
    /// Cumulative losses
    Lost,
    /// Owned stock
    Total,
}

impl Counter {
    /// Database/column name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Allocated => "allocated",
            Self::Damaged => "damaged",
            Self::InRepair => "in_repair",
            Self::Lost => "lost",
            Self::Total => "total",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed change to each counter produced by one movement
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    /// Change to `available`
    pub available: i64,
    /// Change to `allocated`
    pub allocated: i64,
    /// Change to `damaged`
    pub damaged: i64,
    /// Change to `in_repair`
    pub in_repair: i64,
    /// Change to `lost`
    pub lost: i64,
    /// Change to `total`
    pub total: i64,
}

impl StockDelta {
    /// Counter changes for a movement of `quantity` units.
    ///
    /// `referenced` only matters for [`MovementType::Loss`]: a loss against a
    /// subscription/event comes out of `allocated`, otherwise out of
    /// `available`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] if `quantity` does not fit a signed
    /// delta.
    pub fn for_movement(movement_type: MovementType, quantity: u64, referenced: bool) -> Result<Self> {
        let n = i64::try_from(quantity)
            .map_err(|_| LedgerError::validation(format!("Quantity {quantity} is too large")))?;
        let zero = Self::default();
        Ok(match movement_type {
            MovementType::OpeningStock | MovementType::Purchase | MovementType::AdjustmentPositive => {
                Self { available: n, total: n, ..zero }
            }
            MovementType::Allocation => Self { available: -n, allocated: n, ..zero },
            MovementType::ReturnGood => Self { available: n, allocated: -n, ..zero },
            MovementType::ReturnDamaged | MovementType::DamageClient => {
                Self { damaged: n, allocated: -n, ..zero }
            }
            MovementType::DamageWarehouse => Self { damaged: n, available: -n, ..zero },
            MovementType::Loss if referenced => Self { lost: n, allocated: -n, total: -n, ..zero },
            MovementType::Loss => Self { lost: n, available: -n, total: -n, ..zero },
            MovementType::Disposal => Self { damaged: -n, total: -n, ..zero },
            MovementType::AdjustmentNegative => Self { available: -n, total: -n, ..zero },
            MovementType::SendToRepair => Self { in_repair: n, damaged: -n, ..zero },
            MovementType::ReturnFromRepairFixed => Self { available: n, in_repair: -n, ..zero },
            MovementType::ReturnFromRepairIrreparable => Self { in_repair: -n, total: -n, ..zero },
        })
    }

    /// Counter changes for a recorded movement
    ///
    /// # Errors
    ///
    /// See [`StockDelta::for_movement`].
    pub fn of(movement: &Movement) -> Result<Self> {
        Self::for_movement(
            movement.movement_type,
            movement.quantity.get(),
            movement.reference.is_some(),
        )
    }
}

/// Projected quantity counters for one item
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockLevels {
    /// In the warehouse, ready to go out
    pub available: u64,
    /// Out at subscriptions and events
    pub allocated: u64,
    /// Damaged, awaiting repair or disposal
    pub damaged: u64,
    /// At the repair shop
    pub in_repair: u64,
    /// Cumulative losses (outside the balance equation)
    pub lost: u64,
    /// Owned stock
    pub total: u64,
}

impl StockLevels {
    /// All counters at zero
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            available: 0,
            allocated: 0,
            damaged: 0,
            in_repair: 0,
            lost: 0,
            total: 0,
        }
    }

    /// Value of one counter
    #[must_use]
    pub const fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Available => self.available,
            Counter::Allocated => self.allocated,
            Counter::Damaged => self.damaged,
            Counter::InRepair => self.in_repair,
            Counter::Lost => self.lost,
            Counter::Total => self.total,
        }
    }

    /// Whether `total == available + allocated + damaged + in_repair`
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.available + self.allocated + self.damaged + self.in_repair == self.total
    }

    /// Apply a delta, returning the new levels.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientStock`] naming the first counter that
    /// would go negative, or [`LedgerError::Validation`] if a counter would
    /// overflow. `self` is never modified.
    pub fn apply(&self, delta: &StockDelta) -> Result<Self> {
        Ok(Self {
            available: shift(Counter::Available, self.available, delta.available)?,
            allocated: shift(Counter::Allocated, self.allocated, delta.allocated)?,
            damaged: shift(Counter::Damaged, self.damaged, delta.damaged)?,
            in_repair: shift(Counter::InRepair, self.in_repair, delta.in_repair)?,
            lost: shift(Counter::Lost, self.lost, delta.lost)?,
            total: shift(Counter::Total, self.total, delta.total)?,
        })
    }

    /// Apply a recorded movement.
    ///
    /// # Errors
    ///
    /// See [`StockLevels::apply`].
    pub fn project(&self, movement: &Movement) -> Result<Self> {
        self.apply(&StockDelta::of(movement)?)
    }

    /// Fold a movement history (in sequence order) from zero.
    ///
    /// # Errors
    ///
    /// Fails if any prefix of the history would overdraw a counter, which
    /// means the history was not produced by this ledger.
    pub fn replay<'a>(movements: impl IntoIterator<Item = &'a Movement>) -> Result<Self> {
        movements
            .into_iter()
            .try_fold(Self::empty(), |levels, movement| levels.project(movement))
    }
}

fn shift(counter: Counter, current: u64, delta: i64) -> Result<u64> {
    if delta >= 0 {
        return current.checked_add(delta.unsigned_abs()).ok_or_else(|| {
            LedgerError::validation(format!("{counter} would exceed its maximum of {}", u64::MAX))
        });
    }
    let requested = delta.unsigned_abs();
    current
        .checked_sub(requested)
        .ok_or(LedgerError::InsufficientStock {
            counter,
            requested,
            available: current,
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn levels(available: u64, allocated: u64, damaged: u64, in_repair: u64) -> StockLevels {
        StockLevels {
            available,
            allocated,
            damaged,
            in_repair,
            lost: 0,
            total: available + allocated + damaged + in_repair,
        }
    }

    fn delta_for(kind: MovementType, quantity: u64, referenced: bool) -> StockDelta {
        StockDelta::for_movement(kind, quantity, referenced).unwrap()
    }

    #[test]
    fn every_movement_type_preserves_balance() {
        let start = levels(50, 50, 50, 50);
        for kind in MovementType::ALL {
            for referenced in [false, true] {
                let delta = delta_for(kind, 7, referenced);
                let next = start.apply(&delta).unwrap_or_else(|e| panic!("{kind}: {e}"));
                assert!(next.is_balanced(), "{kind} (referenced={referenced}) unbalanced: {next:?}");
            }
        }
    }

    #[test]
    fn allocation_moves_available_to_allocated() {
        let next = levels(100, 0, 0, 0)
            .apply(&delta_for(MovementType::Allocation, 30, true))
            .unwrap();
        assert_eq!(next, levels(70, 30, 0, 0));
    }

    #[test]
    fn loss_source_depends_on_reference() {
        let start = levels(10, 10, 0, 0);
        let at_client = start
            .apply(&delta_for(MovementType::Loss, 4, true))
            .unwrap();
        assert_eq!((at_client.available, at_client.allocated), (10, 6));
        assert_eq!((at_client.lost, at_client.total), (4, 16));

        let in_warehouse = start
            .apply(&delta_for(MovementType::Loss, 4, false))
            .unwrap();
        assert_eq!((in_warehouse.available, in_warehouse.allocated), (6, 10));
    }

    #[test]
    fn overdraw_is_rejected_not_clamped() {
        let start = levels(70, 0, 0, 0);
        let err = start
            .apply(&delta_for(MovementType::Allocation, 200, true))
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                counter: Counter::Available,
                requested: 200,
                available: 70,
            }
        );
    }

    #[test]
    fn repair_round_trip() {
        let start = levels(0, 0, 5, 0);
        let sent = start
            .apply(&delta_for(MovementType::SendToRepair, 5, false))
            .unwrap();
        assert_eq!(sent, levels(0, 0, 0, 5));
        let fixed = sent
            .apply(&delta_for(MovementType::ReturnFromRepairFixed, 3, false))
            .unwrap();
        let scrapped = fixed
            .apply(&delta_for(MovementType::ReturnFromRepairIrreparable, 2, false))
            .unwrap();
        assert_eq!(scrapped, levels(3, 0, 0, 0));
    }

    #[test]
    fn disposal_requires_damaged_stock() {
        let err = levels(10, 0, 0, 0)
            .apply(&delta_for(MovementType::Disposal, 1, false))
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock { counter: Counter::Damaged, .. }
        ));
    }

    #[test]
    fn inflow_past_the_counter_maximum_is_rejected() {
        let mut start = levels(0, 0, 0, 0);
        start.available = u64::MAX - 5;
        start.total = u64::MAX - 5;
        let err = start
            .apply(&delta_for(MovementType::Purchase, 10, false))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn quantities_beyond_a_signed_delta_are_rejected() {
        let err = StockDelta::for_movement(MovementType::Purchase, u64::MAX, false).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        let largest = u64::try_from(i64::MAX).unwrap();
        let delta = delta_for(MovementType::Purchase, largest, false);
        assert_eq!((delta.available, delta.total), (i64::MAX, i64::MAX));
    }
}
