//! Ledger movements: the immutable facts every stock level is derived from.
//!
//! A [`NewMovement`] is what a caller asks for; a [`Movement`] is what the
//! ledger recorded after validation. Movements are never updated or deleted.

use crate::error::{LedgerError, Result};
use crate::types::{ItemId, MovementId, Reference, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Categories and types
// ============================================================================

/// Broad class of a movement, used for lifecycle admissibility and policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementCategory {
    /// New stock entering the business
    Inflow,
    /// Stock leaving for a subscription or event
    Outflow,
    /// Stock coming back from a subscription or event
    Return,
    /// Damage, loss and disposal
    Writeoff,
    /// Manual correction of the book quantity
    Adjustment,
    /// Stock moving to and from repair
    Repair,
}

impl MovementCategory {
    /// All categories
    pub const ALL: [Self; 6] = [
        Self::Inflow,
        Self::Outflow,
        Self::Return,
        Self::Writeoff,
        Self::Adjustment,
        Self::Repair,
    ];

    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inflow => "inflow",
            Self::Outflow => "outflow",
            Self::Return => "return",
            Self::Writeoff => "writeoff",
            Self::Adjustment => "adjustment",
            Self::Repair => "repair",
        }
    }
}

impl fmt::Display for MovementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a movement type needs a subscription/event reference
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceRule {
    /// Must reference a subscription or event
    Required,
    /// May reference one
    Optional,
    /// Must not reference one
    Forbidden,
}

/// The specific kind of a movement. The category is derived from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Initial count when the item is introduced
    OpeningStock,
    /// Stock bought from a supplier
    Purchase,
    /// Stock sent out to a subscription or event
    Allocation,
    /// Returned in usable condition
    ReturnGood,
    /// Returned damaged
    ReturnDamaged,
    /// Damaged in the warehouse
    DamageWarehouse,
    /// Damaged while at the client
    DamageClient,
    /// Lost (at the client when referenced, otherwise in the warehouse)
    Loss,
    /// Damaged stock thrown away
    Disposal,
    /// Book quantity corrected upwards
    AdjustmentPositive,
    /// Book quantity corrected downwards
    AdjustmentNegative,
    /// Damaged stock sent for repair
    SendToRepair,
    /// Repaired stock back in service
    ReturnFromRepairFixed,
    /// Repair failed, stock written off
    ReturnFromRepairIrreparable,
}

impl MovementType {
    /// All movement types
    pub const ALL: [Self; 14] = [
        Self::OpeningStock,
        Self::Purchase,
        Self::Allocation,
        Self::ReturnGood,
        Self::ReturnDamaged,
        Self::DamageWarehouse,
        Self::DamageClient,
        Self::Loss,
        Self::Disposal,
        Self::AdjustmentPositive,
        Self::AdjustmentNegative,
        Self::SendToRepair,
        Self::ReturnFromRepairFixed,
        Self::ReturnFromRepairIrreparable,
    ];

    /// Category this type belongs to
    #[must_use]
    pub const fn category(&self) -> MovementCategory {
        match self {
            Self::OpeningStock | Self::Purchase => MovementCategory::Inflow,
            Self::Allocation => MovementCategory::Outflow,
            Self::ReturnGood | Self::ReturnDamaged => MovementCategory::Return,
            Self::DamageWarehouse | Self::DamageClient | Self::Loss | Self::Disposal => {
                MovementCategory::Writeoff
            }
            Self::AdjustmentPositive | Self::AdjustmentNegative => MovementCategory::Adjustment,
            Self::SendToRepair | Self::ReturnFromRepairFixed | Self::ReturnFromRepairIrreparable => {
                MovementCategory::Repair
            }
        }
    }

    /// Whether this type needs a subscription/event reference
    #[must_use]
    pub const fn reference_rule(&self) -> ReferenceRule {
        match self {
            Self::Allocation | Self::ReturnGood | Self::ReturnDamaged | Self::DamageClient => {
                ReferenceRule::Required
            }
            Self::Loss => ReferenceRule::Optional,
            _ => ReferenceRule::Forbidden,
        }
    }

    /// Whether this type requires a reason code
    #[must_use]
    pub const fn requires_reason(&self) -> bool {
        matches!(
            self.category(),
            MovementCategory::Writeoff | MovementCategory::Adjustment
        )
    }

    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpeningStock => "opening_stock",
            Self::Purchase => "purchase",
            Self::Allocation => "allocation",
            Self::ReturnGood => "return_good",
            Self::ReturnDamaged => "return_damaged",
            Self::DamageWarehouse => "damage_warehouse",
            Self::DamageClient => "damage_client",
            Self::Loss => "loss",
            Self::Disposal => "disposal",
            Self::AdjustmentPositive => "adjustment_positive",
            Self::AdjustmentNegative => "adjustment_negative",
            Self::SendToRepair => "send_to_repair",
            Self::ReturnFromRepairFixed => "return_from_repair_fixed",
            Self::ReturnFromRepairIrreparable => "return_from_repair_irreparable",
        }
    }

    /// Parse from the database string representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a movement happened
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Initial physical count
    OpeningCount,
    /// Supplier purchase
    Purchase,
    /// Delivery to a client
    Delivery,
    /// Collection from a client
    Collection,
    /// Broken in handling
    Breakage,
    /// Damaged by the client
    CustomerDamage,
    /// Stolen
    Theft,
    /// Cannot be located
    Misplaced,
    /// End of useful life
    WornOut,
    /// Physical count correction
    CountCorrection,
    /// Found after being written off or missed
    Found,
    /// Typo or wrong entry
    DataEntryError,
    /// Anything else; notes are required
    Other,
}

impl ReasonCode {
    /// All reason codes
    pub const ALL: [Self; 13] = [
        Self::OpeningCount,
        Self::Purchase,
        Self::Delivery,
        Self::Collection,
        Self::Breakage,
        Self::CustomerDamage,
        Self::Theft,
        Self::Misplaced,
        Self::WornOut,
        Self::CountCorrection,
        Self::Found,
        Self::DataEntryError,
        Self::Other,
    ];

    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpeningCount => "opening_count",
            Self::Purchase => "purchase",
            Self::Delivery => "delivery",
            Self::Collection => "collection",
            Self::Breakage => "breakage",
            Self::CustomerDamage => "customer_damage",
            Self::Theft => "theft",
            Self::Misplaced => "misplaced",
            Self::WornOut => "worn_out",
            Self::CountCorrection => "count_correction",
            Self::Found => "found",
            Self::DataEntryError => "data_entry_error",
            Self::Other => "other",
        }
    }

    /// Parse from the database string representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_str() == s)
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Quantity
// ============================================================================

/// A strictly positive movement quantity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Quantity(u64);

impl Quantity {
    /// Validates a raw quantity coming from a caller.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] if the quantity is zero or negative.
    pub fn new(raw: i64) -> Result<Self> {
        if raw <= 0 {
            return Err(LedgerError::validation(format!(
                "Quantity must be greater than zero (got {raw})"
            )));
        }
        Ok(Self(raw.unsigned_abs()))
    }

    /// The quantity as an unsigned value
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Quantity {
    type Error = LedgerError;

    fn try_from(value: u64) -> Result<Self> {
        if value == 0 {
            return Err(LedgerError::validation("Quantity must be greater than zero"));
        }
        if i64::try_from(value).is_err() {
            return Err(LedgerError::validation(format!("Quantity {value} is too large")));
        }
        Ok(Self(value))
    }
}

impl From<Quantity> for u64 {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Movements
// ============================================================================

/// A request to record a movement
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    /// Item the movement applies to
    pub item_id: ItemId,
    /// Specific kind of movement
    pub movement_type: MovementType,
    /// Raw quantity as entered; validated to be positive
    pub quantity: i64,
    /// Subscription or event the movement belongs to
    pub reference: Option<Reference>,
    /// Why the movement happened
    pub reason_code: Option<ReasonCode>,
    /// Free-text notes
    pub notes: Option<String>,
    /// Who records the movement
    pub actor: UserId,
}

impl NewMovement {
    /// Creates a request without reference, reason or notes
    #[must_use]
    pub const fn new(item_id: ItemId, movement_type: MovementType, quantity: i64, actor: UserId) -> Self {
        Self {
            item_id,
            movement_type,
            quantity,
            reference: None,
            reason_code: None,
            notes: None,
            actor,
        }
    }

    /// Attach a subscription/event reference
    #[must_use]
    pub const fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Attach a reason code
    #[must_use]
    pub const fn with_reason(mut self, reason: ReasonCode) -> Self {
        self.reason_code = Some(reason);
        self
    }

    /// Attach notes
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Category derived from the movement type
    #[must_use]
    pub const fn category(&self) -> MovementCategory {
        self.movement_type.category()
    }
}

/// A recorded, immutable ledger movement
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    /// Movement identifier
    pub id: MovementId,
    /// Item the movement applies to
    pub item_id: ItemId,
    /// Position in the item's history, starting at 1
    pub sequence: u64,
    /// Broad class (always `movement_type.category()`)
    pub category: MovementCategory,
    /// Specific kind
    pub movement_type: MovementType,
    /// Positive quantity
    pub quantity: Quantity,
    /// Subscription or event the movement belongs to
    pub reference: Option<Reference>,
    /// Why the movement happened
    pub reason_code: Option<ReasonCode>,
    /// Free-text notes
    pub notes: Option<String>,
    /// Who recorded it
    pub actor: UserId,
    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
}

impl Movement {
    /// Stable, versioned event type name for persistence
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        "MovementRecorded.v1"
    }
}
