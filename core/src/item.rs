//! Inventory items and their read-side snapshot.

use crate::error::{LedgerError, Result};
use crate::stock::StockLevels;
use crate::types::{ItemId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an inventory item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// Being set up; may receive opening stock
    Draft,
    /// In service
    Active,
    /// Being phased out; no new stock or allocations
    Discontinued,
    /// Terminal
    Archived,
}

impl LifecycleStatus {
    /// Database string representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Discontinued => "discontinued",
            Self::Archived => "archived",
        }
    }

    /// Parse from the database string representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "discontinued" => Some(Self::Discontinued),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive fields supplied when registering an item
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    /// Display name, required
    pub name: String,
    /// Category (plates, glasses, cutlery, ...)
    pub category: Option<String>,
    /// Material (porcelain, glass, steel, ...)
    pub material: Option<String>,
    /// Counting unit (piece, rack, set, ...)
    pub unit: Option<String>,
    /// Outlet/warehouse the item belongs to
    pub outlet: Option<String>,
}

impl NewItem {
    /// Item with just a name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the category
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the material
    #[must_use]
    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    /// Set the unit
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the outlet
    #[must_use]
    pub fn with_outlet(mut self, outlet: impl Into<String>) -> Self {
        self.outlet = Some(outlet.into());
        self
    }
}

/// An inventory item as held by the ledger.
///
/// Counters are only ever changed through movements; the history facts
/// (`movement_count`, `has_reference_history`, first/last movement time)
/// are what the lifecycle rules need without replaying the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Identifier
    pub id: ItemId,
    /// Display name
    pub name: String,
    /// Category
    pub category: Option<String>,
    /// Material
    pub material: Option<String>,
    /// Counting unit
    pub unit: Option<String>,
    /// Outlet/warehouse
    pub outlet: Option<String>,
    /// Lifecycle status
    pub lifecycle_status: LifecycleStatus,
    /// Set irreversibly by the first outflow (or the auto-confirm window)
    pub opening_balance_confirmed: bool,
    /// Projected counters
    pub stock: StockLevels,
    /// Number of movements recorded (also the last sequence number)
    pub movement_count: u64,
    /// Whether any movement ever referenced a subscription/event
    pub has_reference_history: bool,
    /// When the first movement was recorded
    pub first_movement_at: Option<DateTime<Utc>>,
    /// When the latest movement was recorded
    pub last_movement_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version, bumped on every commit
    pub version: u64,
    /// Who registered the item
    pub created_by: UserId,
    /// When the item was registered
    pub created_at: DateTime<Utc>,
    /// Set when the item was deleted
    pub deleted_at: Option<DateTime<Utc>>,
}

impl InventoryItem {
    /// Register a new draft item.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] if the name is blank.
    pub fn register(id: ItemId, input: NewItem, created_by: UserId, now: DateTime<Utc>) -> Result<Self> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("Item name cannot be empty"));
        }

        Ok(Self {
            id,
            name: name.to_string(),
            category: non_blank(input.category),
            material: non_blank(input.material),
            unit: non_blank(input.unit),
            outlet: non_blank(input.outlet),
            lifecycle_status: LifecycleStatus::Draft,
            opening_balance_confirmed: false,
            stock: StockLevels::empty(),
            movement_count: 0,
            has_reference_history: false,
            first_movement_at: None,
            last_movement_at: None,
            version: 0,
            created_by,
            created_at: now,
            deleted_at: None,
        })
    }

    /// Whether the opening balance is locked at `now`, counting the lazy
    /// auto-confirm window from the first movement.
    #[must_use]
    pub fn opening_balance_locked(&self, now: DateTime<Utc>, auto_confirm_days: u32) -> bool {
        self.opening_balance_confirmed
            || self
                .first_movement_at
                .is_some_and(|first| now - first >= Duration::days(i64::from(auto_confirm_days)))
    }

    /// Whether the item was deleted
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Read-side view of the item
    #[must_use]
    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            item_id: self.id,
            name: self.name.clone(),
            lifecycle_status: self.lifecycle_status,
            opening_balance_confirmed: self.opening_balance_confirmed,
            available: self.stock.available,
            allocated: self.stock.allocated,
            damaged: self.stock.damaged,
            in_repair: self.stock.in_repair,
            lost: self.stock.lost,
            total: self.stock.total,
            movement_count: self.movement_count,
            version: self.version,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Flattened state of an item returned to callers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    /// Identifier
    pub item_id: ItemId,
    /// Display name
    pub name: String,
    /// Lifecycle status
    pub lifecycle_status: LifecycleStatus,
    /// Opening balance lock flag
    pub opening_balance_confirmed: bool,
    /// Available counter
    pub available: u64,
    /// Allocated counter
    pub allocated: u64,
    /// Damaged counter
    pub damaged: u64,
    /// In-repair counter
    pub in_repair: u64,
    /// Cumulative losses
    pub lost: u64,
    /// Owned stock
    pub total: u64,
    /// Number of recorded movements
    pub movement_count: u64,
    /// Concurrency version
    pub version: u64,
}
