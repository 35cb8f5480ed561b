//! # Dishware Ledger Core
//!
//! Pure domain model for a rental dishware inventory ledger.
//!
//! Every change to stock is an immutable [`movement::Movement`] appended to a
//! per-item log. Current stock is a projection of that log
//! ([`stock::StockLevels`]), items move through a lifecycle state machine
//! ([`lifecycle`]), outflows to subscriptions and events are tracked as
//! [`allocation::Allocation`]s, and physical counts are reconciled through
//! [`reconciliation::AuditSession`]s.
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell: nothing in this crate performs I/O.
//!   The runtime crate loads state through [`ledger_store::LedgerStore`],
//!   runs [`pipeline::record_movement`], and commits the result atomically.
//! - Dependency Injection: time ([`environment::Clock`]) and roles
//!   ([`environment::RoleDirectory`]) are injected.
//! - Single policy table: every role check goes through [`policy::Policy`].
//!
//! ## Invariants
//!
//! - `total == available + allocated + damaged + in_repair`
//! - no counter is ever negative
//! - replaying an item's movements reproduces its counters
//! - an allocation's outstanding quantity is never negative
//!
//! ## Example
//!
//! ```
//! use dishware_ledger_core::item::{InventoryItem, LifecycleStatus, NewItem};
//! use dishware_ledger_core::movement::{MovementType, NewMovement};
//! use dishware_ledger_core::pipeline::{record_movement, MovementContext};
//! use dishware_ledger_core::settings::LedgerSettings;
//! use dishware_ledger_core::types::{ItemId, Role, UserId};
//! use chrono::Utc;
//!
//! # fn main() -> dishware_ledger_core::Result<()> {
//! let clerk = UserId::new();
//! let mut item = InventoryItem::register(ItemId::new(), NewItem::named("Dinner plate"), clerk, Utc::now())?;
//! item.lifecycle_status = LifecycleStatus::Active;
//!
//! let settings = LedgerSettings::default();
//! let ctx = MovementContext { role: Some(Role::Staff), now: Utc::now(), settings: &settings };
//! let recorded = record_movement(
//!     &item,
//!     None,
//!     NewMovement::new(item.id, MovementType::OpeningStock, 100, clerk),
//!     &ctx,
//! )?;
//! assert_eq!(recorded.item.stock.available, 100);
//! assert!(recorded.item.stock.is_balanced());
//! # Ok(())
//! # }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod allocation;
pub mod environment;
pub mod error;
pub mod item;
pub mod ledger_store;
pub mod lifecycle;
pub mod movement;
pub mod pipeline;
pub mod policy;
pub mod reconciliation;
pub mod settings;
pub mod stock;
pub mod types;

pub use error::{LedgerError, Result};
