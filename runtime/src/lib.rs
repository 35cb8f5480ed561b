//! # Dishware Ledger Runtime
//!
//! Imperative shell around `dishware_ledger_core`.
//!
//! ## Core Components
//!
//! - **`LedgerService`**: the boundary surface. Appends movements, answers
//!   stock and allocation queries, drives lifecycle transitions, closes
//!   allocations of cancelled/completed subscriptions and events, and runs
//!   physical audit sessions.
//! - **Lock table**: single writer per item for the whole
//!   load → validate → commit sequence.
//! - **Config / metrics**: environment-based configuration and Prometheus
//!   metrics.
//!
//! ## Example
//!
//! ```ignore
//! use dishware_ledger_runtime::LedgerService;
//!
//! let service = LedgerService::new(store, clock, roles, config.ledger);
//!
//! let item = service.create_item(NewItem::named("Dinner plate"), manager).await?;
//! service.append_movement(NewMovement::new(item.item_id, MovementType::OpeningStock, 100, clerk)).await?;
//!
//! let state = service.item_state(item.item_id).await?;
//! assert_eq!(state.available, 100);
//! ```

/// Reconciliation workflow operations on [`LedgerService`]
pub mod audit;

/// Environment-based configuration
pub mod config;

/// Per-item single-writer locks
pub mod locks;

/// Prometheus metrics for observability
pub mod metrics;

/// The ledger boundary service
pub mod service;

pub use config::Config;
pub use service::{LedgerService, ReferenceStatus, ReferenceStatusChanged, ReplayReport};
