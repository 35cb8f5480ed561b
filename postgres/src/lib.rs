//! `PostgreSQL` ledger store for the dishware inventory ledger.
//!
//! This crate provides [`PostgresLedgerStore`], an implementation of the
//! `LedgerStore` trait from `dishware-ledger-core`. It supports:
//!
//! - Atomic commits of movement + counters + allocation in one transaction
//! - Row-level locking (`SELECT ... FOR UPDATE`) and optimistic versions
//! - An append-only movement table (updates and deletes are refused by a
//!   trigger)
//! - CHECK constraints mirroring the stock balance invariant
//! - Connection pooling
//!
//! # Example
//!
//! ```ignore
//! use dishware_ledger_postgres::PostgresLedgerStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresLedgerStore::new("postgres://localhost/ledger").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod store;

pub use store::PostgresLedgerStore;
