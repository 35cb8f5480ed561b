//! Ergonomic testing utilities for the movement pipeline
//!
//! This module provides a fluent API for testing
//! [`record_movement`](dishware_ledger_core::pipeline::record_movement) with
//! readable Given-When-Then syntax, without a store or a runtime.

#![allow(clippy::module_name_repetitions)] // MovementTest is the natural name

use crate::mocks::test_clock;
use chrono::{DateTime, Utc};
use dishware_ledger_core::allocation::Allocation;
use dishware_ledger_core::environment::Clock;
use dishware_ledger_core::item::InventoryItem;
use dishware_ledger_core::movement::NewMovement;
use dishware_ledger_core::pipeline::{MovementContext, RecordedMovement, record_movement};
use dishware_ledger_core::settings::LedgerSettings;
use dishware_ledger_core::types::Role;
use dishware_ledger_core::{LedgerError, Result};

/// Type alias for outcome assertion functions
type OutcomeAssertion = Box<dyn FnOnce(&Result<RecordedMovement>)>;

/// Fluent API for testing the movement pipeline with Given-When-Then syntax
///
/// # Example
///
/// ```ignore
/// use dishware_ledger_testing::MovementTest;
///
/// MovementTest::new()
///     .given_item(active_item_with(100))
///     .as_role(Role::Staff)
///     .when(NewMovement::new(item_id, MovementType::Allocation, 30, clerk).with_reference(s1))
///     .then_item(|item| assert_eq!(item.stock.allocated, 30))
///     .then_allocation(|allocation| assert_eq!(allocation.unwrap().outstanding(), 30))
///     .run();
/// ```
pub struct MovementTest {
    settings: LedgerSettings,
    now: DateTime<Utc>,
    role: Option<Role>,
    item: Option<InventoryItem>,
    allocation: Option<Allocation>,
    request: Option<NewMovement>,
    assertions: Vec<OutcomeAssertion>,
}

impl Default for MovementTest {
    fn default() -> Self {
        Self::new()
    }
}

impl MovementTest {
    /// Create a new test with default settings, the test clock and a staff actor
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: LedgerSettings::default(),
            now: test_clock().now(),
            role: Some(Role::Staff),
            item: None,
            allocation: None,
            request: None,
            assertions: Vec::new(),
        }
    }

    /// Use custom settings
    #[must_use]
    pub fn with_settings(mut self, settings: LedgerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Evaluate at `now`
    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Actor role (`None` for an unknown actor)
    #[must_use]
    pub const fn as_role(mut self, role: Option<Role>) -> Self {
        self.role = role;
        self
    }

    /// Set the current item (Given)
    #[must_use]
    pub fn given_item(mut self, item: InventoryItem) -> Self {
        self.item = Some(item);
        self
    }

    /// Set the stored allocation for the request's reference (Given)
    #[must_use]
    pub fn given_allocation(mut self, allocation: Allocation) -> Self {
        self.allocation = Some(allocation);
        self
    }

    /// Set the movement request (When)
    #[must_use]
    pub fn when(mut self, request: NewMovement) -> Self {
        self.request = Some(request);
        self
    }

    /// Assert on the updated item; fails if the movement was refused (Then)
    #[must_use]
    #[allow(clippy::panic)] // Test assertion
    pub fn then_item<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&InventoryItem) + 'static,
    {
        self.assertions.push(Box::new(move |outcome| match outcome {
            Ok(recorded) => assertion(&recorded.item),
            Err(error) => panic!("Expected the movement to be recorded, got {error}"),
        }));
        self
    }

    /// Assert on the allocation after tracking (Then)
    #[must_use]
    #[allow(clippy::panic)] // Test assertion
    pub fn then_allocation<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(Option<&Allocation>) + 'static,
    {
        self.assertions.push(Box::new(move |outcome| match outcome {
            Ok(recorded) => assertion(recorded.allocation.as_ref()),
            Err(error) => panic!("Expected the movement to be recorded, got {error}"),
        }));
        self
    }

    /// Assert that the movement was refused (Then)
    #[must_use]
    #[allow(clippy::panic)] // Test assertion
    pub fn then_error<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&LedgerError) + 'static,
    {
        self.assertions.push(Box::new(move |outcome| match outcome {
            Ok(recorded) => panic!("Expected the movement to be refused, got {:?}", recorded.movement),
            Err(error) => assertion(error),
        }));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if the item or the request is not set, or if any assertion fails.
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let item = self.item.expect("Item must be set with given_item()");
        let request = self.request.expect("Request must be set with when()");
        let ctx = MovementContext {
            role: self.role,
            now: self.now,
            settings: &self.settings,
        };

        let outcome = record_movement(&item, self.allocation.as_ref(), request, &ctx);
        for assertion in self.assertions {
            assertion(&outcome);
        }
    }
}

/// Helper assertions for ledger state
pub mod assertions {
    use dishware_ledger_core::item::InventoryItem;

    /// Assert the balance invariant and the four counters
    ///
    /// # Panics
    ///
    /// Panics if the item is unbalanced or a counter differs.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_stock(item: &InventoryItem, available: u64, allocated: u64, damaged: u64, in_repair: u64) {
        assert!(item.stock.is_balanced(), "Unbalanced stock: {:?}", item.stock);
        assert_eq!(
            (item.stock.available, item.stock.allocated, item.stock.damaged, item.stock.in_repair),
            (available, allocated, damaged, in_repair),
            "Unexpected counters: {:?}",
            item.stock
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dishware_ledger_core::item::{LifecycleStatus, NewItem};
    use dishware_ledger_core::movement::MovementType;
    use dishware_ledger_core::types::{ItemId, Reference, UserId};
    use uuid::Uuid;

    fn active_item(available: u64) -> InventoryItem {
        let mut item = InventoryItem::register(
            ItemId::from_uuid(Uuid::nil()),
            NewItem::named("Coupe").with_category("glassware").with_outlet("central"),
            UserId::new(),
            test_clock().now(),
        )
        .unwrap();
        item.lifecycle_status = LifecycleStatus::Active;
        item.stock.available = available;
        item.stock.total = available;
        item
    }

    #[test]
    fn test_allocation_moves_stock() {
        let item = active_item(100);
        let s1 = Reference::subscription(Uuid::new_v4());
        MovementTest::new()
            .when(NewMovement::new(item.id, MovementType::Allocation, 30, UserId::new()).with_reference(s1))
            .given_item(item)
            .then_item(|item| assertions::assert_stock(item, 70, 30, 0, 0))
            .then_allocation(|allocation| assert_eq!(allocation.map(Allocation::outstanding), Some(30)))
            .run();
    }

    #[test]
    fn test_unknown_actor_refused() {
        let item = active_item(10);
        MovementTest::new()
            .as_role(None)
            .when(NewMovement::new(item.id, MovementType::Purchase, 1, UserId::new()))
            .given_item(item)
            .then_error(|error| assert!(matches!(error, LedgerError::Authorization { .. })))
            .run();
    }
}
