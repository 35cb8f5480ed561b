//! Property tests for the movement pipeline.
//!
//! Random movement scripts are folded through `record_movement`; refused
//! requests are skipped, accepted ones are kept as the log. Whatever the
//! script, the ledger invariants must hold after every step.

#![allow(clippy::unwrap_used)] // Test code uses unwrap for simplicity

use chrono::Duration;
use dishware_ledger_core::allocation::{Allocation, AllocationKey};
use dishware_ledger_core::environment::Clock;
use dishware_ledger_core::item::{InventoryItem, LifecycleStatus, NewItem};
use dishware_ledger_core::movement::{Movement, MovementCategory};
use dishware_ledger_core::pipeline::{MovementContext, record_movement};
use dishware_ledger_core::settings::LedgerSettings;
use dishware_ledger_core::stock::StockLevels;
use dishware_ledger_core::types::{ItemId, Role, UserId};
use dishware_ledger_testing::strategies::{Step, arb_steps, reference_pool};
use dishware_ledger_testing::test_clock;
use proptest::prelude::*;
use std::collections::BTreeMap;

struct Run {
    item: InventoryItem,
    log: Vec<Movement>,
    allocations: BTreeMap<AllocationKey, Allocation>,
    refusals: Vec<&'static str>,
}

fn active_item() -> InventoryItem {
    let mut item = InventoryItem::register(
        ItemId::new(),
        NewItem::named("Dinner plate").with_category("plates").with_outlet("central"),
        UserId::new(),
        test_clock().now(),
    )
    .unwrap();
    item.lifecycle_status = LifecycleStatus::Active;
    item
}

/// Fold `steps` through the pipeline, one minute apart, as `role`.
fn run(steps: &[Step], role: Role) -> Run {
    let settings = LedgerSettings::default();
    let actor = UserId::new();
    let pool = reference_pool();
    let mut state = Run {
        item: active_item(),
        log: Vec::new(),
        allocations: BTreeMap::new(),
        refusals: Vec::new(),
    };

    for (minute, step) in (0_i64..).zip(steps) {
        let request = step.request(state.item.id, actor, &pool);
        let key = request.reference.map(|reference| AllocationKey {
            item_id: state.item.id,
            reference,
        });
        let existing = key.and_then(|key| state.allocations.get(&key));
        let ctx = MovementContext {
            role: Some(role),
            now: test_clock().now() + Duration::minutes(minute),
            settings: &settings,
        };

        match record_movement(&state.item, existing, request, &ctx) {
            Ok(recorded) => {
                if let Some(allocation) = recorded.allocation {
                    state.allocations.insert(allocation.key(), allocation);
                }
                state.log.push(recorded.movement);
                state.item = recorded.item;
            }
            Err(error) => state.refusals.push(error.kind()),
        }
    }
    state
}

proptest! {
    #[test]
    fn prop_stock_stays_balanced(steps in arb_steps()) {
        let outcome = run(&steps, Role::Admin);
        let stock = outcome.item.stock;
        prop_assert!(stock.is_balanced());
        prop_assert_eq!(
            stock.total,
            stock.available + stock.allocated + stock.damaged + stock.in_repair
        );
    }

    #[test]
    fn prop_replay_reproduces_projection(steps in arb_steps()) {
        let outcome = run(&steps, Role::Admin);
        let replayed = StockLevels::replay(&outcome.log).unwrap();
        prop_assert_eq!(replayed, outcome.item.stock);
        prop_assert_eq!(outcome.item.movement_count, outcome.log.len() as u64);
    }

    #[test]
    fn prop_sequences_are_contiguous(steps in arb_steps()) {
        let outcome = run(&steps, Role::Staff);
        for (movement, expected) in outcome.log.iter().zip(1_u64..) {
            prop_assert_eq!(movement.sequence, expected);
        }
    }

    #[test]
    fn prop_allocations_conserve_quantity(steps in arb_steps()) {
        let outcome = run(&steps, Role::Admin);
        let mut outstanding = 0;
        for allocation in outcome.allocations.values() {
            prop_assert!(allocation.returned + allocation.damaged + allocation.lost <= allocation.original);
            prop_assert_eq!(allocation.is_open(), allocation.outstanding() > 0);
            outstanding += allocation.outstanding();
        }
        prop_assert_eq!(outstanding, outcome.item.stock.allocated);
    }

    #[test]
    fn prop_refusals_are_caller_errors(steps in arb_steps()) {
        let outcome = run(&steps, Role::Admin);
        for kind in outcome.refusals {
            prop_assert!(
                matches!(kind, "validation" | "insufficient_stock" | "conflict" | "over_return"),
                "unexpected refusal kind {}",
                kind
            );
        }
    }

    #[test]
    fn prop_staff_never_adjusts_a_locked_balance(steps in arb_steps()) {
        let outcome = run(&steps, Role::Staff);
        let mut locked = false;
        for movement in &outcome.log {
            if locked {
                prop_assert_ne!(
                    movement.category,
                    MovementCategory::Adjustment
                );
            }
            locked |= movement.category == MovementCategory::Outflow;
        }
    }
}
