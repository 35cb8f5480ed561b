//! Proptest strategies for ledger domain types.
//!
//! Strategies produce movement requests that are well-formed on their own
//! (positive quantities, references and reason codes where the movement type
//! needs them). Whether a request is admissible against the current stock is
//! left to the pipeline, which is what the properties exercise.
//!
//! # Usage
//!
//! ```no_run
//! use dishware_ledger_testing::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(steps in strategies::arb_steps()) {
//!         // fold the steps through the pipeline and check invariants
//!     }
//! }
//! ```

use dishware_ledger_core::movement::{MovementType, NewMovement, ReasonCode, ReferenceRule};
use dishware_ledger_core::types::{ItemId, Reference, UserId};
use proptest::prelude::*;
use uuid::Uuid;

/// Generates any of the fourteen movement types.
pub fn arb_movement_type() -> impl Strategy<Value = MovementType> {
    prop::sample::select(MovementType::ALL.to_vec())
}

/// Generates a reason code other than `other` (which would need notes).
pub fn arb_reason_code() -> impl Strategy<Value = ReasonCode> {
    prop::sample::select(
        ReasonCode::ALL
            .iter()
            .copied()
            .filter(|reason| *reason != ReasonCode::Other)
            .collect::<Vec<_>>(),
    )
}

/// One step of a generated scenario: a movement type, a quantity, and which
/// of a small pool of references to use.
#[derive(Clone, Debug)]
pub struct Step {
    /// Movement type
    pub movement_type: MovementType,
    /// Quantity, 1..=50
    pub quantity: i64,
    /// Index into the reference pool
    pub reference: usize,
    /// Whether an optional reference is attached
    pub attach_optional: bool,
    /// Reason code for types that require one
    pub reason: ReasonCode,
}

impl Step {
    /// Build the request for `item_id` using `pool` for references.
    #[must_use]
    pub fn request(&self, item_id: ItemId, actor: UserId, pool: &[Reference]) -> NewMovement {
        let mut request = NewMovement::new(item_id, self.movement_type, self.quantity, actor);
        let reference = pool.get(self.reference % pool.len().max(1)).copied();
        request.reference = match self.movement_type.reference_rule() {
            ReferenceRule::Required => reference,
            ReferenceRule::Optional if self.attach_optional => reference,
            ReferenceRule::Optional | ReferenceRule::Forbidden => None,
        };
        if self.movement_type.requires_reason() {
            request.reason_code = Some(self.reason);
        }
        request
    }
}

/// Generates a single step.
pub fn arb_step() -> impl Strategy<Value = Step> {
    (arb_movement_type(), 1i64..=50, 0usize..3, any::<bool>(), arb_reason_code()).prop_map(
        |(movement_type, quantity, reference, attach_optional, reason)| Step {
            movement_type,
            quantity,
            reference,
            attach_optional,
            reason,
        },
    )
}

/// Generates 1-60 steps, starting with an opening stock so that later
/// outflows have something to draw on.
pub fn arb_steps() -> impl Strategy<Value = Vec<Step>> {
    (1i64..=200, proptest::collection::vec(arb_step(), 1..60)).prop_map(|(opening, mut steps)| {
        steps.insert(
            0,
            Step {
                movement_type: MovementType::OpeningStock,
                quantity: opening,
                reference: 0,
                attach_optional: false,
                reason: ReasonCode::OpeningCount,
            },
        );
        steps
    })
}

/// A pool of three subscription/event references.
#[must_use]
pub fn reference_pool() -> Vec<Reference> {
    vec![
        Reference::subscription(Uuid::from_u128(1)),
        Reference::subscription(Uuid::from_u128(2)),
        Reference::event(Uuid::from_u128(3)),
    ]
}
