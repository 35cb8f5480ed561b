//! End-to-end ledger scenarios through [`LedgerService`] over the in-memory
//! store.

#![allow(clippy::unwrap_used)] // Test code uses unwrap for simplicity

use chrono::Duration;
use dishware_ledger_core::LedgerError;
use dishware_ledger_core::ledger_store::{LedgerStore, LedgerStoreError};
use dishware_ledger_core::lifecycle::LifecycleTarget;
use dishware_ledger_core::item::{LifecycleStatus, NewItem};
use dishware_ledger_core::movement::{MovementType, NewMovement, ReasonCode};
use dishware_ledger_core::reconciliation::AuditStatus;
use dishware_ledger_core::settings::LedgerSettings;
use dishware_ledger_core::types::{ItemId, Reference, Role, UserId};
use dishware_ledger_runtime::{LedgerService, ReferenceStatus, ReferenceStatusChanged};
use dishware_ledger_testing::{InMemoryLedgerStore, ManualClock, StaticRoleDirectory, init_test_tracing};
use std::sync::Arc;
use uuid::Uuid;

struct Ledger {
    service: Arc<LedgerService>,
    store: InMemoryLedgerStore,
    clock: ManualClock,
    staff: UserId,
    manager: UserId,
    admin: UserId,
}

fn ledger() -> Ledger {
    init_test_tracing();
    let store = InMemoryLedgerStore::new();
    let clock = ManualClock::starting_at_test_epoch();
    let roles = StaticRoleDirectory::new();
    let staff = roles.add(Role::Staff);
    let manager = roles.add(Role::Manager);
    let admin = roles.add(Role::Admin);
    let service = LedgerService::new(
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        Arc::new(roles),
        LedgerSettings::default(),
    );
    Ledger {
        service: Arc::new(service),
        store,
        clock,
        staff,
        manager,
        admin,
    }
}

impl Ledger {
    /// Register an item, record its opening stock and activate it
    async fn stocked_item(&self, opening: i64) -> ItemId {
        let item = self
            .service
            .create_item(
                NewItem::named("Wine glass").with_category("glassware").with_outlet("central"),
                self.staff,
            )
            .await
            .unwrap();
        self.append(item.item_id, MovementType::OpeningStock, opening, None)
            .await
            .unwrap();
        self.service
            .transition_lifecycle(item.item_id, LifecycleTarget::Active, self.manager)
            .await
            .unwrap();
        item.item_id
    }

    async fn append(
        &self,
        item_id: ItemId,
        movement_type: MovementType,
        quantity: i64,
        reference: Option<Reference>,
    ) -> Result<(), LedgerError> {
        let mut request = NewMovement::new(item_id, movement_type, quantity, self.staff);
        request.reference = reference;
        if movement_type.requires_reason() {
            request.reason_code = Some(ReasonCode::Misplaced);
        }
        self.service.append_movement(request).await.map(|_| ())
    }
}

fn subscription() -> Reference {
    Reference::subscription(Uuid::new_v4())
}

#[tokio::test]
async fn allocation_beyond_available_is_refused() {
    let ledger = ledger();
    let item = ledger.stocked_item(100).await;
    let (s1, s2) = (subscription(), subscription());

    ledger.append(item, MovementType::Allocation, 30, Some(s1)).await.unwrap();
    let state = ledger.service.item_state(item).await.unwrap();
    assert_eq!((state.available, state.allocated, state.total), (70, 30, 100));

    let err = ledger.append(item, MovementType::Allocation, 80, Some(s2)).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientStock {
            requested: 80,
            available: 70,
            ..
        }
    ));
    assert_eq!(ledger.service.item_state(item).await.unwrap().movement_count, 2);
    assert_eq!(ledger.service.allocation(item, s2).await.unwrap(), None);
}

#[tokio::test]
async fn discontinue_is_blocked_while_stock_is_allocated() {
    let ledger = ledger();
    let item = ledger.stocked_item(40).await;
    let s1 = subscription();
    ledger.append(item, MovementType::Allocation, 10, Some(s1)).await.unwrap();

    let err = ledger
        .service
        .transition_lifecycle(item, LifecycleTarget::Discontinued, ledger.manager)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::State(_)));
    let state = ledger.service.item_state(item).await.unwrap();
    assert_eq!(state.lifecycle_status, LifecycleStatus::Active);
    assert_eq!(state.allocated, 10);

    ledger.append(item, MovementType::ReturnGood, 10, Some(s1)).await.unwrap();
    ledger
        .service
        .transition_lifecycle(item, LifecycleTarget::Discontinued, ledger.manager)
        .await
        .unwrap();
    assert_eq!(
        ledger.service.item_state(item).await.unwrap().lifecycle_status,
        LifecycleStatus::Discontinued
    );
}

#[tokio::test]
async fn returns_settle_and_close_the_allocation() {
    let ledger = ledger();
    let item = ledger.stocked_item(50).await;
    let s1 = subscription();

    ledger.append(item, MovementType::Allocation, 20, Some(s1)).await.unwrap();
    ledger.append(item, MovementType::ReturnGood, 15, Some(s1)).await.unwrap();
    ledger.append(item, MovementType::ReturnDamaged, 3, Some(s1)).await.unwrap();

    let err = ledger.append(item, MovementType::ReturnGood, 5, Some(s1)).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::OverReturn {
            requested: 5,
            outstanding: 2
        }
    ));

    ledger.append(item, MovementType::Loss, 2, Some(s1)).await.unwrap();
    let allocation = ledger.service.allocation(item, s1).await.unwrap().unwrap();
    assert!(!allocation.is_open());
    assert_eq!((allocation.returned, allocation.damaged, allocation.lost), (15, 3, 2));

    let state = ledger.service.item_state(item).await.unwrap();
    assert_eq!(
        (state.available, state.allocated, state.damaged, state.lost, state.total),
        (45, 0, 3, 2, 48)
    );
}

#[tokio::test]
async fn cancelling_a_reference_blocks_while_items_are_out() {
    let ledger = ledger();
    let plates = ledger.stocked_item(40).await;
    let glasses = ledger.stocked_item(40).await;
    let event = Reference::event(Uuid::new_v4());

    ledger.append(plates, MovementType::Allocation, 10, Some(event)).await.unwrap();
    ledger.append(glasses, MovementType::Allocation, 5, Some(event)).await.unwrap();
    ledger.append(plates, MovementType::ReturnGood, 10, Some(event)).await.unwrap();

    let err = ledger.service.cancel_reference(event, ledger.manager).await.unwrap_err();
    assert!(matches!(err, LedgerError::State(_)));
    assert!(ledger.service.allocation(glasses, event).await.unwrap().unwrap().is_open());

    ledger.append(glasses, MovementType::ReturnGood, 5, Some(event)).await.unwrap();
    let closed = ledger
        .service
        .on_reference_status_changed(ReferenceStatusChanged {
            reference: event,
            status: ReferenceStatus::Cancelled,
            changed_by: ledger.manager,
        })
        .await
        .unwrap();
    assert_eq!(closed.len(), 2);

    let marked = ledger.service.allocations(plates).await.unwrap();
    assert!(marked.iter().all(|allocation| allocation.closed_by_parent));
    ledger.service.verify_item(plates).await.unwrap();

    let again = ledger.service.cancel_reference(event, ledger.manager).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn cancelling_a_reference_needs_a_manager() {
    let ledger = ledger();
    let err = ledger
        .service
        .cancel_reference(subscription(), ledger.staff)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Authorization { .. }));
}

#[tokio::test]
async fn items_with_reference_history_cannot_be_deleted() {
    let ledger = ledger();
    let item = ledger.stocked_item(10).await;
    let s1 = subscription();
    ledger.append(item, MovementType::Allocation, 10, Some(s1)).await.unwrap();
    ledger.append(item, MovementType::Loss, 10, Some(s1)).await.unwrap();
    assert_eq!(ledger.service.item_state(item).await.unwrap().total, 0);

    let err = ledger
        .service
        .transition_lifecycle(item, LifecycleTarget::Deleted, ledger.admin)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::State(_)));
}

#[tokio::test]
async fn draft_items_without_movements_can_be_deleted() {
    let ledger = ledger();
    let item = ledger
        .service
        .create_item(NewItem::named("Saucer"), ledger.staff)
        .await
        .unwrap();

    ledger
        .service
        .transition_lifecycle(item.item_id, LifecycleTarget::Deleted, ledger.manager)
        .await
        .unwrap();
    assert!(matches!(
        ledger.service.item_state(item.item_id).await,
        Err(LedgerError::NotFound(_))
    ));
    assert!(ledger.service.list_items().await.unwrap().is_empty());
    assert!(ledger.service.movements(item.item_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn activation_requires_category_and_outlet() {
    let ledger = ledger();
    let item = ledger
        .service
        .create_item(NewItem::named("Ramekin").with_category("bowls"), ledger.staff)
        .await
        .unwrap();

    let err = ledger
        .service
        .transition_lifecycle(item.item_id, LifecycleTarget::Active, ledger.manager)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::State(message) if message.contains("outlet")));
}

#[tokio::test]
async fn opening_balance_locks_after_the_window() {
    let ledger = ledger();
    let item = ledger.stocked_item(25).await;
    assert!(!ledger.service.item_state(item).await.unwrap().opening_balance_confirmed);

    ledger.clock.advance(Duration::days(7));
    assert!(ledger.service.item_state(item).await.unwrap().opening_balance_confirmed);

    let err = ledger.append(item, MovementType::OpeningStock, 5, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let adjust = NewMovement::new(item, MovementType::AdjustmentNegative, 2, ledger.staff)
        .with_reason(ReasonCode::CountCorrection);
    let err = ledger.service.append_movement(adjust.clone()).await.unwrap_err();
    assert!(matches!(err, LedgerError::Authorization { .. }));

    let mut as_admin = adjust;
    as_admin.actor = ledger.admin;
    ledger.service.append_movement(as_admin).await.unwrap();
    assert_eq!(ledger.service.item_state(item).await.unwrap().total, 23);
}

#[tokio::test]
async fn audit_shortfall_waits_for_admin_approval() {
    let ledger = ledger();
    let item = ledger.stocked_item(100).await;
    ledger.append(item, MovementType::Allocation, 10, Some(subscription())).await.unwrap();

    let session = ledger.service.create_audit_session(&[item], ledger.staff).await.unwrap();
    let session = ledger.service.start_counting(session.id, ledger.staff).await.unwrap();
    assert_eq!(session.lines[0].system_quantity, 90);

    ledger
        .service
        .record_count(session.id, item, 85, Some(ReasonCode::Breakage), None, ledger.staff)
        .await
        .unwrap();
    let reviewed = ledger.service.submit_for_review(session.id, ledger.staff).await.unwrap();
    assert_eq!(reviewed.status, AuditStatus::PendingApproval);
    assert_eq!(ledger.service.item_state(item).await.unwrap().available, 90);

    let err = ledger.service.approve_audit(session.id, ledger.manager).await.unwrap_err();
    assert!(matches!(err, LedgerError::Authorization { .. }));

    let approved = ledger.service.approve_audit(session.id, ledger.admin).await.unwrap();
    assert_eq!(approved.status, AuditStatus::Approved);

    let movements = ledger.service.movements(item).await.unwrap();
    let adjustment = movements.last().unwrap();
    assert_eq!(adjustment.movement_type, MovementType::AdjustmentNegative);
    assert_eq!(adjustment.quantity.get(), 5);
    assert_eq!(adjustment.reason_code, Some(ReasonCode::Breakage));
    assert_eq!(ledger.service.item_state(item).await.unwrap().available, 85);

    let closed = ledger.service.close_audit(session.id, ledger.staff).await.unwrap();
    assert_eq!(closed.status, AuditStatus::Closed);
}

#[tokio::test]
async fn small_surplus_is_auto_approved() {
    let ledger = ledger();
    let item = ledger.stocked_item(100).await;

    let session = ledger.service.create_audit_session(&[item], ledger.staff).await.unwrap();
    ledger.service.start_counting(session.id, ledger.staff).await.unwrap();
    ledger
        .service
        .record_count(session.id, item, 103, Some(ReasonCode::Found), None, ledger.staff)
        .await
        .unwrap();

    let routed = ledger.service.submit_for_review(session.id, ledger.staff).await.unwrap();
    assert_eq!(routed.status, AuditStatus::AutoApproved);
    assert_eq!(ledger.service.item_state(item).await.unwrap().total, 103);
}

#[tokio::test]
async fn failed_approval_commits_nothing() {
    let ledger = ledger();
    let plates = ledger.stocked_item(60).await;
    let glasses = ledger.stocked_item(60).await;

    let session = ledger
        .service
        .create_audit_session(&[plates, glasses], ledger.staff)
        .await
        .unwrap();
    ledger.service.start_counting(session.id, ledger.staff).await.unwrap();
    for item in [plates, glasses] {
        ledger
            .service
            .record_count(session.id, item, 40, Some(ReasonCode::Misplaced), None, ledger.staff)
            .await
            .unwrap();
    }
    ledger.service.submit_for_review(session.id, ledger.staff).await.unwrap();

    let before = ledger.store.movement_count();
    ledger
        .store
        .fail_next_commit(LedgerStoreError::DatabaseError("connection reset".into()));
    let err = ledger.service.approve_audit(session.id, ledger.admin).await.unwrap_err();
    assert!(matches!(err, LedgerError::Store(_)));

    assert_eq!(ledger.store.movement_count(), before);
    let session = ledger.service.audit_session(session.id).await.unwrap();
    assert_eq!(session.status, AuditStatus::PendingApproval);

    ledger.service.approve_audit(session.id, ledger.admin).await.unwrap();
    assert_eq!(ledger.store.movement_count(), before + 2);
}

#[tokio::test]
async fn rejected_audit_emits_nothing() {
    let ledger = ledger();
    let item = ledger.stocked_item(30).await;
    let session = ledger.service.create_audit_session(&[item], ledger.staff).await.unwrap();
    ledger.service.start_counting(session.id, ledger.staff).await.unwrap();
    ledger
        .service
        .record_count(session.id, item, 10, Some(ReasonCode::Theft), None, ledger.staff)
        .await
        .unwrap();
    ledger.service.submit_for_review(session.id, ledger.staff).await.unwrap();

    let rejected = ledger
        .service
        .reject_audit(session.id, Some("Recount the back room".into()), ledger.admin)
        .await
        .unwrap();
    assert_eq!(rejected.status, AuditStatus::Rejected);
    assert_eq!(ledger.service.item_state(item).await.unwrap().total, 30);
}

#[tokio::test]
async fn concurrent_allocations_never_oversell() {
    let ledger = ledger();
    let item = ledger.stocked_item(100).await;

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let service = Arc::clone(&ledger.service);
            let staff = ledger.staff;
            tokio::spawn(async move {
                let request = NewMovement::new(item, MovementType::Allocation, 10, staff).with_reference(subscription());
                service.append_movement(request).await
            })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(error) => assert!(matches!(error, LedgerError::InsufficientStock { .. })),
        }
    }

    assert_eq!(accepted, 10);
    let state = ledger.service.item_state(item).await.unwrap();
    assert_eq!((state.available, state.allocated), (0, 100));
    let report = ledger.service.verify_item(item).await.unwrap();
    assert_eq!(report.movements, 11);
    assert_eq!(report.allocations, 10);
}

#[tokio::test]
async fn verify_detects_a_corrupted_projection() {
    let ledger = ledger();
    let item = ledger.stocked_item(12).await;
    ledger.service.verify_item(item).await.unwrap();

    let mut corrupted = ledger.store.load_item(item).await.unwrap().unwrap();
    corrupted.stock.available += 1;
    corrupted.stock.total += 1;
    ledger.store.overwrite_item(corrupted);

    let err = ledger.service.verify_item(item).await.unwrap_err();
    assert!(matches!(err, LedgerError::ReplayMismatch { .. }));
    assert!(!err.is_caller_recoverable());
}

#[tokio::test]
async fn archived_items_refuse_everything() {
    let ledger = ledger();
    let item = ledger.stocked_item(4).await;
    let breakage = |n| {
        NewMovement::new(item, MovementType::DamageWarehouse, n, ledger.staff).with_reason(ReasonCode::Breakage)
    };
    ledger.service.append_movement(breakage(4)).await.unwrap();
    ledger
        .service
        .append_movement(
            NewMovement::new(item, MovementType::Disposal, 4, ledger.staff).with_reason(ReasonCode::WornOut),
        )
        .await
        .unwrap();
    ledger
        .service
        .transition_lifecycle(item, LifecycleTarget::Discontinued, ledger.manager)
        .await
        .unwrap();

    let err = ledger
        .service
        .transition_lifecycle(item, LifecycleTarget::Archived, ledger.admin)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::State(message) if message.contains("within")));

    ledger.clock.advance(Duration::days(366));
    let archived = ledger
        .service
        .transition_lifecycle(item, LifecycleTarget::Archived, ledger.admin)
        .await
        .unwrap();
    assert_eq!(archived.lifecycle_status, LifecycleStatus::Archived);

    let err = ledger.service.append_movement(breakage(1)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
    let err = ledger
        .service
        .transition_lifecycle(item, LifecycleTarget::Active, ledger.admin)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::State(_)));
}
