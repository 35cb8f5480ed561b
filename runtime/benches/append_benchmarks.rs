//! Ledger append benchmarks
//!
//! - Pipeline: validation + projection + allocation tracking, no I/O
//! - Service append: lock + load + pipeline + commit against the in-memory store
//! - Replay verification of a long movement log
//!
//! Run with: `cargo bench -p dishware-ledger-runtime`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use dishware_ledger_core::environment::Clock;
use dishware_ledger_core::item::{InventoryItem, LifecycleStatus, NewItem};
use dishware_ledger_core::lifecycle::LifecycleTarget;
use dishware_ledger_core::movement::{MovementType, NewMovement};
use dishware_ledger_core::pipeline::{MovementContext, record_movement};
use dishware_ledger_core::settings::LedgerSettings;
use dishware_ledger_core::types::{ItemId, Reference, Role, UserId};
use dishware_ledger_runtime::LedgerService;
use dishware_ledger_testing::{InMemoryLedgerStore, StaticRoleDirectory, test_clock};
use std::sync::Arc;
use uuid::Uuid;

fn stocked_item(available: u64) -> InventoryItem {
    let mut item = InventoryItem::register(
        ItemId::new(),
        NewItem::named("Bench plate").with_category("plates").with_outlet("central"),
        UserId::new(),
        test_clock().now(),
    )
    .expect("valid item");
    item.lifecycle_status = LifecycleStatus::Active;
    item.stock.available = available;
    item.stock.total = available;
    item
}

/// Benchmark the pure pipeline in isolation
fn benchmark_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(1));

    let settings = LedgerSettings::default();
    let ctx = MovementContext {
        role: Some(Role::Staff),
        now: test_clock().now(),
        settings: &settings,
    };
    let item = stocked_item(1_000_000);
    let actor = UserId::new();

    group.bench_function("purchase", |b| {
        b.iter(|| {
            let request = NewMovement::new(item.id, MovementType::Purchase, 10, actor);
            let _ = record_movement(black_box(&item), None, request, &ctx);
        });
    });

    group.bench_function("allocation", |b| {
        b.iter(|| {
            let request = NewMovement::new(item.id, MovementType::Allocation, 10, actor)
                .with_reference(Reference::subscription(Uuid::new_v4()));
            let _ = record_movement(black_box(&item), None, request, &ctx);
        });
    });

    group.finish();
}

async fn service_with_item() -> (LedgerService, ItemId, UserId) {
    let roles = StaticRoleDirectory::new();
    let staff = roles.add(Role::Staff);
    let manager = roles.add(Role::Manager);
    let service = LedgerService::new(
        Arc::new(InMemoryLedgerStore::new()),
        Arc::new(test_clock()),
        Arc::new(roles),
        LedgerSettings::default(),
    );
    let item = service
        .create_item(
            NewItem::named("Bench glass").with_category("glassware").with_outlet("central"),
            staff,
        )
        .await
        .expect("item created");
    service
        .append_movement(NewMovement::new(item.item_id, MovementType::OpeningStock, 1_000_000, staff))
        .await
        .expect("opening stock");
    service
        .transition_lifecycle(item.item_id, LifecycleTarget::Active, manager)
        .await
        .expect("activated");
    (service, item.item_id, staff)
}

/// Benchmark appends through the service (locking + in-memory commit)
fn benchmark_service_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("service_append");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");
    let (service, item_id, staff) = runtime.block_on(service_with_item());

    group.bench_function("purchase", |b| {
        b.to_async(&runtime).iter(|| async {
            let request = NewMovement::new(item_id, MovementType::Purchase, 1, staff);
            let _ = service.append_movement(black_box(request)).await;
        });
    });

    group.finish();
}

/// Benchmark replay verification over 1,000 movements
fn benchmark_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify_item");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");
    let (service, item_id) = runtime.block_on(async {
        let (service, item_id, staff) = service_with_item().await;
        for _ in 0..999 {
            service
                .append_movement(NewMovement::new(item_id, MovementType::Purchase, 1, staff))
                .await
                .expect("purchase");
        }
        (service, item_id)
    });

    group.throughput(Throughput::Elements(1_000));
    group.bench_function("replay_1000", |b| {
        b.to_async(&runtime).iter(|| async {
            let _ = service.verify_item(black_box(item_id)).await;
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_pipeline, benchmark_service_append, benchmark_verify);
criterion_main!(benches);
