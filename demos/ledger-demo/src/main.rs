//! Dishware ledger walkthrough
//!
//! Registers a couple of items, allocates them to an event, settles the
//! returns, closes the event, and runs a physical audit. Uses the in-memory
//! store unless `--postgres` is given, in which case `DATABASE_URL` is used.
//!
//! Run with: `cargo run -p ledger-demo [-- --postgres]`

use dishware_ledger_core::environment::SystemClock;
use dishware_ledger_core::item::NewItem;
use dishware_ledger_core::ledger_store::LedgerStore;
use dishware_ledger_core::lifecycle::LifecycleTarget;
use dishware_ledger_core::movement::{MovementType, NewMovement, ReasonCode};
use dishware_ledger_core::types::{ItemId, Reference, Role, UserId};
use dishware_ledger_postgres::PostgresLedgerStore;
use dishware_ledger_runtime::metrics::MetricsRecorder;
use dishware_ledger_runtime::{Config, LedgerService, ReferenceStatus, ReferenceStatusChanged};
use dishware_ledger_testing::{InMemoryLedgerStore, StaticRoleDirectory};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

struct Staff {
    clerk: UserId,
    manager: UserId,
    admin: UserId,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let recorder = if config.metrics_enabled {
        Some(MetricsRecorder::install()?)
    } else {
        None
    };

    let store: Arc<dyn LedgerStore> = if std::env::args().any(|arg| arg == "--postgres") {
        let store = PostgresLedgerStore::connect(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
            Duration::from_secs(config.database.connect_timeout),
        )
        .await?;
        store.migrate().await?;
        info!("Using PostgreSQL ledger store");
        Arc::new(store)
    } else {
        info!("Using in-memory ledger store");
        Arc::new(InMemoryLedgerStore::new())
    };

    let roles = StaticRoleDirectory::new();
    let staff = Staff {
        clerk: roles.add(Role::Staff),
        manager: roles.add(Role::Manager),
        admin: roles.add(Role::Admin),
    };
    let ledger = LedgerService::new(store, Arc::new(SystemClock), Arc::new(roles), config.ledger);

    let plates = register(&ledger, &staff, "Dinner plate 27cm", "plates", 200).await?;
    let glasses = register(&ledger, &staff, "Wine glass 35cl", "glassware", 120).await?;

    let wedding = Reference::event(Uuid::new_v4());
    event_round_trip(&ledger, &staff, wedding, plates, glasses).await?;
    physical_audit(&ledger, &staff, glasses).await?;

    for item in ledger.list_items().await? {
        info!(
            name = %item.name,
            available = item.available,
            damaged = item.damaged,
            lost = item.lost,
            total = item.total,
            "Final stock"
        );
        let report = ledger.verify_item(item.item_id).await?;
        info!(movements = report.movements, allocations = report.allocations, "Replay verified");
    }

    if let Some(text) = recorder.as_ref().and_then(MetricsRecorder::render) {
        println!("{text}");
    }
    Ok(())
}

async fn register(
    ledger: &LedgerService,
    staff: &Staff,
    name: &str,
    category: &str,
    opening: i64,
) -> Result<ItemId, Box<dyn std::error::Error>> {
    let item = ledger
        .create_item(
            NewItem::named(name).with_category(category).with_outlet("central warehouse"),
            staff.clerk,
        )
        .await?;
    ledger
        .append_movement(
            NewMovement::new(item.item_id, MovementType::OpeningStock, opening, staff.clerk)
                .with_reason(ReasonCode::OpeningCount),
        )
        .await?;
    ledger
        .transition_lifecycle(item.item_id, LifecycleTarget::Active, staff.manager)
        .await?;
    info!(item_id = %item.item_id, name, opening, "Item ready");
    Ok(item.item_id)
}

async fn event_round_trip(
    ledger: &LedgerService,
    staff: &Staff,
    event: Reference,
    plates: ItemId,
    glasses: ItemId,
) -> Result<(), Box<dyn std::error::Error>> {
    let out = |item, movement_type, quantity| {
        NewMovement::new(item, movement_type, quantity, staff.clerk).with_reference(event)
    };

    ledger.append_movement(out(plates, MovementType::Allocation, 150)).await?;
    ledger.append_movement(out(glasses, MovementType::Allocation, 100)).await?;

    // More plates than the warehouse holds.
    if let Err(error) = ledger
        .append_movement(out(plates, MovementType::Allocation, 80).with_notes("second drop"))
        .await
    {
        warn!(%error, "Second allocation refused as expected");
    }

    ledger.append_movement(out(plates, MovementType::ReturnGood, 146)).await?;
    ledger
        .append_movement(out(plates, MovementType::ReturnDamaged, 4).with_notes("Chipped in transit"))
        .await?;
    ledger.append_movement(out(glasses, MovementType::ReturnGood, 93)).await?;

    // Closing the event is blocked while glasses are still out.
    let change = ReferenceStatusChanged {
        reference: event,
        status: ReferenceStatus::Completed,
        changed_by: staff.manager,
    };
    if let Err(error) = ledger.on_reference_status_changed(change).await {
        warn!(%error, "Event cannot close yet");
    }

    ledger
        .append_movement(out(glasses, MovementType::DamageClient, 5).with_reason(ReasonCode::CustomerDamage))
        .await?;
    ledger
        .append_movement(out(glasses, MovementType::Loss, 2).with_reason(ReasonCode::Misplaced))
        .await?;

    let closed = ledger.on_reference_status_changed(change).await?;
    info!(reference = %event, allocations = closed.len(), "Event closed");
    Ok(())
}

async fn physical_audit(
    ledger: &LedgerService,
    staff: &Staff,
    glasses: ItemId,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = ledger.create_audit_session(&[glasses], staff.clerk).await?;
    let session = ledger.start_counting(session.id, staff.clerk).await?;
    let book = session.lines[0].system_quantity;

    let physical = i64::try_from(book)? - 3;
    ledger
        .record_count(
            session.id,
            glasses,
            physical,
            Some(ReasonCode::Breakage),
            Some("Three broken in the racks".to_string()),
            staff.clerk,
        )
        .await?;

    let reviewed = ledger.submit_for_review(session.id, staff.clerk).await?;
    info!(status = %reviewed.status, "Audit submitted");

    let approved = ledger.approve_audit(session.id, staff.admin).await?;
    let closed = ledger.close_audit(approved.id, staff.admin).await?;
    info!(status = %closed.status, "Audit closed");
    Ok(())
}
