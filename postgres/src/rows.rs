//! Row decoding and integer conversions between the domain and `PostgreSQL`.
//!
//! Counters are `u64` in the domain and `BIGINT` in the database; the CHECK
//! constraints keep them non-negative, so a negative value here means the
//! row was tampered with and is reported as a serialization error.

use dishware_ledger_core::allocation::{Allocation, AllocationStatus};
use dishware_ledger_core::item::{InventoryItem, LifecycleStatus};
use dishware_ledger_core::ledger_store::LedgerStoreError;
use dishware_ledger_core::movement::{Movement, MovementType, Quantity, ReasonCode};
use dishware_ledger_core::reconciliation::{AuditSession, AuditStatus};
use dishware_ledger_core::stock::StockLevels;
use dishware_ledger_core::types::{AuditSessionId, ItemId, MovementId, Reference, ReferenceType, UserId};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

pub(crate) const ITEM_COLUMNS: &str = "item_id, name, category, material, unit, outlet, lifecycle_status, \
     opening_balance_confirmed, available, allocated, damaged, in_repair, lost, total, movement_count, \
     has_reference_history, first_movement_at, last_movement_at, version, created_by, created_at, deleted_at";

pub(crate) const MOVEMENT_COLUMNS: &str = "movement_id, item_id, sequence, movement_type, quantity, \
     reference_type, reference_id, reason_code, notes, actor, recorded_at";

pub(crate) const ALLOCATION_COLUMNS: &str = "item_id, reference_type, reference_id, original, returned, \
     damaged, lost, status, opened_at, closed_at, closed_by_parent";

pub(crate) const SESSION_COLUMNS: &str =
    "session_id, status, lines, created_by, submitted_by, decided_by, rejection_reason, created_at, updated_at";

/// Map a sqlx error, recognising unique violations
pub(crate) fn db_error(context: &str, error: &sqlx::Error) -> LedgerStoreError {
    if let Some(db) = error.as_database_error() {
        if db.code().as_deref() == Some("23505") {
            return LedgerStoreError::Duplicate(format!("{context}: {db}"));
        }
    }
    LedgerStoreError::DatabaseError(format!("{context}: {error}"))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, LedgerStoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| LedgerStoreError::SerializationError(format!("column {name}: {e}")))
}

pub(crate) fn to_db(value: u64) -> Result<i64, LedgerStoreError> {
    i64::try_from(value).map_err(|_| LedgerStoreError::SerializationError(format!("{value} exceeds BIGINT")))
}

fn counter(row: &PgRow, name: &str) -> Result<u64, LedgerStoreError> {
    let value: i64 = column(row, name)?;
    u64::try_from(value).map_err(|_| LedgerStoreError::SerializationError(format!("negative {name}: {value}")))
}

fn parsed<T>(row: &PgRow, name: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T, LedgerStoreError> {
    let raw: String = column(row, name)?;
    parse(&raw).ok_or_else(|| LedgerStoreError::SerializationError(format!("unknown {name}: {raw}")))
}

fn reference(row: &PgRow) -> Result<Option<Reference>, LedgerStoreError> {
    let reference_type: Option<String> = column(row, "reference_type")?;
    let reference_id: Option<Uuid> = column(row, "reference_id")?;
    match (reference_type, reference_id) {
        (Some(raw), Some(reference_id)) => {
            let reference_type = ReferenceType::parse(&raw)
                .ok_or_else(|| LedgerStoreError::SerializationError(format!("unknown reference_type: {raw}")))?;
            Ok(Some(Reference {
                reference_type,
                reference_id,
            }))
        }
        (None, None) => Ok(None),
        _ => Err(LedgerStoreError::SerializationError(
            "reference_type and reference_id must be set together".to_string(),
        )),
    }
}

pub(crate) fn item_from_row(row: &PgRow) -> Result<InventoryItem, LedgerStoreError> {
    Ok(InventoryItem {
        id: ItemId::from_uuid(column(row, "item_id")?),
        name: column(row, "name")?,
        category: column(row, "category")?,
        material: column(row, "material")?,
        unit: column(row, "unit")?,
        outlet: column(row, "outlet")?,
        lifecycle_status: parsed(row, "lifecycle_status", LifecycleStatus::parse)?,
        opening_balance_confirmed: column(row, "opening_balance_confirmed")?,
        stock: StockLevels {
            available: counter(row, "available")?,
            allocated: counter(row, "allocated")?,
            damaged: counter(row, "damaged")?,
            in_repair: counter(row, "in_repair")?,
            lost: counter(row, "lost")?,
            total: counter(row, "total")?,
        },
        movement_count: counter(row, "movement_count")?,
        has_reference_history: column(row, "has_reference_history")?,
        first_movement_at: column(row, "first_movement_at")?,
        last_movement_at: column(row, "last_movement_at")?,
        version: counter(row, "version")?,
        created_by: UserId::from_uuid(column(row, "created_by")?),
        created_at: column(row, "created_at")?,
        deleted_at: column(row, "deleted_at")?,
    })
}

pub(crate) fn movement_from_row(row: &PgRow) -> Result<Movement, LedgerStoreError> {
    let movement_type = parsed(row, "movement_type", MovementType::parse)?;
    let quantity = Quantity::try_from(counter(row, "quantity")?)
        .map_err(|e| LedgerStoreError::SerializationError(e.to_string()))?;
    let reason_code: Option<String> = column(row, "reason_code")?;
    let reason_code = reason_code
        .map(|raw| {
            ReasonCode::parse(&raw)
                .ok_or_else(|| LedgerStoreError::SerializationError(format!("unknown reason_code: {raw}")))
        })
        .transpose()?;

    Ok(Movement {
        id: MovementId::from_uuid(column(row, "movement_id")?),
        item_id: ItemId::from_uuid(column(row, "item_id")?),
        sequence: counter(row, "sequence")?,
        category: movement_type.category(),
        movement_type,
        quantity,
        reference: reference(row)?,
        reason_code,
        notes: column(row, "notes")?,
        actor: UserId::from_uuid(column(row, "actor")?),
        recorded_at: column(row, "recorded_at")?,
    })
}

pub(crate) fn allocation_from_row(row: &PgRow) -> Result<Allocation, LedgerStoreError> {
    let reference = reference(row)?
        .ok_or_else(|| LedgerStoreError::SerializationError("allocation without reference".to_string()))?;
    Ok(Allocation {
        item_id: ItemId::from_uuid(column(row, "item_id")?),
        reference,
        original: counter(row, "original")?,
        returned: counter(row, "returned")?,
        damaged: counter(row, "damaged")?,
        lost: counter(row, "lost")?,
        status: parsed(row, "status", AllocationStatus::parse)?,
        opened_at: column(row, "opened_at")?,
        closed_at: column(row, "closed_at")?,
        closed_by_parent: column(row, "closed_by_parent")?,
    })
}

pub(crate) fn session_from_row(row: &PgRow) -> Result<AuditSession, LedgerStoreError> {
    let lines: serde_json::Value = column(row, "lines")?;
    let lines = serde_json::from_value(lines)
        .map_err(|e| LedgerStoreError::SerializationError(format!("audit lines: {e}")))?;
    let submitted_by: Option<Uuid> = column(row, "submitted_by")?;
    let decided_by: Option<Uuid> = column(row, "decided_by")?;

    Ok(AuditSession {
        id: AuditSessionId::from_uuid(column(row, "session_id")?),
        status: parsed(row, "status", AuditStatus::parse)?,
        lines,
        created_by: UserId::from_uuid(column(row, "created_by")?),
        submitted_by: submitted_by.map(UserId::from_uuid),
        decided_by: decided_by.map(UserId::from_uuid),
        rejection_reason: column(row, "rejection_reason")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}
