//! [`LedgerStore`] backed by `PostgreSQL`.

use crate::rows::{
    ALLOCATION_COLUMNS, ITEM_COLUMNS, MOVEMENT_COLUMNS, SESSION_COLUMNS, allocation_from_row, db_error,
    item_from_row, movement_from_row, session_from_row, to_db,
};
use dishware_ledger_core::allocation::{Allocation, AllocationKey};
use dishware_ledger_core::item::InventoryItem;
use dishware_ledger_core::ledger_store::{ItemCommit, LedgerCommit, LedgerStore, LedgerStoreError, StoreFuture};
use dishware_ledger_core::movement::Movement;
use dishware_ledger_core::reconciliation::AuditSession;
use dishware_ledger_core::types::{AuditSessionId, ItemId, Reference};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use std::time::{Duration, Instant};

/// `PostgreSQL` ledger store.
///
/// Every [`commit`](LedgerStore::commit) runs in one transaction: the item
/// rows are locked with `SELECT ... FOR UPDATE` in item-id order, their
/// versions are compared with the expected ones, and only then are the
/// movements, allocations, items and audit session written. Any failure
/// rolls the whole commit back.
///
/// # Example
///
/// ```no_run
/// use dishware_ledger_postgres::PostgresLedgerStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresLedgerStore::new("postgres://localhost/ledger").await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerStoreError::DatabaseError`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, LedgerStoreError> {
        Self::connect(database_url, 10, 1, Duration::from_secs(30)).await
    }

    /// Connect with explicit pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerStoreError::DatabaseError`] if the connection fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, LedgerStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| LedgerStoreError::DatabaseError(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the ledger migrations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerStoreError::DatabaseError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), LedgerStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerStoreError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn commit_in(tx: &mut Transaction<'_, Postgres>, commit: LedgerCommit) -> Result<(), LedgerStoreError> {
        let mut changes = commit.items;
        changes.sort_by_key(|change| change.item.id);

        for change in &changes {
            let item_id = change.item.id;
            let row = sqlx::query("SELECT version FROM inventory_items WHERE item_id = $1 FOR UPDATE")
                .bind(item_id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| db_error("Failed to lock item", &e))?
                .ok_or_else(|| LedgerStoreError::NotFound(format!("item {item_id}")))?;
            let actual: i64 = row
                .try_get("version")
                .map_err(|e| LedgerStoreError::SerializationError(e.to_string()))?;
            if actual != to_db(change.expected_version)? {
                return Err(LedgerStoreError::ConcurrencyConflict {
                    item_id,
                    expected: change.expected_version,
                    actual: u64::try_from(actual).unwrap_or_default(),
                });
            }
        }

        for change in &changes {
            write_item_change(tx, change).await?;
        }
        if let Some(session) = &commit.audit_session {
            upsert_session(&mut **tx, session).await?;
        }
        Ok(())
    }
}

async fn write_item_change(tx: &mut Transaction<'_, Postgres>, change: &ItemCommit) -> Result<(), LedgerStoreError> {
    if let Some(movement) = &change.movement {
        insert_movement(tx, movement).await?;
    }
    for allocation in &change.allocations {
        upsert_allocation(tx, allocation).await?;
    }

    let item = &change.item;
    sqlx::query(
        r"
        UPDATE inventory_items SET
            name = $2, category = $3, material = $4, unit = $5, outlet = $6,
            lifecycle_status = $7, opening_balance_confirmed = $8,
            available = $9, allocated = $10, damaged = $11, in_repair = $12, lost = $13, total = $14,
            movement_count = $15, has_reference_history = $16,
            first_movement_at = $17, last_movement_at = $18,
            version = $19, deleted_at = $20
        WHERE item_id = $1
        ",
    )
    .bind(item.id.as_uuid())
    .bind(&item.name)
    .bind(&item.category)
    .bind(&item.material)
    .bind(&item.unit)
    .bind(&item.outlet)
    .bind(item.lifecycle_status.as_str())
    .bind(item.opening_balance_confirmed)
    .bind(to_db(item.stock.available)?)
    .bind(to_db(item.stock.allocated)?)
    .bind(to_db(item.stock.damaged)?)
    .bind(to_db(item.stock.in_repair)?)
    .bind(to_db(item.stock.lost)?)
    .bind(to_db(item.stock.total)?)
    .bind(to_db(item.movement_count)?)
    .bind(item.has_reference_history)
    .bind(item.first_movement_at)
    .bind(item.last_movement_at)
    .bind(to_db(item.version)?)
    .bind(item.deleted_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to update item", &e))?;
    Ok(())
}

async fn insert_movement(tx: &mut Transaction<'_, Postgres>, movement: &Movement) -> Result<(), LedgerStoreError> {
    sqlx::query(
        r"
        INSERT INTO inventory_movements (
            movement_id, item_id, sequence, event_type, category, movement_type, quantity,
            reference_type, reference_id, reason_code, notes, actor, recorded_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ",
    )
    .bind(movement.id.as_uuid())
    .bind(movement.item_id.as_uuid())
    .bind(to_db(movement.sequence)?)
    .bind(movement.event_type())
    .bind(movement.category.as_str())
    .bind(movement.movement_type.as_str())
    .bind(to_db(movement.quantity.get())?)
    .bind(movement.reference.map(|r| r.reference_type.as_str()))
    .bind(movement.reference.map(|r| r.reference_id))
    .bind(movement.reason_code.map(|r| r.as_str()))
    .bind(&movement.notes)
    .bind(movement.actor.as_uuid())
    .bind(movement.recorded_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to append movement", &e))?;
    Ok(())
}

async fn upsert_allocation(
    tx: &mut Transaction<'_, Postgres>,
    allocation: &Allocation,
) -> Result<(), LedgerStoreError> {
    sqlx::query(
        r"
        INSERT INTO inventory_allocations (
            item_id, reference_type, reference_id, original, returned, damaged, lost,
            status, opened_at, closed_at, closed_by_parent
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (item_id, reference_type, reference_id) DO UPDATE SET
            returned = EXCLUDED.returned,
            damaged = EXCLUDED.damaged,
            lost = EXCLUDED.lost,
            status = EXCLUDED.status,
            closed_at = EXCLUDED.closed_at,
            closed_by_parent = EXCLUDED.closed_by_parent
        ",
    )
    .bind(allocation.item_id.as_uuid())
    .bind(allocation.reference.reference_type.as_str())
    .bind(allocation.reference.reference_id)
    .bind(to_db(allocation.original)?)
    .bind(to_db(allocation.returned)?)
    .bind(to_db(allocation.damaged)?)
    .bind(to_db(allocation.lost)?)
    .bind(allocation.status.as_str())
    .bind(allocation.opened_at)
    .bind(allocation.closed_at)
    .bind(allocation.closed_by_parent)
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to write allocation", &e))?;
    Ok(())
}

async fn upsert_session<'c, E>(executor: E, session: &AuditSession) -> Result<(), LedgerStoreError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let lines = serde_json::to_value(&session.lines)
        .map_err(|e| LedgerStoreError::SerializationError(format!("audit lines: {e}")))?;
    sqlx::query(
        r"
        INSERT INTO audit_sessions (
            session_id, status, lines, created_by, submitted_by, decided_by,
            rejection_reason, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (session_id) DO UPDATE SET
            status = EXCLUDED.status,
            lines = EXCLUDED.lines,
            submitted_by = EXCLUDED.submitted_by,
            decided_by = EXCLUDED.decided_by,
            rejection_reason = EXCLUDED.rejection_reason,
            updated_at = EXCLUDED.updated_at
        ",
    )
    .bind(session.id.as_uuid())
    .bind(session.status.as_str())
    .bind(lines)
    .bind(session.created_by.as_uuid())
    .bind(session.submitted_by.map(|u| *u.as_uuid()))
    .bind(session.decided_by.map(|u| *u.as_uuid()))
    .bind(&session.rejection_reason)
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(executor)
    .await
    .map_err(|e| db_error("Failed to save audit session", &e))?;
    Ok(())
}

impl LedgerStore for PostgresLedgerStore {
    fn insert_item(&self, item: InventoryItem) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO inventory_items (
                    item_id, name, category, material, unit, outlet, lifecycle_status,
                    opening_balance_confirmed, version, created_by, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ",
            )
            .bind(item.id.as_uuid())
            .bind(&item.name)
            .bind(&item.category)
            .bind(&item.material)
            .bind(&item.unit)
            .bind(&item.outlet)
            .bind(item.lifecycle_status.as_str())
            .bind(item.opening_balance_confirmed)
            .bind(to_db(item.version)?)
            .bind(item.created_by.as_uuid())
            .bind(item.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to insert item", &e))?;
            Ok(())
        })
    }

    fn load_item(&self, item_id: ItemId) -> StoreFuture<'_, Option<InventoryItem>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM inventory_items WHERE item_id = $1"))
                .bind(item_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to load item", &e))?;
            row.as_ref().map(item_from_row).transpose()
        })
    }

    fn list_items(&self) -> StoreFuture<'_, Vec<InventoryItem>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE deleted_at IS NULL ORDER BY created_at, item_id"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list items", &e))?;
            rows.iter().map(item_from_row).collect()
        })
    }

    fn load_movements(&self, item_id: ItemId, from_sequence: Option<u64>) -> StoreFuture<'_, Vec<Movement>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {MOVEMENT_COLUMNS} FROM inventory_movements \
                 WHERE item_id = $1 AND sequence >= $2 ORDER BY sequence"
            ))
            .bind(item_id.as_uuid())
            .bind(to_db(from_sequence.unwrap_or(0))?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load movements", &e))?;
            rows.iter().map(movement_from_row).collect()
        })
    }

    fn load_allocation(&self, key: AllocationKey) -> StoreFuture<'_, Option<Allocation>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {ALLOCATION_COLUMNS} FROM inventory_allocations \
                 WHERE item_id = $1 AND reference_type = $2 AND reference_id = $3"
            ))
            .bind(key.item_id.as_uuid())
            .bind(key.reference.reference_type.as_str())
            .bind(key.reference.reference_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load allocation", &e))?;
            row.as_ref().map(allocation_from_row).transpose()
        })
    }

    fn load_allocations(&self, item_id: ItemId) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {ALLOCATION_COLUMNS} FROM inventory_allocations \
                 WHERE item_id = $1 ORDER BY reference_type, reference_id"
            ))
            .bind(item_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load allocations", &e))?;
            rows.iter().map(allocation_from_row).collect()
        })
    }

    fn load_allocations_for_reference(&self, reference: Reference) -> StoreFuture<'_, Vec<Allocation>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {ALLOCATION_COLUMNS} FROM inventory_allocations \
                 WHERE reference_type = $1 AND reference_id = $2 ORDER BY item_id"
            ))
            .bind(reference.reference_type.as_str())
            .bind(reference.reference_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load reference allocations", &e))?;
            rows.iter().map(allocation_from_row).collect()
        })
    }

    fn commit(&self, commit: LedgerCommit) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let started = Instant::now();
            let items = commit.items.len();
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("Failed to start transaction", &e))?;

            if let Err(error) = Self::commit_in(&mut tx, commit).await {
                let _ = tx.rollback().await;
                metrics::counter!("ledger_store_commits_total", "outcome" => "rolled_back").increment(1);
                tracing::warn!(%error, items, "Ledger commit rolled back");
                return Err(error);
            }

            tx.commit()
                .await
                .map_err(|e| db_error("Failed to commit transaction", &e))?;
            metrics::counter!("ledger_store_commits_total", "outcome" => "committed").increment(1);
            metrics::histogram!("ledger_store_commit_duration_seconds").record(started.elapsed().as_secs_f64());
            tracing::debug!(items, "Ledger commit applied");
            Ok(())
        })
    }

    fn save_audit_session(&self, session: AuditSession) -> StoreFuture<'_, ()> {
        Box::pin(async move { upsert_session(&self.pool, &session).await })
    }

    fn load_audit_session(&self, id: AuditSessionId) -> StoreFuture<'_, Option<AuditSession>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {SESSION_COLUMNS} FROM audit_sessions WHERE session_id = $1"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load audit session", &e))?;
            row.as_ref().map(session_from_row).transpose()
        })
    }
}
