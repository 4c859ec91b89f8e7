//! Postgres-backed store implementations.
//!
//! One [`PostgresLedgerStore`] over a shared connection pool implements all
//! four store traits. Optimistic concurrency on stock positions is enforced
//! with conditional writes at the database level.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE stock_positions (
//!     product_id      UUID        NOT NULL,
//!     warehouse_id    UUID        NOT NULL,
//!     on_hand         BIGINT      NOT NULL,
//!     reserved        BIGINT      NOT NULL,
//!     min_stock_level BIGINT      NOT NULL DEFAULT 0,
//!     max_stock_level BIGINT,
//!     allow_backorder BOOLEAN     NOT NULL DEFAULT FALSE,
//!     last_updated    TIMESTAMPTZ NOT NULL,
//!     version         BIGINT      NOT NULL,
//!     PRIMARY KEY (product_id, warehouse_id)
//! );
//!
//! CREATE TABLE inventory_transactions (
//!     id                     UUID        PRIMARY KEY,
//!     product_id             UUID        NOT NULL,
//!     warehouse_id           UUID        NOT NULL,
//!     kind                   TEXT        NOT NULL,
//!     quantity_delta         BIGINT      NOT NULL,
//!     reference_kind         TEXT,
//!     reference_id           TEXT,
//!     transfer_group         UUID,
//!     counterpart_warehouse  UUID,
//!     reason                 TEXT        NOT NULL,
//!     created_by             UUID        NOT NULL,
//!     created_at             TIMESTAMPTZ NOT NULL,
//!     approval_state         TEXT        NOT NULL,
//!     approved_by            UUID,
//!     rejected_by            UUID,
//!     decision_reason        TEXT,
//!     decided_at             TIMESTAMPTZ,
//!     on_hand_after          BIGINT
//! );
//! CREATE INDEX idx_txn_position ON inventory_transactions (product_id, warehouse_id, created_at DESC);
//! CREATE INDEX idx_txn_group ON inventory_transactions (transfer_group) WHERE transfer_group IS NOT NULL;
//!
//! CREATE TABLE reservations (
//!     id             UUID        PRIMARY KEY,
//!     product_id     UUID        NOT NULL,
//!     warehouse_id   UUID        NOT NULL,
//!     quantity       BIGINT      NOT NULL,
//!     remaining      BIGINT      NOT NULL,
//!     status         TEXT        NOT NULL,
//!     reference_kind TEXT,
//!     reference_id   TEXT,
//!     created_at     TIMESTAMPTZ NOT NULL,
//!     updated_at     TIMESTAMPTZ NOT NULL,
//!     expires_at     TIMESTAMPTZ
//! );
//!
//! CREATE TABLE low_stock_alert_configs (
//!     id             UUID        PRIMARY KEY,
//!     product_id     UUID        NOT NULL,
//!     warehouse_id   UUID,       -- NULL means product-wide scope
//!     threshold      BIGINT      NOT NULL,
//!     is_active      BOOLEAN     NOT NULL,
//!     notify_log     BOOLEAN     NOT NULL,
//!     notify_webhook BOOLEAN     NOT NULL,
//!     armed          BOOLEAN     NOT NULL DEFAULT TRUE,
//!     created_at     TIMESTAMPTZ NOT NULL,
//!     updated_at     TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | StoreError | Scenario |
//! |------------|-----------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent insert of the same position/id |
//! | Zero rows affected on versioned UPDATE | N/A | `Conflict` | Stale version (someone committed first) |
//! | Database (other) | any | `Backend` | Other database errors |
//! | RowNotFound / PoolClosed / network | N/A | `Backend` | Infrastructure failures |
//!
//! ## Thread Safety
//!
//! `PostgresLedgerStore` is `Send + Sync`; the SQLx pool handles connection
//! management. The synchronous trait impls bridge into async with the
//! current tokio runtime handle, so they must be called from within a tokio
//! runtime context.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use depot_core::{
    ActorId, AlertConfigId, ExpectedVersion, ProductId, ReservationId, TransactionId,
    TransferGroupId, WarehouseId,
};
use depot_inventory::{
    AlertScope, ApprovalState, InventoryTransaction, LowStockAlertConfig, NotifyPolicy,
    PositionKey, Reference, Reservation, ReservationStatus, StockPosition, TransactionKind,
};

use crate::error::StoreError;
use crate::traits::{AlertConfigStore, PositionStore, ReservationStore, TransactionStore};

/// Postgres-backed ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(self), fields(key = %key), err)]
    pub async fn get_position(&self, key: PositionKey) -> Result<Option<StockPosition>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT product_id, warehouse_id, on_hand, reserved, min_stock_level,
                   max_stock_level, allow_backorder, last_updated, version
            FROM stock_positions
            WHERE product_id = $1 AND warehouse_id = $2
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_position", e))?;

        row.map(position_from_row).transpose()
    }

    /// Conditional write on a stock position.
    ///
    /// - `Exact(0)`: insert, relying on the primary key to reject a racing
    ///   first writer
    /// - `Exact(n)`: versioned update; zero rows affected means someone else
    ///   committed first
    /// - `Any`: unconditional upsert (migrations, admin tooling)
    #[instrument(skip(self, position), fields(key = %position.key(), version = position.version), err)]
    pub async fn save_position(
        &self,
        position: &StockPosition,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        match expected {
            ExpectedVersion::Exact(0) => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO stock_positions (
                        product_id, warehouse_id, on_hand, reserved, min_stock_level,
                        max_stock_level, allow_backorder, last_updated, version
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (product_id, warehouse_id) DO NOTHING
                    "#,
                )
                .bind(position.product_id.as_uuid())
                .bind(position.warehouse_id.as_uuid())
                .bind(position.on_hand)
                .bind(position.reserved)
                .bind(position.min_stock_level)
                .bind(position.max_stock_level)
                .bind(position.allow_backorder)
                .bind(position.last_updated)
                .bind(position.version as i64)
                .execute(&*self.pool)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        StoreError::Conflict(format!(
                            "concurrent insert detected for {}",
                            position.key()
                        ))
                    } else {
                        map_sqlx_error("save_position", e)
                    }
                })?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::Conflict(format!(
                        "position {} already exists (expected version 0)",
                        position.key()
                    )));
                }
                Ok(())
            }
            ExpectedVersion::Exact(expected_version) => {
                let result = sqlx::query(
                    r#"
                    UPDATE stock_positions
                    SET on_hand = $3, reserved = $4, min_stock_level = $5,
                        max_stock_level = $6, allow_backorder = $7,
                        last_updated = $8, version = $9
                    WHERE product_id = $1 AND warehouse_id = $2 AND version = $10
                    "#,
                )
                .bind(position.product_id.as_uuid())
                .bind(position.warehouse_id.as_uuid())
                .bind(position.on_hand)
                .bind(position.reserved)
                .bind(position.min_stock_level)
                .bind(position.max_stock_level)
                .bind(position.allow_backorder)
                .bind(position.last_updated)
                .bind(position.version as i64)
                .bind(expected_version as i64)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("save_position", e))?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::Conflict(format!(
                        "optimistic concurrency check failed for {} (expected version {expected_version})",
                        position.key()
                    )));
                }
                Ok(())
            }
            ExpectedVersion::Any => {
                sqlx::query(
                    r#"
                    INSERT INTO stock_positions (
                        product_id, warehouse_id, on_hand, reserved, min_stock_level,
                        max_stock_level, allow_backorder, last_updated, version
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (product_id, warehouse_id) DO UPDATE
                    SET on_hand = EXCLUDED.on_hand, reserved = EXCLUDED.reserved,
                        min_stock_level = EXCLUDED.min_stock_level,
                        max_stock_level = EXCLUDED.max_stock_level,
                        allow_backorder = EXCLUDED.allow_backorder,
                        last_updated = EXCLUDED.last_updated, version = EXCLUDED.version
                    "#,
                )
                .bind(position.product_id.as_uuid())
                .bind(position.warehouse_id.as_uuid())
                .bind(position.on_hand)
                .bind(position.reserved)
                .bind(position.min_stock_level)
                .bind(position.max_stock_level)
                .bind(position.allow_backorder)
                .bind(position.last_updated)
                .bind(position.version as i64)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("save_position", e))?;
                Ok(())
            }
        }
    }

    async fn list_positions(
        &self,
        warehouse_id: Option<WarehouseId>,
    ) -> Result<Vec<StockPosition>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, warehouse_id, on_hand, reserved, min_stock_level,
                   max_stock_level, allow_backorder, last_updated, version
            FROM stock_positions
            WHERE ($1::uuid IS NULL OR warehouse_id = $1)
            ORDER BY product_id, warehouse_id
            "#,
        )
        .bind(warehouse_id.map(|w| *w.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_positions", e))?;

        rows.into_iter().map(position_from_row).collect()
    }

    #[instrument(skip(self, txn), fields(id = %txn.id, kind = %txn.kind), err)]
    pub async fn insert_transaction(&self, txn: &InventoryTransaction) -> Result<(), StoreError> {
        let (state, approved_by, rejected_by, decision_reason, decided_at) =
            approval_columns(&txn.approval);

        sqlx::query(
            r#"
            INSERT INTO inventory_transactions (
                id, product_id, warehouse_id, kind, quantity_delta,
                reference_kind, reference_id, transfer_group, counterpart_warehouse,
                reason, created_by, created_at,
                approval_state, approved_by, rejected_by, decision_reason, decided_at,
                on_hand_after
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(txn.id.as_uuid())
        .bind(txn.product_id.as_uuid())
        .bind(txn.warehouse_id.as_uuid())
        .bind(txn.kind.as_str())
        .bind(txn.quantity_delta)
        .bind(txn.reference.as_ref().map(|r| r.kind.clone()))
        .bind(txn.reference.as_ref().map(|r| r.id.clone()))
        .bind(txn.transfer_group.map(|g| *g.as_uuid()))
        .bind(txn.counterpart_warehouse.map(|w| *w.as_uuid()))
        .bind(&txn.reason)
        .bind(txn.created_by.as_uuid())
        .bind(txn.created_at)
        .bind(state)
        .bind(approved_by)
        .bind(rejected_by)
        .bind(decision_reason)
        .bind(decided_at)
        .bind(txn.on_hand_after)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::InvalidWrite(format!("transaction {} already exists", txn.id))
            } else {
                map_sqlx_error("insert_transaction", e)
            }
        })?;

        Ok(())
    }

    pub async fn get_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<InventoryTransaction>, StoreError> {
        let row = sqlx::query(TXN_SELECT_BY_ID)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_transaction", e))?;

        row.map(transaction_from_row).transpose()
    }

    /// One-shot `Pending -> decided` transition, guarded in SQL.
    #[instrument(skip(self, approval), fields(id = %id), err)]
    pub async fn record_transaction_decision(
        &self,
        id: TransactionId,
        approval: &ApprovalState,
        on_hand_after: Option<i64>,
    ) -> Result<InventoryTransaction, StoreError> {
        if approval.is_pending() {
            return Err(StoreError::InvalidWrite(format!(
                "decision for transaction {id} must not be pending"
            )));
        }

        let (state, approved_by, rejected_by, decision_reason, decided_at) =
            approval_columns(approval);

        let row = sqlx::query(
            r#"
            UPDATE inventory_transactions
            SET approval_state = $2, approved_by = $3, rejected_by = $4,
                decision_reason = $5, decided_at = $6, on_hand_after = $7
            WHERE id = $1 AND approval_state = 'pending'
            RETURNING id, product_id, warehouse_id, kind, quantity_delta,
                      reference_kind, reference_id, transfer_group, counterpart_warehouse,
                      reason, created_by, created_at,
                      approval_state, approved_by, rejected_by, decision_reason, decided_at,
                      on_hand_after
            "#,
        )
        .bind(id.as_uuid())
        .bind(state)
        .bind(approved_by)
        .bind(rejected_by)
        .bind(decision_reason)
        .bind(decided_at)
        .bind(on_hand_after)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_transaction_decision", e))?;

        match row {
            Some(row) => transaction_from_row(row),
            // Distinguish "missing" from "already decided".
            None => match self.get_transaction(id).await? {
                Some(_) => Err(StoreError::InvalidWrite(format!(
                    "transaction {id} is already decided"
                ))),
                None => Err(StoreError::NotFound(format!("transaction {id}"))),
            },
        }
    }

    pub async fn transaction_history(
        &self,
        key: PositionKey,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, warehouse_id, kind, quantity_delta,
                   reference_kind, reference_id, transfer_group, counterpart_warehouse,
                   reason, created_by, created_at,
                   approval_state, approved_by, rejected_by, decision_reason, decided_at,
                   on_hand_after
            FROM inventory_transactions
            WHERE product_id = $1 AND warehouse_id = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transaction_history", e))?;

        rows.into_iter().map(transaction_from_row).collect()
    }

    pub async fn list_pending_transactions(
        &self,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, warehouse_id, kind, quantity_delta,
                   reference_kind, reference_id, transfer_group, counterpart_warehouse,
                   reason, created_by, created_at,
                   approval_state, approved_by, rejected_by, decision_reason, decided_at,
                   on_hand_after
            FROM inventory_transactions
            WHERE approval_state = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_pending_transactions", e))?;

        rows.into_iter().map(transaction_from_row).collect()
    }

    pub async fn transactions_by_transfer_group(
        &self,
        group: TransferGroupId,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, warehouse_id, kind, quantity_delta,
                   reference_kind, reference_id, transfer_group, counterpart_warehouse,
                   reason, created_by, created_at,
                   approval_state, approved_by, rejected_by, decision_reason, decided_at,
                   on_hand_after
            FROM inventory_transactions
            WHERE transfer_group = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(group.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transactions_by_transfer_group", e))?;

        rows.into_iter().map(transaction_from_row).collect()
    }

    #[instrument(skip(self, reservation), fields(id = %reservation.id), err)]
    pub async fn insert_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, product_id, warehouse_id, quantity, remaining, status,
                reference_kind, reference_id, created_at, updated_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.product_id.as_uuid())
        .bind(reservation.warehouse_id.as_uuid())
        .bind(reservation.quantity)
        .bind(reservation.remaining)
        .bind(reservation.status.as_str())
        .bind(reservation.reference.as_ref().map(|r| r.kind.clone()))
        .bind(reservation.reference.as_ref().map(|r| r.id.clone()))
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .bind(reservation.expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::InvalidWrite(format!("reservation {} already exists", reservation.id))
            } else {
                map_sqlx_error("insert_reservation", e)
            }
        })?;

        Ok(())
    }

    pub async fn get_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, product_id, warehouse_id, quantity, remaining, status,
                   reference_kind, reference_id, created_at, updated_at, expires_at
            FROM reservations
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_reservation", e))?;

        row.map(reservation_from_row).transpose()
    }

    pub async fn update_reservation(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE reservations
            SET remaining = $2, status = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.remaining)
        .bind(reservation.status.as_str())
        .bind(reservation.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_reservation", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "reservation {}",
                reservation.id
            )));
        }
        Ok(())
    }

    pub async fn list_active_reservations(
        &self,
        key: PositionKey,
    ) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, warehouse_id, quantity, remaining, status,
                   reference_kind, reference_id, created_at, updated_at, expires_at
            FROM reservations
            WHERE product_id = $1 AND warehouse_id = $2 AND status = 'active'
            ORDER BY created_at ASC
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active_reservations", e))?;

        rows.into_iter().map(reservation_from_row).collect()
    }

    pub async fn list_expiring_reservations(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, warehouse_id, quantity, remaining, status,
                   reference_kind, reference_id, created_at, updated_at, expires_at
            FROM reservations
            WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= $1
            ORDER BY expires_at ASC
            "#,
        )
        .bind(before)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_expiring_reservations", e))?;

        rows.into_iter().map(reservation_from_row).collect()
    }

    pub async fn upsert_alert_config(
        &self,
        config: &LowStockAlertConfig,
    ) -> Result<(), StoreError> {
        let (product_id, warehouse_id) = scope_columns(&config.scope);

        sqlx::query(
            r#"
            INSERT INTO low_stock_alert_configs (
                id, product_id, warehouse_id, threshold, is_active,
                notify_log, notify_webhook, armed, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET product_id = EXCLUDED.product_id, warehouse_id = EXCLUDED.warehouse_id,
                threshold = EXCLUDED.threshold, is_active = EXCLUDED.is_active,
                notify_log = EXCLUDED.notify_log, notify_webhook = EXCLUDED.notify_webhook,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(config.id.as_uuid())
        .bind(product_id)
        .bind(warehouse_id)
        .bind(config.threshold)
        .bind(config.is_active)
        .bind(config.notify.log)
        .bind(config.notify.webhook)
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_alert_config", e))?;

        Ok(())
    }

    pub async fn get_alert_config(
        &self,
        id: AlertConfigId,
    ) -> Result<Option<LowStockAlertConfig>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, product_id, warehouse_id, threshold, is_active,
                   notify_log, notify_webhook, created_at, updated_at
            FROM low_stock_alert_configs
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_alert_config", e))?;

        row.map(alert_config_from_row).transpose()
    }

    pub async fn delete_alert_config(&self, id: AlertConfigId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM low_stock_alert_configs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_alert_config", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("alert config {id}")));
        }
        Ok(())
    }

    pub async fn list_alert_configs(
        &self,
        key: Option<PositionKey>,
    ) -> Result<Vec<LowStockAlertConfig>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, warehouse_id, threshold, is_active,
                   notify_log, notify_webhook, created_at, updated_at
            FROM low_stock_alert_configs
            WHERE ($1::uuid IS NULL OR (
                product_id = $1 AND is_active
                AND (warehouse_id IS NULL OR warehouse_id = $2)
            ))
            ORDER BY created_at ASC
            "#,
        )
        .bind(key.map(|k| *k.product_id.as_uuid()))
        .bind(key.map(|k| *k.warehouse_id.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_alert_configs", e))?;

        rows.into_iter().map(alert_config_from_row).collect()
    }

    pub async fn alert_config_armed(&self, id: AlertConfigId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT armed FROM low_stock_alert_configs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("alert_config_armed", e))?;

        match row {
            Some(row) => row
                .try_get("armed")
                .map_err(|e| StoreError::Backend(format!("failed to read armed flag: {e}"))),
            // Unknown configs count as armed, matching the in-memory store.
            None => Ok(true),
        }
    }

    pub async fn set_alert_config_armed(
        &self,
        id: AlertConfigId,
        armed: bool,
    ) -> Result<(), StoreError> {
        // A config deleted mid-flight is fine; the monitor re-reads configs
        // on every commit anyway.
        sqlx::query("UPDATE low_stock_alert_configs SET armed = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(armed)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_alert_config_armed", e))?;
        Ok(())
    }
}

const TXN_SELECT_BY_ID: &str = r#"
    SELECT id, product_id, warehouse_id, kind, quantity_delta,
           reference_kind, reference_id, transfer_group, counterpart_warehouse,
           reason, created_by, created_at,
           approval_state, approved_by, rejected_by, decision_reason, decided_at,
           on_hand_after
    FROM inventory_transactions
    WHERE id = $1
"#;

// The store traits are synchronous, but Postgres operations require async.
// We use tokio::runtime::Handle to run async code in a sync context. This
// works when called from within a tokio runtime (e.g. from server handlers).

fn runtime_handle() -> Result<tokio::runtime::Handle, StoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Backend(
            "PostgresLedgerStore requires an async runtime (tokio). Ensure you're calling from within a tokio runtime context.".to_string(),
        )
    })
}

impl PositionStore for PostgresLedgerStore {
    fn get(&self, key: PositionKey) -> Result<Option<StockPosition>, StoreError> {
        runtime_handle()?.block_on(self.get_position(key))
    }

    fn save(&self, position: &StockPosition, expected: ExpectedVersion) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.save_position(position, expected))
    }

    fn list(&self) -> Result<Vec<StockPosition>, StoreError> {
        runtime_handle()?.block_on(self.list_positions(None))
    }

    fn list_by_warehouse(&self, warehouse_id: WarehouseId) -> Result<Vec<StockPosition>, StoreError> {
        runtime_handle()?.block_on(self.list_positions(Some(warehouse_id)))
    }
}

impl TransactionStore for PostgresLedgerStore {
    fn insert(&self, txn: &InventoryTransaction) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.insert_transaction(txn))
    }

    fn get(&self, id: TransactionId) -> Result<Option<InventoryTransaction>, StoreError> {
        runtime_handle()?.block_on(self.get_transaction(id))
    }

    fn record_decision(
        &self,
        id: TransactionId,
        approval: &ApprovalState,
        on_hand_after: Option<i64>,
    ) -> Result<InventoryTransaction, StoreError> {
        runtime_handle()?.block_on(self.record_transaction_decision(id, approval, on_hand_after))
    }

    fn history(
        &self,
        key: PositionKey,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        runtime_handle()?.block_on(self.transaction_history(key, limit))
    }

    fn list_pending(&self, limit: usize) -> Result<Vec<InventoryTransaction>, StoreError> {
        runtime_handle()?.block_on(self.list_pending_transactions(limit))
    }

    fn list_by_transfer_group(
        &self,
        group: TransferGroupId,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        runtime_handle()?.block_on(self.transactions_by_transfer_group(group))
    }
}

impl ReservationStore for PostgresLedgerStore {
    fn insert(&self, reservation: &Reservation) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.insert_reservation(reservation))
    }

    fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        runtime_handle()?.block_on(self.get_reservation(id))
    }

    fn update(&self, reservation: &Reservation) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.update_reservation(reservation))
    }

    fn list_active(&self, key: PositionKey) -> Result<Vec<Reservation>, StoreError> {
        runtime_handle()?.block_on(self.list_active_reservations(key))
    }

    fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError> {
        runtime_handle()?.block_on(self.list_expiring_reservations(before))
    }
}

impl AlertConfigStore for PostgresLedgerStore {
    fn upsert(&self, config: &LowStockAlertConfig) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.upsert_alert_config(config))
    }

    fn get(&self, id: AlertConfigId) -> Result<Option<LowStockAlertConfig>, StoreError> {
        runtime_handle()?.block_on(self.get_alert_config(id))
    }

    fn delete(&self, id: AlertConfigId) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.delete_alert_config(id))
    }

    fn list(&self) -> Result<Vec<LowStockAlertConfig>, StoreError> {
        runtime_handle()?.block_on(self.list_alert_configs(None))
    }

    fn list_for_key(&self, key: PositionKey) -> Result<Vec<LowStockAlertConfig>, StoreError> {
        runtime_handle()?.block_on(self.list_alert_configs(Some(key)))
    }

    fn is_armed(&self, id: AlertConfigId) -> Result<bool, StoreError> {
        runtime_handle()?.block_on(self.alert_config_armed(id))
    }

    fn set_armed(&self, id: AlertConfigId, armed: bool) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.set_alert_config_armed(id, armed))
    }
}

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{operation}: {e}"))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = e {
        db.code().as_deref() == Some("23505")
    } else {
        false
    }
}

fn bad_row(context: &str, e: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to deserialize {context} row: {e}"))
}

fn position_from_row(row: PgRow) -> Result<StockPosition, StoreError> {
    let version: i64 = row.try_get("version").map_err(|e| bad_row("position", e))?;
    Ok(StockPosition {
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(|e| bad_row("position", e))?),
        warehouse_id: WarehouseId::from_uuid(
            row.try_get("warehouse_id").map_err(|e| bad_row("position", e))?,
        ),
        on_hand: row.try_get("on_hand").map_err(|e| bad_row("position", e))?,
        reserved: row.try_get("reserved").map_err(|e| bad_row("position", e))?,
        min_stock_level: row
            .try_get("min_stock_level")
            .map_err(|e| bad_row("position", e))?,
        max_stock_level: row
            .try_get("max_stock_level")
            .map_err(|e| bad_row("position", e))?,
        allow_backorder: row
            .try_get("allow_backorder")
            .map_err(|e| bad_row("position", e))?,
        last_updated: row
            .try_get("last_updated")
            .map_err(|e| bad_row("position", e))?,
        version: version as u64,
    })
}

fn transaction_from_row(row: PgRow) -> Result<InventoryTransaction, StoreError> {
    let kind_str: String = row.try_get("kind").map_err(|e| bad_row("transaction", e))?;
    let kind = parse_kind(&kind_str)?;

    let reference_kind: Option<String> = row
        .try_get("reference_kind")
        .map_err(|e| bad_row("transaction", e))?;
    let reference_id: Option<String> = row
        .try_get("reference_id")
        .map_err(|e| bad_row("transaction", e))?;
    let reference = match (reference_kind, reference_id) {
        (Some(kind), Some(id)) => Some(Reference::new(kind, id)),
        _ => None,
    };

    let transfer_group: Option<Uuid> = row
        .try_get("transfer_group")
        .map_err(|e| bad_row("transaction", e))?;
    let counterpart_warehouse: Option<Uuid> = row
        .try_get("counterpart_warehouse")
        .map_err(|e| bad_row("transaction", e))?;

    Ok(InventoryTransaction {
        id: TransactionId::from_uuid(row.try_get("id").map_err(|e| bad_row("transaction", e))?),
        product_id: ProductId::from_uuid(
            row.try_get("product_id").map_err(|e| bad_row("transaction", e))?,
        ),
        warehouse_id: WarehouseId::from_uuid(
            row.try_get("warehouse_id").map_err(|e| bad_row("transaction", e))?,
        ),
        kind,
        quantity_delta: row
            .try_get("quantity_delta")
            .map_err(|e| bad_row("transaction", e))?,
        reference,
        transfer_group: transfer_group.map(TransferGroupId::from_uuid),
        counterpart_warehouse: counterpart_warehouse.map(WarehouseId::from_uuid),
        reason: row.try_get("reason").map_err(|e| bad_row("transaction", e))?,
        created_by: ActorId::from_uuid(
            row.try_get("created_by").map_err(|e| bad_row("transaction", e))?,
        ),
        created_at: row
            .try_get("created_at")
            .map_err(|e| bad_row("transaction", e))?,
        approval: approval_from_row(&row)?,
        on_hand_after: row
            .try_get("on_hand_after")
            .map_err(|e| bad_row("transaction", e))?,
    })
}

fn reservation_from_row(row: PgRow) -> Result<Reservation, StoreError> {
    let status_str: String = row.try_get("status").map_err(|e| bad_row("reservation", e))?;
    let status = parse_status(&status_str)?;

    let reference_kind: Option<String> = row
        .try_get("reference_kind")
        .map_err(|e| bad_row("reservation", e))?;
    let reference_id: Option<String> = row
        .try_get("reference_id")
        .map_err(|e| bad_row("reservation", e))?;
    let reference = match (reference_kind, reference_id) {
        (Some(kind), Some(id)) => Some(Reference::new(kind, id)),
        _ => None,
    };

    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get("id").map_err(|e| bad_row("reservation", e))?),
        product_id: ProductId::from_uuid(
            row.try_get("product_id").map_err(|e| bad_row("reservation", e))?,
        ),
        warehouse_id: WarehouseId::from_uuid(
            row.try_get("warehouse_id").map_err(|e| bad_row("reservation", e))?,
        ),
        quantity: row.try_get("quantity").map_err(|e| bad_row("reservation", e))?,
        remaining: row.try_get("remaining").map_err(|e| bad_row("reservation", e))?,
        status,
        reference,
        created_at: row
            .try_get("created_at")
            .map_err(|e| bad_row("reservation", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| bad_row("reservation", e))?,
        expires_at: row
            .try_get("expires_at")
            .map_err(|e| bad_row("reservation", e))?,
    })
}

fn alert_config_from_row(row: PgRow) -> Result<LowStockAlertConfig, StoreError> {
    let product_id =
        ProductId::from_uuid(row.try_get("product_id").map_err(|e| bad_row("alert config", e))?);
    let warehouse_id: Option<Uuid> = row
        .try_get("warehouse_id")
        .map_err(|e| bad_row("alert config", e))?;

    let scope = match warehouse_id {
        Some(warehouse_id) => AlertScope::Position {
            product_id,
            warehouse_id: WarehouseId::from_uuid(warehouse_id),
        },
        None => AlertScope::Product { product_id },
    };

    Ok(LowStockAlertConfig {
        id: AlertConfigId::from_uuid(row.try_get("id").map_err(|e| bad_row("alert config", e))?),
        scope,
        threshold: row.try_get("threshold").map_err(|e| bad_row("alert config", e))?,
        is_active: row.try_get("is_active").map_err(|e| bad_row("alert config", e))?,
        notify: NotifyPolicy {
            log: row.try_get("notify_log").map_err(|e| bad_row("alert config", e))?,
            webhook: row
                .try_get("notify_webhook")
                .map_err(|e| bad_row("alert config", e))?,
        },
        created_at: row
            .try_get("created_at")
            .map_err(|e| bad_row("alert config", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| bad_row("alert config", e))?,
    })
}

fn approval_columns(
    approval: &ApprovalState,
) -> (
    &'static str,
    Option<Uuid>,
    Option<Uuid>,
    Option<String>,
    Option<DateTime<Utc>>,
) {
    match approval {
        ApprovalState::Pending => ("pending", None, None, None, None),
        ApprovalState::Approved { by, at } => ("approved", Some(*by.as_uuid()), None, None, Some(*at)),
        ApprovalState::Rejected { by, reason, at } => (
            "rejected",
            None,
            by.map(|b| *b.as_uuid()),
            Some(reason.clone()),
            Some(*at),
        ),
    }
}

fn approval_from_row(row: &PgRow) -> Result<ApprovalState, StoreError> {
    let state: String = row
        .try_get("approval_state")
        .map_err(|e| bad_row("transaction", e))?;

    match state.as_str() {
        "pending" => Ok(ApprovalState::Pending),
        "approved" => {
            let by: Uuid = row.try_get("approved_by").map_err(|e| bad_row("transaction", e))?;
            let at: DateTime<Utc> = row.try_get("decided_at").map_err(|e| bad_row("transaction", e))?;
            Ok(ApprovalState::Approved {
                by: ActorId::from_uuid(by),
                at,
            })
        }
        "rejected" => {
            let by: Option<Uuid> = row
                .try_get("rejected_by")
                .map_err(|e| bad_row("transaction", e))?;
            let reason: String = row
                .try_get("decision_reason")
                .map_err(|e| bad_row("transaction", e))?;
            let at: DateTime<Utc> = row.try_get("decided_at").map_err(|e| bad_row("transaction", e))?;
            Ok(ApprovalState::Rejected {
                by: by.map(ActorId::from_uuid),
                reason,
                at,
            })
        }
        other => Err(StoreError::Backend(format!(
            "unknown approval state '{other}'"
        ))),
    }
}

fn parse_kind(value: &str) -> Result<TransactionKind, StoreError> {
    match value {
        "adjustment" => Ok(TransactionKind::Adjustment),
        "reservation" => Ok(TransactionKind::Reservation),
        "release" => Ok(TransactionKind::Release),
        "transfer_out" => Ok(TransactionKind::TransferOut),
        "transfer_in" => Ok(TransactionKind::TransferIn),
        other => Err(StoreError::Backend(format!(
            "unknown transaction kind '{other}'"
        ))),
    }
}

fn parse_status(value: &str) -> Result<ReservationStatus, StoreError> {
    match value {
        "active" => Ok(ReservationStatus::Active),
        "released" => Ok(ReservationStatus::Released),
        "consumed" => Ok(ReservationStatus::Consumed),
        "expired" => Ok(ReservationStatus::Expired),
        other => Err(StoreError::Backend(format!(
            "unknown reservation status '{other}'"
        ))),
    }
}

fn scope_columns(scope: &AlertScope) -> (Uuid, Option<Uuid>) {
    match scope {
        AlertScope::Position {
            product_id,
            warehouse_id,
        } => (*product_id.as_uuid(), Some(*warehouse_id.as_uuid())),
        AlertScope::Product { product_id } => (*product_id.as_uuid(), None),
    }
}
