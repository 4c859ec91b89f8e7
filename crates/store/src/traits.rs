use std::sync::Arc;

use chrono::{DateTime, Utc};

use depot_core::{AlertConfigId, ExpectedVersion, ReservationId, TransactionId, TransferGroupId, WarehouseId};
use depot_inventory::{
    ApprovalState, InventoryTransaction, LowStockAlertConfig, PositionKey, Reservation,
    StockPosition,
};

use crate::error::StoreError;

/// Durable store for stock positions, supporting conditional writes.
///
/// `save` is the single serialization point for a key: implementations must
/// persist the candidate iff the stored version still matches `expected`
/// (0/absent counts as version 0), and fail with [`StoreError::Conflict`]
/// otherwise. Two racing writers for the same key therefore commit in some
/// order, and the loser observes the conflict instead of clobbering.
pub trait PositionStore: Send + Sync {
    fn get(&self, key: PositionKey) -> Result<Option<StockPosition>, StoreError>;

    /// Conditional write. The candidate carries its post-commit version
    /// (`expected + 1`); `expected` is the version the writer read.
    fn save(&self, position: &StockPosition, expected: ExpectedVersion) -> Result<(), StoreError>;

    fn list(&self) -> Result<Vec<StockPosition>, StoreError>;

    fn list_by_warehouse(&self, warehouse_id: WarehouseId) -> Result<Vec<StockPosition>, StoreError>;
}

/// Append-only store for inventory transactions.
///
/// Inserted rows never change except through `record_decision`, which is the
/// one-shot `Pending -> decided` transition; implementations must reject a
/// second decision for the same transaction.
pub trait TransactionStore: Send + Sync {
    fn insert(&self, txn: &InventoryTransaction) -> Result<(), StoreError>;

    fn get(&self, id: TransactionId) -> Result<Option<InventoryTransaction>, StoreError>;

    /// Persist a decision plus the apply-time on-hand snapshot.
    fn record_decision(
        &self,
        id: TransactionId,
        approval: &ApprovalState,
        on_hand_after: Option<i64>,
    ) -> Result<InventoryTransaction, StoreError>;

    /// Reverse-chronological, bounded history for one position.
    fn history(
        &self,
        key: PositionKey,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>, StoreError>;

    fn list_pending(&self, limit: usize) -> Result<Vec<InventoryTransaction>, StoreError>;

    fn list_by_transfer_group(
        &self,
        group: TransferGroupId,
    ) -> Result<Vec<InventoryTransaction>, StoreError>;
}

/// Store for reservations (holds).
///
/// Reservation transitions are serialized by the ledger's conditional write
/// on the underlying position, so this store needs no version column of its
/// own.
pub trait ReservationStore: Send + Sync {
    fn insert(&self, reservation: &Reservation) -> Result<(), StoreError>;

    fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    fn update(&self, reservation: &Reservation) -> Result<(), StoreError>;

    fn list_active(&self, key: PositionKey) -> Result<Vec<Reservation>, StoreError>;

    /// Active reservations whose deadline is at or before `before`.
    fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError>;
}

/// Store for low-stock alert configurations and their re-arm state.
///
/// A config is **armed** until it raises an alert; it re-arms when
/// availability climbs back above the threshold. Tracking this in the store
/// keeps alerting exactly-once across engine restarts.
pub trait AlertConfigStore: Send + Sync {
    fn upsert(&self, config: &LowStockAlertConfig) -> Result<(), StoreError>;

    fn get(&self, id: AlertConfigId) -> Result<Option<LowStockAlertConfig>, StoreError>;

    fn delete(&self, id: AlertConfigId) -> Result<(), StoreError>;

    fn list(&self) -> Result<Vec<LowStockAlertConfig>, StoreError>;

    /// Active configs whose scope covers the key (exact position scope and
    /// product-wide scope).
    fn list_for_key(&self, key: PositionKey) -> Result<Vec<LowStockAlertConfig>, StoreError>;

    fn is_armed(&self, id: AlertConfigId) -> Result<bool, StoreError>;

    fn set_armed(&self, id: AlertConfigId, armed: bool) -> Result<(), StoreError>;
}

impl<S> PositionStore for Arc<S>
where
    S: PositionStore + ?Sized,
{
    fn get(&self, key: PositionKey) -> Result<Option<StockPosition>, StoreError> {
        (**self).get(key)
    }

    fn save(&self, position: &StockPosition, expected: ExpectedVersion) -> Result<(), StoreError> {
        (**self).save(position, expected)
    }

    fn list(&self) -> Result<Vec<StockPosition>, StoreError> {
        (**self).list()
    }

    fn list_by_warehouse(&self, warehouse_id: WarehouseId) -> Result<Vec<StockPosition>, StoreError> {
        (**self).list_by_warehouse(warehouse_id)
    }
}

impl<S> TransactionStore for Arc<S>
where
    S: TransactionStore + ?Sized,
{
    fn insert(&self, txn: &InventoryTransaction) -> Result<(), StoreError> {
        (**self).insert(txn)
    }

    fn get(&self, id: TransactionId) -> Result<Option<InventoryTransaction>, StoreError> {
        (**self).get(id)
    }

    fn record_decision(
        &self,
        id: TransactionId,
        approval: &ApprovalState,
        on_hand_after: Option<i64>,
    ) -> Result<InventoryTransaction, StoreError> {
        (**self).record_decision(id, approval, on_hand_after)
    }

    fn history(
        &self,
        key: PositionKey,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        (**self).history(key, limit)
    }

    fn list_pending(&self, limit: usize) -> Result<Vec<InventoryTransaction>, StoreError> {
        (**self).list_pending(limit)
    }

    fn list_by_transfer_group(
        &self,
        group: TransferGroupId,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        (**self).list_by_transfer_group(group)
    }
}

impl<S> ReservationStore for Arc<S>
where
    S: ReservationStore + ?Sized,
{
    fn insert(&self, reservation: &Reservation) -> Result<(), StoreError> {
        (**self).insert(reservation)
    }

    fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        (**self).get(id)
    }

    fn update(&self, reservation: &Reservation) -> Result<(), StoreError> {
        (**self).update(reservation)
    }

    fn list_active(&self, key: PositionKey) -> Result<Vec<Reservation>, StoreError> {
        (**self).list_active(key)
    }

    fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError> {
        (**self).list_expiring(before)
    }
}

impl<S> AlertConfigStore for Arc<S>
where
    S: AlertConfigStore + ?Sized,
{
    fn upsert(&self, config: &LowStockAlertConfig) -> Result<(), StoreError> {
        (**self).upsert(config)
    }

    fn get(&self, id: AlertConfigId) -> Result<Option<LowStockAlertConfig>, StoreError> {
        (**self).get(id)
    }

    fn delete(&self, id: AlertConfigId) -> Result<(), StoreError> {
        (**self).delete(id)
    }

    fn list(&self) -> Result<Vec<LowStockAlertConfig>, StoreError> {
        (**self).list()
    }

    fn list_for_key(&self, key: PositionKey) -> Result<Vec<LowStockAlertConfig>, StoreError> {
        (**self).list_for_key(key)
    }

    fn is_armed(&self, id: AlertConfigId) -> Result<bool, StoreError> {
        (**self).is_armed(id)
    }

    fn set_armed(&self, id: AlertConfigId, armed: bool) -> Result<(), StoreError> {
        (**self).set_armed(id, armed)
    }
}
