//! In-memory store implementations.
//!
//! Intended for tests/dev. Not optimized for performance: scans are linear
//! and everything lives behind coarse `RwLock`s. The position store's write
//! lock is what makes its conditional write atomic.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use depot_core::{AlertConfigId, ExpectedVersion, ReservationId, TransactionId, TransferGroupId, WarehouseId};
use depot_inventory::{
    ApprovalState, InventoryTransaction, LowStockAlertConfig, PositionKey, Reservation,
    StockPosition,
};

use crate::error::StoreError;
use crate::traits::{AlertConfigStore, PositionStore, ReservationStore, TransactionStore};

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

/// In-memory stock position store; the conditional write is checked and
/// applied under one write lock.
#[derive(Debug, Default)]
pub struct InMemoryPositionStore {
    positions: RwLock<HashMap<PositionKey, StockPosition>>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionStore for InMemoryPositionStore {
    fn get(&self, key: PositionKey) -> Result<Option<StockPosition>, StoreError> {
        let positions = self.positions.read().map_err(|_| poisoned())?;
        Ok(positions.get(&key).cloned())
    }

    fn save(&self, position: &StockPosition, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut positions = self.positions.write().map_err(|_| poisoned())?;

        let key = position.key();
        let current = positions.get(&key).map(|p| p.version).unwrap_or(0);

        if !expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "position {key}: expected {expected:?}, found {current}"
            )));
        }

        positions.insert(key, position.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<StockPosition>, StoreError> {
        let positions = self.positions.read().map_err(|_| poisoned())?;
        let mut all: Vec<_> = positions.values().cloned().collect();
        all.sort_by_key(|p| p.key());
        Ok(all)
    }

    fn list_by_warehouse(&self, warehouse_id: WarehouseId) -> Result<Vec<StockPosition>, StoreError> {
        let positions = self.positions.read().map_err(|_| poisoned())?;
        let mut matching: Vec<_> = positions
            .values()
            .filter(|p| p.warehouse_id == warehouse_id)
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.key());
        Ok(matching)
    }
}

/// In-memory append-only transaction log. Insertion order doubles as the
/// chronological order for history queries.
#[derive(Debug, Default)]
pub struct InMemoryTransactionStore {
    transactions: RwLock<Vec<InventoryTransaction>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionStore for InMemoryTransactionStore {
    fn insert(&self, txn: &InventoryTransaction) -> Result<(), StoreError> {
        let mut transactions = self.transactions.write().map_err(|_| poisoned())?;
        if transactions.iter().any(|t| t.id == txn.id) {
            return Err(StoreError::InvalidWrite(format!(
                "transaction {} already exists",
                txn.id
            )));
        }
        transactions.push(txn.clone());
        Ok(())
    }

    fn get(&self, id: TransactionId) -> Result<Option<InventoryTransaction>, StoreError> {
        let transactions = self.transactions.read().map_err(|_| poisoned())?;
        Ok(transactions.iter().find(|t| t.id == id).cloned())
    }

    fn record_decision(
        &self,
        id: TransactionId,
        approval: &ApprovalState,
        on_hand_after: Option<i64>,
    ) -> Result<InventoryTransaction, StoreError> {
        let mut transactions = self.transactions.write().map_err(|_| poisoned())?;
        let txn = transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))?;

        if !txn.approval.is_pending() {
            return Err(StoreError::InvalidWrite(format!(
                "transaction {id} is already decided"
            )));
        }
        if approval.is_pending() {
            return Err(StoreError::InvalidWrite(format!(
                "decision for transaction {id} must not be pending"
            )));
        }

        txn.approval = approval.clone();
        txn.on_hand_after = on_hand_after;
        Ok(txn.clone())
    }

    fn history(
        &self,
        key: PositionKey,
        limit: usize,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let transactions = self.transactions.read().map_err(|_| poisoned())?;
        Ok(transactions
            .iter()
            .rev()
            .filter(|t| t.key() == key)
            .take(limit)
            .cloned()
            .collect())
    }

    fn list_pending(&self, limit: usize) -> Result<Vec<InventoryTransaction>, StoreError> {
        let transactions = self.transactions.read().map_err(|_| poisoned())?;
        Ok(transactions
            .iter()
            .filter(|t| t.approval.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    fn list_by_transfer_group(
        &self,
        group: TransferGroupId,
    ) -> Result<Vec<InventoryTransaction>, StoreError> {
        let transactions = self.transactions.read().map_err(|_| poisoned())?;
        Ok(transactions
            .iter()
            .filter(|t| t.transfer_group == Some(group))
            .cloned()
            .collect())
    }
}

/// In-memory reservation store.
#[derive(Debug, Default)]
pub struct InMemoryReservationStore {
    reservations: RwLock<HashMap<ReservationId, Reservation>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReservationStore for InMemoryReservationStore {
    fn insert(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let mut reservations = self.reservations.write().map_err(|_| poisoned())?;
        if reservations.contains_key(&reservation.id) {
            return Err(StoreError::InvalidWrite(format!(
                "reservation {} already exists",
                reservation.id
            )));
        }
        reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let reservations = self.reservations.read().map_err(|_| poisoned())?;
        Ok(reservations.get(&id).cloned())
    }

    fn update(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let mut reservations = self.reservations.write().map_err(|_| poisoned())?;
        if !reservations.contains_key(&reservation.id) {
            return Err(StoreError::NotFound(format!("reservation {}", reservation.id)));
        }
        reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    fn list_active(&self, key: PositionKey) -> Result<Vec<Reservation>, StoreError> {
        let reservations = self.reservations.read().map_err(|_| poisoned())?;
        let mut active: Vec<_> = reservations
            .values()
            .filter(|r| r.is_active() && r.key() == key)
            .cloned()
            .collect();
        active.sort_by_key(|r| r.created_at);
        Ok(active)
    }

    fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError> {
        let reservations = self.reservations.read().map_err(|_| poisoned())?;
        let mut due: Vec<_> = reservations
            .values()
            .filter(|r| r.is_active() && r.expires_at.is_some_and(|t| t <= before))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.expires_at);
        Ok(due)
    }
}

/// In-memory alert config store with armed-state tracking.
#[derive(Debug, Default)]
pub struct InMemoryAlertConfigStore {
    configs: RwLock<HashMap<AlertConfigId, LowStockAlertConfig>>,
    armed: RwLock<HashMap<AlertConfigId, bool>>,
}

impl InMemoryAlertConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertConfigStore for InMemoryAlertConfigStore {
    fn upsert(&self, config: &LowStockAlertConfig) -> Result<(), StoreError> {
        let mut configs = self.configs.write().map_err(|_| poisoned())?;
        configs.insert(config.id, config.clone());
        Ok(())
    }

    fn get(&self, id: AlertConfigId) -> Result<Option<LowStockAlertConfig>, StoreError> {
        let configs = self.configs.read().map_err(|_| poisoned())?;
        Ok(configs.get(&id).cloned())
    }

    fn delete(&self, id: AlertConfigId) -> Result<(), StoreError> {
        let mut configs = self.configs.write().map_err(|_| poisoned())?;
        if configs.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("alert config {id}")));
        }
        if let Ok(mut armed) = self.armed.write() {
            armed.remove(&id);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<LowStockAlertConfig>, StoreError> {
        let configs = self.configs.read().map_err(|_| poisoned())?;
        let mut all: Vec<_> = configs.values().cloned().collect();
        all.sort_by_key(|c| c.created_at);
        Ok(all)
    }

    fn list_for_key(&self, key: PositionKey) -> Result<Vec<LowStockAlertConfig>, StoreError> {
        let configs = self.configs.read().map_err(|_| poisoned())?;
        let mut matching: Vec<_> = configs
            .values()
            .filter(|c| c.is_active && c.scope.matches(key))
            .cloned()
            .collect();
        matching.sort_by_key(|c| c.created_at);
        Ok(matching)
    }

    fn is_armed(&self, id: AlertConfigId) -> Result<bool, StoreError> {
        let armed = self.armed.read().map_err(|_| poisoned())?;
        // Configs start armed.
        Ok(*armed.get(&id).unwrap_or(&true))
    }

    fn set_armed(&self, id: AlertConfigId, value: bool) -> Result<(), StoreError> {
        let mut armed = self.armed.write().map_err(|_| poisoned())?;
        armed.insert(id, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{ActorId, ProductId};
    use depot_inventory::{StockDelta, TransactionKind};

    fn test_key() -> PositionKey {
        PositionKey::new(ProductId::new(), WarehouseId::new())
    }

    fn position(key: PositionKey, on_hand: i64) -> StockPosition {
        StockPosition {
            on_hand,
            ..StockPosition::empty(key, Utc::now())
        }
    }

    #[test]
    fn conditional_write_rejects_stale_version() {
        let store = InMemoryPositionStore::new();
        let key = test_key();

        let v1 = position(key, 10)
            .with_delta(StockDelta::on_hand(0), Utc::now())
            .unwrap();
        store.save(&v1, ExpectedVersion::Exact(0)).unwrap();

        // A second writer that also read version 0 must lose.
        let stale = position(key, 99)
            .with_delta(StockDelta::on_hand(0), Utc::now())
            .unwrap();
        let err = store.save(&stale, ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(store.get(key).unwrap().unwrap().on_hand, 10);
    }

    #[test]
    fn concurrent_writers_cannot_both_commit_same_version() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryPositionStore::new());
        let key = test_key();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let candidate = position(key, 1)
                    .with_delta(StockDelta::on_hand(0), Utc::now())
                    .unwrap();
                store.save(&candidate, ExpectedVersion::Exact(0)).is_ok()
            }));
        }

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn decision_is_recorded_once() {
        let store = InMemoryTransactionStore::new();
        let txn = InventoryTransaction::new(
            test_key(),
            TransactionKind::Adjustment,
            5,
            None,
            "restock",
            ActorId::new(),
            Utc::now(),
        );
        store.insert(&txn).unwrap();

        let approved = ApprovalState::Approved {
            by: ActorId::new(),
            at: Utc::now(),
        };
        let decided = store.record_decision(txn.id, &approved, Some(5)).unwrap();
        assert!(decided.approval.is_approved());
        assert_eq!(decided.on_hand_after, Some(5));

        let err = store.record_decision(txn.id, &approved, Some(5)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidWrite(_)));
    }

    #[test]
    fn history_is_reverse_chronological_and_bounded() {
        let store = InMemoryTransactionStore::new();
        let key = test_key();
        let actor = ActorId::new();

        for i in 0..5 {
            let txn = InventoryTransaction::new(
                key,
                TransactionKind::Adjustment,
                i,
                None,
                format!("batch {i}"),
                actor,
                Utc::now(),
            );
            store.insert(&txn).unwrap();
        }

        let history = store.history(key, 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].quantity_delta, 4);
        assert_eq!(history[2].quantity_delta, 2);
    }

    #[test]
    fn alert_configs_start_armed() {
        let store = InMemoryAlertConfigStore::new();
        let id = AlertConfigId::new();
        assert!(store.is_armed(id).unwrap());

        store.set_armed(id, false).unwrap();
        assert!(!store.is_armed(id).unwrap());
    }
}
