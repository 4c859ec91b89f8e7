//! Read-only query facade over positions and the transaction log.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use depot_core::{DomainError, DomainResult, WarehouseId};
use depot_inventory::{InventoryTransaction, PositionKey, StockPosition};
use depot_store::{PositionStore, TransactionStore};

use crate::clock::Clock;

/// History reads are bounded regardless of what the caller asks for.
const MAX_HISTORY_LIMIT: usize = 500;

/// Result of an availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityCheck {
    /// Any sellable stock right now.
    pub available: bool,
    /// The requested quantity can be fulfilled (inclusive boundary), possibly
    /// via backorder.
    pub can_fulfill: bool,
    pub reason: Option<String>,
}

/// Aggregate stock picture for one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSummary {
    pub warehouse_id: WarehouseId,
    pub skus: usize,
    pub on_hand: i64,
    pub reserved: i64,
    pub available: i64,
    pub low_stock_skus: usize,
}

/// Read-only aggregation over the ledger's stores.
pub struct LedgerQueries {
    positions: Arc<dyn PositionStore>,
    transactions: Arc<dyn TransactionStore>,
    clock: Arc<dyn Clock>,
}

impl LedgerQueries {
    pub fn new(
        positions: Arc<dyn PositionStore>,
        transactions: Arc<dyn TransactionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            positions,
            transactions,
            clock,
        }
    }

    pub fn get_position(&self, key: PositionKey) -> DomainResult<StockPosition> {
        Ok(self
            .positions
            .get(key)?
            .unwrap_or_else(|| StockPosition::empty(key, self.clock.now())))
    }

    /// Can `quantity` be fulfilled from this position right now?
    pub fn check_availability(
        &self,
        key: PositionKey,
        quantity: i64,
    ) -> DomainResult<AvailabilityCheck> {
        if quantity <= 0 {
            return Err(DomainError::validation("requested quantity must be positive"));
        }

        let position = self.get_position(key)?;
        let available = position.available();
        let can_fulfill = position.can_fulfill(quantity);

        let reason = if !can_fulfill {
            Some(format!("only {available} available, {quantity} requested"))
        } else if available < quantity {
            Some("fulfillable via backorder".to_string())
        } else {
            None
        };

        Ok(AvailabilityCheck {
            available: available > 0,
            can_fulfill,
            reason,
        })
    }

    /// Reverse-chronological transaction history for a position, bounded.
    pub fn get_history(
        &self,
        key: PositionKey,
        limit: usize,
    ) -> DomainResult<Vec<InventoryTransaction>> {
        Ok(self
            .transactions
            .history(key, limit.min(MAX_HISTORY_LIMIT))?)
    }

    /// Positions at or below their own minimum stock level, optionally
    /// restricted to one warehouse.
    pub fn list_low_stock(
        &self,
        warehouse_id: Option<WarehouseId>,
    ) -> DomainResult<Vec<StockPosition>> {
        let positions = match warehouse_id {
            Some(warehouse_id) => self.positions.list_by_warehouse(warehouse_id)?,
            None => self.positions.list()?,
        };
        Ok(positions.into_iter().filter(|p| p.is_low_stock()).collect())
    }

    /// Pending transactions awaiting an approval decision.
    pub fn pending_approvals(&self, limit: usize) -> DomainResult<Vec<InventoryTransaction>> {
        Ok(self.transactions.list_pending(limit.min(MAX_HISTORY_LIMIT))?)
    }

    /// Aggregate totals for one warehouse.
    pub fn warehouse_summary(&self, warehouse_id: WarehouseId) -> DomainResult<WarehouseSummary> {
        let positions = self.positions.list_by_warehouse(warehouse_id)?;

        let mut summary = WarehouseSummary {
            warehouse_id,
            skus: positions.len(),
            on_hand: 0,
            reserved: 0,
            available: 0,
            low_stock_skus: 0,
        };
        for position in &positions {
            summary.on_hand += position.on_hand;
            summary.reserved += position.reserved;
            summary.available += position.available();
            if position.is_low_stock() {
                summary.low_stock_skus += 1;
            }
        }
        Ok(summary)
    }
}
