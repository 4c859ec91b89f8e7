use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{ProductId, TransactionId, WarehouseId};
use depot_inventory::{PositionKey, StockDelta};

use crate::event::Event;

/// Published after every successful conditional write to a stock position.
///
/// Carries the applied delta and the post-commit quantities so consumers
/// never need to read the position back (the snapshot is consistent with
/// the commit that produced it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCommitted {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub delta_on_hand: i64,
    pub delta_reserved: i64,
    pub on_hand: i64,
    pub reserved: i64,
    pub available: i64,
    /// Position version assigned by this commit.
    pub version: u64,
    /// Transaction the delta belongs to, when the caller recorded one.
    pub transaction_id: Option<TransactionId>,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerCommitted {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.product_id, self.warehouse_id)
    }

    pub fn delta(&self) -> StockDelta {
        StockDelta {
            on_hand: self.delta_on_hand,
            reserved: self.delta_reserved,
            backorder_aware: false,
        }
    }

    /// Whether this commit reduced the sellable quantity (the trigger
    /// condition for low-stock evaluation).
    pub fn decreased_availability(&self) -> bool {
        self.delta_on_hand - self.delta_reserved < 0
    }
}

impl Event for LedgerCommitted {
    fn event_type(&self) -> &'static str {
        "ledger.position.committed"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(delta_on_hand: i64, delta_reserved: i64) -> LedgerCommitted {
        LedgerCommitted {
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            delta_on_hand,
            delta_reserved,
            on_hand: 100,
            reserved: 10,
            available: 90,
            version: 1,
            transaction_id: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn availability_decrease_detection() {
        assert!(committed(-5, 0).decreased_availability());
        assert!(committed(0, 5).decreased_availability());
        assert!(!committed(5, 0).decreased_availability());
        // Consuming a hold moves both sides equally; availability is unchanged.
        assert!(!committed(-5, -5).decreased_availability());
    }
}
