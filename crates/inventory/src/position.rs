use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{DomainError, DomainResult, ProductId, WarehouseId};

/// Composite key addressing one product's stock in one warehouse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl PositionKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
        }
    }
}

impl core::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)
    }
}

/// A signed mutation of one stock position.
///
/// `backorder_aware` marks deltas coming from explicit backorder-permitting
/// paths (manual adjustments, consumption of holds). It relaxes only the
/// on-hand floor and never the reserved bounds: reservations cannot create
/// backorders.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub on_hand: i64,
    pub reserved: i64,
    pub backorder_aware: bool,
}

impl StockDelta {
    pub fn on_hand(delta: i64) -> Self {
        Self {
            on_hand: delta,
            reserved: 0,
            backorder_aware: false,
        }
    }

    pub fn reserved(delta: i64) -> Self {
        Self {
            on_hand: 0,
            reserved: delta,
            backorder_aware: false,
        }
    }

    pub fn backorder_aware(mut self) -> Self {
        self.backorder_aware = true;
        self
    }

    pub fn is_noop(&self) -> bool {
        self.on_hand == 0 && self.reserved == 0
    }
}

/// Current stock of one product in one warehouse.
///
/// Positions are created implicitly (zeroed) on first reference and are
/// never deleted, only zeroed. The `version` counter is the optimistic
/// concurrency token checked by the store's conditional write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPosition {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub on_hand: i64,
    pub reserved: i64,
    pub min_stock_level: i64,
    pub max_stock_level: Option<i64>,
    pub allow_backorder: bool,
    pub last_updated: DateTime<Utc>,
    pub version: u64,
}

impl StockPosition {
    /// Zeroed position for a key that has never been written.
    pub fn empty(key: PositionKey, at: DateTime<Utc>) -> Self {
        Self {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            on_hand: 0,
            reserved: 0,
            min_stock_level: 0,
            max_stock_level: None,
            allow_backorder: false,
            last_updated: at,
            version: 0,
        }
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.product_id, self.warehouse_id)
    }

    /// Quantity available to sell or hold: on-hand minus reserved.
    ///
    /// Negative only when backorder-aware adjustments pushed on-hand below
    /// the reserved quantity.
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    /// Whether the requested quantity can be fulfilled right now.
    ///
    /// Inclusive boundary: `available == requested` fulfills. Backorder
    /// permission also fulfills, since on-hand may go negative on commit.
    pub fn can_fulfill(&self, quantity: i64) -> bool {
        self.available() >= quantity || self.allow_backorder
    }

    /// Whether available stock sits at or below the position's own minimum.
    pub fn is_low_stock(&self) -> bool {
        self.min_stock_level > 0 && self.available() <= self.min_stock_level
    }

    /// Apply a delta, enforcing the ledger invariants. Pure: returns the
    /// candidate successor position (version bumped, `last_updated` stamped)
    /// or the domain error that rejects the mutation.
    ///
    /// Invariants:
    /// - `reserved >= 0` always
    /// - `on_hand >= 0` unless the position allows backorder and the delta is
    ///   backorder-aware
    /// - `reserved <= on_hand` unless a backorder-aware delta (which never
    ///   increases reserved) pushed on-hand below the standing holds
    pub fn with_delta(&self, delta: StockDelta, at: DateTime<Utc>) -> DomainResult<StockPosition> {
        let on_hand = self
            .on_hand
            .checked_add(delta.on_hand)
            .ok_or_else(|| DomainError::validation("on-hand quantity overflow"))?;
        let reserved = self
            .reserved
            .checked_add(delta.reserved)
            .ok_or_else(|| DomainError::validation("reserved quantity overflow"))?;

        let backordering = self.allow_backorder && delta.backorder_aware;

        if reserved < 0 {
            return Err(DomainError::invalid_reservation(format!(
                "reserved quantity would go negative ({reserved}) for {}",
                self.key()
            )));
        }

        if on_hand < 0 && !backordering {
            return Err(DomainError::insufficient_stock(format!(
                "on-hand would go negative ({on_hand}) for {}",
                self.key()
            )));
        }

        // A backorder-aware decrement may leave on-hand below the standing
        // holds; a reservation increase never may.
        if reserved > on_hand && !(backordering && delta.reserved <= 0) {
            return Err(DomainError::invalid_reservation(format!(
                "reserved ({reserved}) would exceed on-hand ({on_hand}) for {}",
                self.key()
            )));
        }

        Ok(StockPosition {
            on_hand,
            reserved,
            last_updated: at,
            version: self.version + 1,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> PositionKey {
        PositionKey::new(ProductId::new(), WarehouseId::new())
    }

    fn position(on_hand: i64, reserved: i64) -> StockPosition {
        StockPosition {
            on_hand,
            reserved,
            ..StockPosition::empty(test_key(), Utc::now())
        }
    }

    #[test]
    fn delta_moves_quantities_and_bumps_version() {
        let pos = position(100, 0);
        let next = pos.with_delta(StockDelta::reserved(30), Utc::now()).unwrap();
        assert_eq!(next.on_hand, 100);
        assert_eq!(next.reserved, 30);
        assert_eq!(next.available(), 70);
        assert_eq!(next.version, pos.version + 1);
    }

    #[test]
    fn on_hand_cannot_go_negative_without_backorder() {
        let pos = position(10, 0);
        let err = pos.with_delta(StockDelta::on_hand(-11), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock(_)));
    }

    #[test]
    fn backorder_aware_delta_may_push_on_hand_negative() {
        let mut pos = position(10, 0);
        pos.allow_backorder = true;
        let next = pos
            .with_delta(StockDelta::on_hand(-15).backorder_aware(), Utc::now())
            .unwrap();
        assert_eq!(next.on_hand, -5);
    }

    #[test]
    fn backorder_flag_alone_is_not_enough() {
        // Position does not allow backorder; the flag must not bypass the floor.
        let pos = position(10, 0);
        let err = pos
            .with_delta(StockDelta::on_hand(-15).backorder_aware(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock(_)));
    }

    #[test]
    fn reserved_cannot_exceed_on_hand() {
        let pos = position(10, 8);
        let err = pos.with_delta(StockDelta::reserved(3), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidReservation(_)));
    }

    #[test]
    fn reservations_never_backorder() {
        let mut pos = position(10, 10);
        pos.allow_backorder = true;
        // Even with backorder allowed and the flag set, a reserve increase
        // beyond on-hand is rejected.
        let err = pos
            .with_delta(StockDelta::reserved(1).backorder_aware(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidReservation(_)));
    }

    #[test]
    fn reserved_cannot_go_negative() {
        let pos = position(10, 2);
        let err = pos.with_delta(StockDelta::reserved(-3), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidReservation(_)));
    }

    #[test]
    fn consume_decrements_both_sides() {
        let pos = position(10, 6);
        let next = pos
            .with_delta(
                StockDelta {
                    on_hand: -4,
                    reserved: -4,
                    backorder_aware: false,
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(next.on_hand, 6);
        assert_eq!(next.reserved, 2);
    }

    #[test]
    fn fulfillment_boundary_is_inclusive() {
        let pos = position(100, 40);
        assert!(pos.can_fulfill(60));
        assert!(!pos.can_fulfill(61));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: with backorder disabled, any sequence of accepted deltas
        /// keeps `0 <= reserved <= on_hand` in every reachable state.
        #[test]
        fn accepted_deltas_preserve_invariants(
            deltas in prop::collection::vec((-50i64..50i64, -50i64..50i64), 1..40)
        ) {
            let mut pos = position(0, 0);
            for (d_on_hand, d_reserved) in deltas {
                let delta = StockDelta {
                    on_hand: d_on_hand,
                    reserved: d_reserved,
                    backorder_aware: false,
                };
                if let Ok(next) = pos.with_delta(delta, Utc::now()) {
                    pos = next;
                }
                prop_assert!(pos.reserved >= 0);
                prop_assert!(pos.on_hand >= 0);
                prop_assert!(pos.reserved <= pos.on_hand);
            }
        }

        /// Property: the version counter increments exactly once per accepted
        /// delta, regardless of how many attempts were rejected in between.
        #[test]
        fn version_counts_accepted_deltas(
            deltas in prop::collection::vec(-20i64..20i64, 1..40)
        ) {
            let mut pos = position(0, 0);
            let mut accepted = 0u64;
            for d in deltas {
                if let Ok(next) = pos.with_delta(StockDelta::on_hand(d), Utc::now()) {
                    pos = next;
                    accepted += 1;
                }
            }
            prop_assert_eq!(pos.version, accepted);
        }
    }
}
