use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{DomainError, DomainResult, ProductId, ReservationId, WarehouseId};

use crate::position::PositionKey;
use crate::transaction::Reference;

/// Lifecycle of a hold against available stock.
///
/// `Active` is the only mutable state; the terminal states are retained
/// for audit and never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Released,
    Consumed,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Released => "released",
            ReservationStatus::Consumed => "consumed",
            ReservationStatus::Expired => "expired",
        }
    }
}

/// A temporary hold against available stock, not yet a physical movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    /// Quantity originally held.
    pub quantity: i64,
    /// Quantity still held; decreases on partial release/consume.
    pub remaining: i64,
    pub status: ReservationStatus,
    pub reference: Option<Reference>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn new(
        key: PositionKey,
        quantity: i64,
        reference: Option<Reference>,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            quantity,
            remaining: quantity,
            status: ReservationStatus::Active,
            reference,
            created_at,
            updated_at: created_at,
            expires_at,
        }
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.product_id, self.warehouse_id)
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Whether the hold has outlived its deadline (still needs the sweep to
    /// actually release it).
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|t| t <= now)
    }

    fn ensure_active(&self) -> DomainResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(format!(
                "reservation {} is {}",
                self.id,
                self.status.as_str()
            )))
        }
    }

    fn take(&self, quantity: i64) -> DomainResult<i64> {
        self.ensure_active()?;
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if quantity > self.remaining {
            return Err(DomainError::invalid_transition(format!(
                "cannot take {quantity} from reservation {} with {} remaining",
                self.id, self.remaining
            )));
        }
        Ok(self.remaining - quantity)
    }

    /// Give back part or all of the hold. Full release transitions to
    /// `Released`; partial release stays `Active` with reduced remaining.
    pub fn release(&self, quantity: i64, at: DateTime<Utc>) -> DomainResult<Reservation> {
        let remaining = self.take(quantity)?;
        Ok(Reservation {
            remaining,
            status: if remaining == 0 {
                ReservationStatus::Released
            } else {
                ReservationStatus::Active
            },
            updated_at: at,
            ..self.clone()
        })
    }

    /// Convert part or all of the hold into a permanent movement (shipment).
    pub fn consume(&self, quantity: i64, at: DateTime<Utc>) -> DomainResult<Reservation> {
        let remaining = self.take(quantity)?;
        Ok(Reservation {
            remaining,
            status: if remaining == 0 {
                ReservationStatus::Consumed
            } else {
                ReservationStatus::Active
            },
            updated_at: at,
            ..self.clone()
        })
    }

    /// Time-based expiry of whatever is still held.
    pub fn expire(&self, at: DateTime<Utc>) -> DomainResult<Reservation> {
        self.ensure_active()?;
        Ok(Reservation {
            remaining: 0,
            status: ReservationStatus::Expired,
            updated_at: at,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_key() -> PositionKey {
        PositionKey::new(ProductId::new(), WarehouseId::new())
    }

    fn active(quantity: i64) -> Reservation {
        Reservation::new(test_key(), quantity, Some(Reference::order("order-1")), Utc::now(), None)
    }

    #[test]
    fn partial_release_keeps_reservation_active() {
        let res = active(30);
        let after = res.release(10, Utc::now()).unwrap();
        assert_eq!(after.remaining, 20);
        assert!(after.is_active());
    }

    #[test]
    fn full_release_is_terminal() {
        let res = active(30).release(30, Utc::now()).unwrap();
        assert_eq!(res.status, ReservationStatus::Released);

        let err = res.release(1, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn cannot_release_beyond_remaining() {
        let res = active(5);
        let err = res.release(6, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn consume_to_zero_marks_consumed() {
        let res = active(8);
        let after = res.consume(8, Utc::now()).unwrap();
        assert_eq!(after.status, ReservationStatus::Consumed);
        assert_eq!(after.remaining, 0);
    }

    #[test]
    fn expiry_detection_respects_deadline() {
        let now = Utc::now();
        let mut res = active(4);
        res.expires_at = Some(now - Duration::minutes(1));
        assert!(res.is_past_expiry(now));

        let expired = res.expire(now).unwrap();
        assert_eq!(expired.status, ReservationStatus::Expired);
        assert_eq!(expired.remaining, 0);
        assert!(!expired.is_past_expiry(now));
    }

    #[test]
    fn reservation_without_deadline_never_expires() {
        let res = active(4);
        assert!(!res.is_past_expiry(Utc::now() + Duration::days(365)));
    }
}
