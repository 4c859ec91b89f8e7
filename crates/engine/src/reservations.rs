//! Reservation manager: holds against available stock.
//!
//! Reservations never move physical stock; they only shift quantity from
//! available to reserved through the ledger gate. Releases are idempotent
//! so upstream order-cancellation flows can retry safely.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use depot_core::{ActorId, DomainError, DomainResult, ReservationId};
use depot_events::{EventBus, LedgerCommitted, Worker, WorkerHandle};
use depot_inventory::{
    ApprovalState, InventoryTransaction, PositionKey, Reference, Reservation, StockDelta,
    TransactionKind,
};
use depot_store::{ReservationStore, TransactionStore};

use crate::clock::Clock;
use crate::ledger::StockLedger;
use crate::transactions::{ApprovalPolicy, Decision};

/// Result of a reserve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The hold is placed; the reservation is active.
    Reserved(Reservation),
    /// Policy routed the reservation to manual approval; no hold exists yet.
    /// The active reservation is created when the transaction is approved.
    PendingApproval(InventoryTransaction),
}

impl ReserveOutcome {
    pub fn reservation(self) -> Option<Reservation> {
        match self {
            ReserveOutcome::Reserved(reservation) => Some(reservation),
            ReserveOutcome::PendingApproval(_) => None,
        }
    }
}

/// Creates and releases holds against available stock.
pub struct ReservationManager<B>
where
    B: EventBus<LedgerCommitted>,
{
    ledger: Arc<StockLedger<B>>,
    reservations: Arc<dyn ReservationStore>,
    transactions: Arc<dyn TransactionStore>,
    policy: ApprovalPolicy,
    clock: Arc<dyn Clock>,
    /// Actor recorded on transactions produced without a human in the loop
    /// (expiration sweeps).
    system_actor: ActorId,
}

impl<B> ReservationManager<B>
where
    B: EventBus<LedgerCommitted>,
{
    pub fn new(
        ledger: Arc<StockLedger<B>>,
        reservations: Arc<dyn ReservationStore>,
        transactions: Arc<dyn TransactionStore>,
        policy: ApprovalPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            reservations,
            transactions,
            policy,
            clock,
            system_actor: ActorId::new(),
        }
    }

    pub fn get(&self, id: ReservationId) -> DomainResult<Reservation> {
        self.reservations
            .get(id)?
            .ok_or_else(|| DomainError::not_found(format!("reservation {id}")))
    }

    /// Place a hold of `quantity` against the position's available stock.
    ///
    /// Fails fast with `Unavailable` when available stock is too low;
    /// reservations never create backorders, regardless of the position's
    /// backorder flag. No partial effect on failure.
    pub fn reserve(
        &self,
        key: PositionKey,
        quantity: i64,
        reference: Option<Reference>,
        expires_at: Option<DateTime<Utc>>,
        actor: ActorId,
    ) -> DomainResult<ReserveOutcome> {
        if quantity <= 0 {
            return Err(DomainError::validation("reservation quantity must be positive"));
        }

        let now = self.clock.now();
        let mut txn = InventoryTransaction::new(
            key,
            TransactionKind::Reservation,
            quantity,
            reference.clone(),
            "reserve stock",
            actor,
            now,
        );

        if self.policy.decide(TransactionKind::Reservation, quantity, actor) == Decision::Manual {
            self.transactions.insert(&txn)?;
            info!(id = %txn.id, key = %key, quantity, "reservation awaiting approval");
            return Ok(ReserveOutcome::PendingApproval(txn));
        }

        let position = self
            .ledger
            .apply_delta_retrying(key, StockDelta::reserved(quantity), Some(txn.id))
            .map_err(unavailable_on_shortfall)?;

        txn.approval = ApprovalState::Approved { by: actor, at: now };
        txn.on_hand_after = Some(position.on_hand);
        self.transactions.insert(&txn)?;

        let reservation = Reservation::new(key, quantity, reference, now, expires_at);
        self.reservations.insert(&reservation)?;
        Ok(ReserveOutcome::Reserved(reservation))
    }

    /// Give back part (`Some(quantity)`) or all (`None`) of a hold.
    ///
    /// Releasing a reservation that is no longer active is a no-op success,
    /// not an error, to tolerate retried release calls from upstream
    /// cancellation flows.
    pub fn release(
        &self,
        id: ReservationId,
        quantity: Option<i64>,
        actor: ActorId,
    ) -> DomainResult<Reservation> {
        let reservation = self.get(id)?;
        if !reservation.is_active() {
            return Ok(reservation);
        }

        let quantity = quantity.unwrap_or(reservation.remaining);
        let now = self.clock.now();
        let updated = reservation.release(quantity, now)?;

        self.apply_release(&reservation, quantity, "release reservation", actor, now)?;
        self.reservations.update(&updated)?;
        Ok(updated)
    }

    /// Convert part (`Some(quantity)`) or all (`None`) of a hold into a
    /// permanent on-hand decrement (e.g. shipment).
    pub fn consume(
        &self,
        id: ReservationId,
        quantity: Option<i64>,
        actor: ActorId,
    ) -> DomainResult<Reservation> {
        let reservation = self.get(id)?;
        let quantity = quantity.unwrap_or(reservation.remaining);
        let now = self.clock.now();
        let updated = reservation.consume(quantity, now)?;

        let mut txn = InventoryTransaction::new(
            reservation.key(),
            TransactionKind::Adjustment,
            -quantity,
            Some(Reference::new("reservation", reservation.id.to_string())),
            "consume reservation",
            actor,
            now,
        );
        let position = self.ledger.apply_delta_retrying(
            reservation.key(),
            StockDelta {
                on_hand: -quantity,
                reserved: -quantity,
                backorder_aware: false,
            },
            Some(txn.id),
        )?;
        txn.approval = ApprovalState::Approved { by: actor, at: now };
        txn.on_hand_after = Some(position.on_hand);
        self.transactions.insert(&txn)?;

        self.reservations.update(&updated)?;
        Ok(updated)
    }

    /// Sweep: expire every active reservation whose deadline has passed,
    /// releasing its remaining hold through the same ledger path.
    ///
    /// Failures on individual reservations are logged and skipped so one
    /// contended position cannot stall the whole sweep.
    pub fn expire_due(&self, now: DateTime<Utc>) -> DomainResult<Vec<Reservation>> {
        let due = self.reservations.list_expiring(now)?;
        let mut expired = Vec::with_capacity(due.len());

        for reservation in due {
            match self.expire_one(&reservation, now) {
                Ok(updated) => expired.push(updated),
                Err(err) => {
                    warn!(id = %reservation.id, error = %err, "failed to expire reservation");
                }
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "expired reservations");
        }
        Ok(expired)
    }

    fn expire_one(
        &self,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> DomainResult<Reservation> {
        let updated = reservation.expire(now)?;
        self.apply_release(
            reservation,
            reservation.remaining,
            "reservation expired",
            self.system_actor,
            now,
        )?;
        self.reservations.update(&updated)?;
        Ok(updated)
    }

    fn apply_release(
        &self,
        reservation: &Reservation,
        quantity: i64,
        reason: &str,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut txn = InventoryTransaction::new(
            reservation.key(),
            TransactionKind::Release,
            -quantity,
            Some(Reference::new("reservation", reservation.id.to_string())),
            reason,
            actor,
            now,
        );
        let position = self.ledger.apply_delta_retrying(
            reservation.key(),
            StockDelta::reserved(-quantity),
            Some(txn.id),
        )?;
        txn.approval = ApprovalState::Approved { by: actor, at: now };
        txn.on_hand_after = Some(position.on_hand);
        self.transactions.insert(&txn)?;
        Ok(())
    }
}

/// Map ledger shortfalls to the caller-facing unavailability error.
fn unavailable_on_shortfall(err: DomainError) -> DomainError {
    match err {
        DomainError::InsufficientStock(msg) | DomainError::InvalidReservation(msg) => {
            DomainError::unavailable(msg)
        }
        other => other,
    }
}

/// Background sweep for reservation expiry.
pub struct ExpirationSweeper;

impl ExpirationSweeper {
    pub fn spawn<B>(
        manager: Arc<ReservationManager<B>>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> WorkerHandle
    where
        B: EventBus<LedgerCommitted> + Send + Sync + 'static,
    {
        Worker::spawn_interval("reservation-expiry", interval, move || {
            manager.expire_due(clock.now()).map(|_| ())
        })
    }
}
