//! Transaction log service: recording, approval policy, and the
//! approve/reject workflow for non-transfer transactions.
//!
//! Transfer legs share one decision across both warehouses and are decided
//! through the transfer coordinator instead.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use depot_core::{ActorId, DomainError, DomainResult, TransactionId};
use depot_events::{EventBus, LedgerCommitted};
use depot_inventory::{
    ApprovalState, InventoryTransaction, PositionKey, Reference, Reservation, StockDelta,
    TransactionKind,
};
use depot_store::{ReservationStore, StoreError, TransactionStore};

use crate::clock::Clock;
use crate::ledger::StockLedger;

/// Outcome of the approval policy for a prospective transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Apply immediately; the transaction is recorded already approved.
    Auto,
    /// Record pending; a later explicit approval applies the delta.
    Manual,
}

/// Policy deciding which transactions skip the approval queue.
///
/// Transfers always require explicit approval; releases never do (the
/// release path must stay idempotent for retried cancellation flows).
/// Adjustments and reservations are auto-approved below a magnitude
/// threshold or when the actor is privileged.
#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    pub auto_approve_limit: i64,
    pub privileged: HashSet<ActorId>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_approve_limit: 100,
            privileged: HashSet::new(),
        }
    }
}

impl ApprovalPolicy {
    pub fn with_limit(limit: i64) -> Self {
        Self {
            auto_approve_limit: limit,
            ..Self::default()
        }
    }

    pub fn privilege(mut self, actor: ActorId) -> Self {
        self.privileged.insert(actor);
        self
    }

    pub fn decide(&self, kind: TransactionKind, magnitude: i64, actor: ActorId) -> Decision {
        match kind {
            TransactionKind::TransferOut | TransactionKind::TransferIn => Decision::Manual,
            TransactionKind::Release => Decision::Auto,
            TransactionKind::Adjustment | TransactionKind::Reservation => {
                if self.privileged.contains(&actor) || magnitude <= self.auto_approve_limit {
                    Decision::Auto
                } else {
                    Decision::Manual
                }
            }
        }
    }
}

/// Append-only transaction log plus the approval state machine around it.
pub struct TransactionLog<B>
where
    B: EventBus<LedgerCommitted>,
{
    ledger: Arc<StockLedger<B>>,
    transactions: Arc<dyn TransactionStore>,
    reservations: Arc<dyn ReservationStore>,
    policy: ApprovalPolicy,
    clock: Arc<dyn Clock>,
}

impl<B> TransactionLog<B>
where
    B: EventBus<LedgerCommitted>,
{
    pub fn new(
        ledger: Arc<StockLedger<B>>,
        transactions: Arc<dyn TransactionStore>,
        reservations: Arc<dyn ReservationStore>,
        policy: ApprovalPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            transactions,
            reservations,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    pub fn get(&self, id: TransactionId) -> DomainResult<InventoryTransaction> {
        self.transactions
            .get(id)?
            .ok_or_else(|| DomainError::not_found(format!("transaction {id}")))
    }

    /// Record a manual stock adjustment.
    ///
    /// Auto-approved adjustments hit the ledger first and are recorded with
    /// the post-apply snapshot; policy-gated ones are recorded pending with
    /// no ledger effect.
    pub fn record_adjustment(
        &self,
        key: PositionKey,
        delta: i64,
        reference: Option<Reference>,
        reason: &str,
        actor: ActorId,
    ) -> DomainResult<InventoryTransaction> {
        if delta == 0 {
            return Err(DomainError::validation("adjustment delta cannot be zero"));
        }
        if reason.trim().is_empty() {
            return Err(DomainError::validation("adjustment reason cannot be empty"));
        }

        let now = self.clock.now();
        let mut txn = InventoryTransaction::new(
            key,
            TransactionKind::Adjustment,
            delta,
            reference,
            reason,
            actor,
            now,
        );

        match self.policy.decide(TransactionKind::Adjustment, txn.magnitude(), actor) {
            Decision::Manual => {
                self.transactions.insert(&txn)?;
                info!(id = %txn.id, key = %key, delta, "adjustment awaiting approval");
                Ok(txn)
            }
            Decision::Auto => {
                let position = self.ledger.apply_delta_retrying(
                    key,
                    StockDelta::on_hand(delta).backorder_aware(),
                    Some(txn.id),
                )?;
                txn.approval = ApprovalState::Approved { by: actor, at: now };
                txn.on_hand_after = Some(position.on_hand);
                self.transactions.insert(&txn)?;
                Ok(txn)
            }
        }
    }

    /// Approve a pending non-transfer transaction: apply its delta, then
    /// mark it approved. If the ledger rejects the delta (state drifted
    /// since the transaction was recorded), the transaction is marked
    /// rejected with an automatic reason instead of being left pending.
    pub fn approve(
        &self,
        id: TransactionId,
        approver: ActorId,
    ) -> DomainResult<InventoryTransaction> {
        let txn = self.get(id)?;
        if txn.kind.is_transfer() {
            return Err(DomainError::validation(format!(
                "transaction {id} is a transfer leg; decide it through the transfer coordinator"
            )));
        }
        if !txn.approval.is_pending() {
            return Err(DomainError::invalid_transition(format!(
                "transaction {id} already decided ({})",
                txn.approval.as_str()
            )));
        }

        let now = self.clock.now();
        let delta = match txn.kind {
            TransactionKind::Adjustment => {
                StockDelta::on_hand(txn.quantity_delta).backorder_aware()
            }
            TransactionKind::Reservation | TransactionKind::Release => {
                StockDelta::reserved(txn.quantity_delta)
            }
            TransactionKind::TransferOut | TransactionKind::TransferIn => unreachable!(),
        };

        let position = match self.ledger.apply_delta_retrying(txn.key(), delta, Some(txn.id)) {
            Ok(position) => position,
            Err(ledger_err) => {
                let rejected = ApprovalState::Rejected {
                    by: None,
                    reason: format!("ledger rejected delta at approval time: {ledger_err}"),
                    at: now,
                };
                self.transactions.record_decision(id, &rejected, None)?;
                warn!(id = %id, error = %ledger_err, "approval auto-rejected");
                return Err(ledger_err);
            }
        };

        let approved = ApprovalState::Approved {
            by: approver,
            at: now,
        };
        let decided = match self
            .transactions
            .record_decision(id, &approved, Some(position.on_hand))
        {
            Ok(decided) => decided,
            Err(StoreError::InvalidWrite(_)) => {
                // A concurrent approver claimed the decision between our
                // pending check and the apply; reverse our application so
                // the delta lands exactly once.
                let reverse = StockDelta {
                    on_hand: -delta.on_hand,
                    reserved: -delta.reserved,
                    backorder_aware: true,
                };
                self.ledger.apply_delta_retrying(txn.key(), reverse, Some(txn.id))?;
                return Err(DomainError::invalid_transition(format!(
                    "transaction {id} already decided"
                )));
            }
            Err(other) => return Err(other.into()),
        };

        // An approved reservation places the hold now; the reservation
        // record starts its life here.
        if decided.kind == TransactionKind::Reservation {
            let reservation = Reservation::new(
                decided.key(),
                decided.quantity_delta,
                decided.reference.clone(),
                now,
                None,
            );
            self.reservations.insert(&reservation)?;
        }

        Ok(decided)
    }

    /// Reject a pending non-transfer transaction. No ledger effect.
    pub fn reject(
        &self,
        id: TransactionId,
        actor: ActorId,
        reason: &str,
    ) -> DomainResult<InventoryTransaction> {
        if reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason cannot be empty"));
        }

        let txn = self.get(id)?;
        if txn.kind.is_transfer() {
            return Err(DomainError::validation(format!(
                "transaction {id} is a transfer leg; decide it through the transfer coordinator"
            )));
        }
        if !txn.approval.is_pending() {
            return Err(DomainError::invalid_transition(format!(
                "transaction {id} already decided ({})",
                txn.approval.as_str()
            )));
        }

        let rejected = ApprovalState::Rejected {
            by: Some(actor),
            reason: reason.to_string(),
            at: self.clock.now(),
        };
        Ok(self.transactions.record_decision(id, &rejected, None)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_gates_by_magnitude_and_privilege() {
        let privileged = ActorId::new();
        let normal = ActorId::new();
        let policy = ApprovalPolicy::with_limit(100).privilege(privileged);

        assert_eq!(
            policy.decide(TransactionKind::Adjustment, 100, normal),
            Decision::Auto
        );
        assert_eq!(
            policy.decide(TransactionKind::Adjustment, 101, normal),
            Decision::Manual
        );
        assert_eq!(
            policy.decide(TransactionKind::Adjustment, 10_000, privileged),
            Decision::Auto
        );
        assert_eq!(
            policy.decide(TransactionKind::Reservation, 101, normal),
            Decision::Manual
        );
    }

    #[test]
    fn transfers_always_need_approval_releases_never_do() {
        let privileged = ActorId::new();
        let policy = ApprovalPolicy::with_limit(1_000_000).privilege(privileged);

        assert_eq!(
            policy.decide(TransactionKind::TransferOut, 1, privileged),
            Decision::Manual
        );
        assert_eq!(
            policy.decide(TransactionKind::TransferIn, 1, privileged),
            Decision::Manual
        );
        assert_eq!(
            policy.decide(TransactionKind::Release, i64::MAX, ActorId::new()),
            Decision::Auto
        );
    }
}
