//! Transfer coordinator: paired debit/credit between two warehouses.
//!
//! A transfer is two linked transactions sharing a transfer group; both
//! commit or neither does. Atomicity across the two position keys is
//! achieved with compensating actions, not cross-key locks: if the source
//! debit lands but the destination credit fails, the coordinator re-credits
//! the source with a corrective adjustment before surfacing the error. No
//! silent stock loss.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use depot_core::{ActorId, DomainError, DomainResult, TransactionId, TransferGroupId, ProductId, WarehouseId};
use depot_events::{EventBus, LedgerCommitted};
use depot_inventory::{
    ApprovalState, InventoryTransaction, PositionKey, Reference, StockDelta, TransactionKind,
};
use depot_store::{StoreError, TransactionStore};

use crate::clock::Clock;
use crate::ledger::StockLedger;

/// Orchestrates two-sided ledger updates between warehouses.
pub struct TransferCoordinator<B>
where
    B: EventBus<LedgerCommitted>,
{
    ledger: Arc<StockLedger<B>>,
    transactions: Arc<dyn TransactionStore>,
    clock: Arc<dyn Clock>,
}

impl<B> TransferCoordinator<B>
where
    B: EventBus<LedgerCommitted>,
{
    pub fn new(
        ledger: Arc<StockLedger<B>>,
        transactions: Arc<dyn TransactionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            transactions,
            clock,
        }
    }

    /// Create the paired pending transfer legs. Transfers always require
    /// explicit approval; no stock moves until [`approve`] runs.
    ///
    /// [`approve`]: TransferCoordinator::approve
    pub fn transfer(
        &self,
        product_id: ProductId,
        from: WarehouseId,
        to: WarehouseId,
        quantity: i64,
        reference: Option<Reference>,
        actor: ActorId,
    ) -> DomainResult<(InventoryTransaction, InventoryTransaction)> {
        if from == to {
            return Err(DomainError::validation(
                "transfer source and destination warehouses must differ",
            ));
        }
        if quantity <= 0 {
            return Err(DomainError::validation("transfer quantity must be positive"));
        }

        let now = self.clock.now();
        let group = TransferGroupId::new();

        let out = InventoryTransaction::new(
            PositionKey::new(product_id, from),
            TransactionKind::TransferOut,
            -quantity,
            reference.clone(),
            format!("transfer to warehouse {to}"),
            actor,
            now,
        )
        .with_transfer_group(group, to);

        let incoming = InventoryTransaction::new(
            PositionKey::new(product_id, to),
            TransactionKind::TransferIn,
            quantity,
            reference,
            format!("transfer from warehouse {from}"),
            actor,
            now,
        )
        .with_transfer_group(group, from);

        self.transactions.insert(&out)?;
        self.transactions.insert(&incoming)?;
        info!(group = %group, product = %product_id, %from, %to, quantity, "transfer awaiting approval");

        Ok((out, incoming))
    }

    /// Approve a transfer by either leg's transaction id. One decision
    /// covers both legs.
    ///
    /// Execution order: debit the source, credit the destination. A debit
    /// failure rejects both legs with no ledger effect. A credit failure
    /// triggers compensation (the source debit is reversed with a
    /// corrective adjustment) and then rejects both legs; compensation is
    /// attempted even when the credit failure is an internal one.
    pub fn approve(&self, id: TransactionId, approver: ActorId) -> DomainResult<InventoryTransaction> {
        let (out, incoming) = self.group_of(id)?;
        if !out.approval.is_pending() || !incoming.approval.is_pending() {
            return Err(DomainError::invalid_transition(format!(
                "transfer group {} already decided",
                group_display(&out)
            )));
        }

        let now = self.clock.now();

        let debited = match self.ledger.apply_delta_retrying(
            out.key(),
            StockDelta::on_hand(out.quantity_delta),
            Some(out.id),
        ) {
            Ok(position) => position,
            Err(debit_err) => {
                // Nothing applied yet; reject both legs and surface.
                self.reject_both(
                    &out,
                    &incoming,
                    None,
                    &format!("source debit failed: {debit_err}"),
                    now,
                );
                return Err(debit_err);
            }
        };

        let credited = match self.ledger.apply_delta_retrying(
            incoming.key(),
            StockDelta::on_hand(incoming.quantity_delta),
            Some(incoming.id),
        ) {
            Ok(position) => position,
            Err(credit_err) => {
                // The source debit is in; reverse it before reporting
                // failure, whatever the class of the credit error.
                self.compensate_source(&out, approver, now);
                self.reject_both(
                    &out,
                    &incoming,
                    None,
                    &format!("destination credit failed: {credit_err}; source debit compensated"),
                    now,
                );
                return Err(credit_err);
            }
        };

        let approved = ApprovalState::Approved {
            by: approver,
            at: now,
        };

        let out_decided = match self
            .transactions
            .record_decision(out.id, &approved, Some(debited.on_hand))
        {
            Ok(decided) => decided,
            Err(StoreError::InvalidWrite(_)) => {
                // A concurrent decision claimed the group after our pending
                // check; undo both applications so the transfer lands
                // exactly once.
                self.compensate_source(&out, approver, now);
                self.compensate_destination(&incoming, approver, now);
                return Err(DomainError::invalid_transition(format!(
                    "transfer group {} already decided",
                    group_display(&out)
                )));
            }
            Err(other) => return Err(other.into()),
        };
        let in_decided =
            self.transactions
                .record_decision(incoming.id, &approved, Some(credited.on_hand))?;

        info!(group = %group_display(&out), "transfer applied");
        if id == out_decided.id {
            Ok(out_decided)
        } else {
            Ok(in_decided)
        }
    }

    /// Reject a transfer by either leg's transaction id; the decision covers
    /// both legs. No ledger effect.
    pub fn reject(
        &self,
        id: TransactionId,
        actor: ActorId,
        reason: &str,
    ) -> DomainResult<InventoryTransaction> {
        if reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason cannot be empty"));
        }

        let (out, incoming) = self.group_of(id)?;
        if !out.approval.is_pending() || !incoming.approval.is_pending() {
            return Err(DomainError::invalid_transition(format!(
                "transfer group {} already decided",
                group_display(&out)
            )));
        }

        let now = self.clock.now();
        let rejected = ApprovalState::Rejected {
            by: Some(actor),
            reason: reason.to_string(),
            at: now,
        };
        let out_decided = self.transactions.record_decision(out.id, &rejected, None)?;
        let in_decided = self
            .transactions
            .record_decision(incoming.id, &rejected, None)?;

        if id == out_decided.id {
            Ok(out_decided)
        } else {
            Ok(in_decided)
        }
    }

    /// Resolve both legs of the group containing `id`.
    fn group_of(
        &self,
        id: TransactionId,
    ) -> DomainResult<(InventoryTransaction, InventoryTransaction)> {
        let txn = self
            .transactions
            .get(id)?
            .ok_or_else(|| DomainError::not_found(format!("transaction {id}")))?;
        let group = txn.transfer_group.ok_or_else(|| {
            DomainError::validation(format!("transaction {id} is not a transfer leg"))
        })?;

        let members = self.transactions.list_by_transfer_group(group)?;
        let out = members
            .iter()
            .find(|t| t.kind == TransactionKind::TransferOut)
            .cloned();
        let incoming = members
            .iter()
            .find(|t| t.kind == TransactionKind::TransferIn)
            .cloned();

        match (out, incoming) {
            (Some(out), Some(incoming)) => Ok((out, incoming)),
            _ => Err(DomainError::internal(format!(
                "transfer group {group} is missing a leg"
            ))),
        }
    }

    /// Reverse an applied source debit with a corrective, auto-approved
    /// adjustment. Best effort: a compensation failure is logged at error
    /// level and leaves the corrective transaction unrecorded, but the
    /// caller still sees the original transfer failure.
    fn compensate_source(&self, out: &InventoryTransaction, actor: ActorId, now: DateTime<Utc>) {
        let quantity = -out.quantity_delta;
        let mut corrective = InventoryTransaction::new(
            out.key(),
            TransactionKind::Adjustment,
            quantity,
            Some(Reference::new(
                "transfer",
                group_display(out),
            )),
            format!("compensation for failed transfer {}", group_display(out)),
            actor,
            now,
        );

        match self.ledger.apply_delta_retrying(
            out.key(),
            StockDelta::on_hand(quantity).backorder_aware(),
            Some(corrective.id),
        ) {
            Ok(position) => {
                corrective.approval = ApprovalState::Approved { by: actor, at: now };
                corrective.on_hand_after = Some(position.on_hand);
                if let Err(err) = self.transactions.insert(&corrective) {
                    error!(group = %group_display(out), error = %err, "failed to record transfer compensation");
                }
                warn!(group = %group_display(out), "transfer compensated at source");
            }
            Err(err) => {
                error!(group = %group_display(out), error = %err, "transfer compensation failed; stock in flight");
            }
        }
    }

    /// Reverse an applied destination credit (decision-race cleanup path).
    fn compensate_destination(
        &self,
        incoming: &InventoryTransaction,
        actor: ActorId,
        now: DateTime<Utc>,
    ) {
        let quantity = -incoming.quantity_delta;
        let mut corrective = InventoryTransaction::new(
            incoming.key(),
            TransactionKind::Adjustment,
            quantity,
            Some(Reference::new("transfer", group_display(incoming))),
            format!(
                "compensation for failed transfer {}",
                group_display(incoming)
            ),
            actor,
            now,
        );

        match self.ledger.apply_delta_retrying(
            incoming.key(),
            StockDelta::on_hand(quantity).backorder_aware(),
            Some(corrective.id),
        ) {
            Ok(position) => {
                corrective.approval = ApprovalState::Approved { by: actor, at: now };
                corrective.on_hand_after = Some(position.on_hand);
                if let Err(err) = self.transactions.insert(&corrective) {
                    error!(group = %group_display(incoming), error = %err, "failed to record transfer compensation");
                }
            }
            Err(err) => {
                error!(group = %group_display(incoming), error = %err, "transfer compensation failed; stock in flight");
            }
        }
    }

    /// Best-effort rejection of both legs with an automatic reason.
    fn reject_both(
        &self,
        out: &InventoryTransaction,
        incoming: &InventoryTransaction,
        by: Option<ActorId>,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        let rejected = ApprovalState::Rejected {
            by,
            reason: reason.to_string(),
            at: now,
        };
        for leg in [out, incoming] {
            if let Err(err) = self.transactions.record_decision(leg.id, &rejected, None) {
                error!(id = %leg.id, error = %err, "failed to record transfer rejection");
            }
        }
    }
}

fn group_display(txn: &InventoryTransaction) -> String {
    txn.transfer_group
        .map(|g| g.to_string())
        .unwrap_or_else(|| txn.id.to_string())
}
