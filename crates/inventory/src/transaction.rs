use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{
    ActorId, DomainError, DomainResult, ProductId, TransactionId, TransferGroupId, WarehouseId,
};

use crate::position::PositionKey;

/// Kind of stock-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Adjustment,
    Reservation,
    Release,
    TransferOut,
    TransferIn,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Adjustment => "adjustment",
            TransactionKind::Reservation => "reservation",
            TransactionKind::Release => "release",
            TransactionKind::TransferOut => "transfer_out",
            TransactionKind::TransferIn => "transfer_in",
        }
    }

    /// Transfer legs always carry a transfer group and a counterpart warehouse.
    pub fn is_transfer(&self) -> bool {
        matches!(self, TransactionKind::TransferOut | TransactionKind::TransferIn)
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional link to the upstream action that caused a transaction
/// (an order, a cancellation flow, a manual correction, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: String,
    pub id: String,
}

impl Reference {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn order(id: impl Into<String>) -> Self {
        Self::new("order", id)
    }
}

/// Approval state machine: `Pending -> {Approved, Rejected}`, both terminal.
///
/// The closed enum plus the guarded transitions below make illegal
/// transitions unrepresentable at the call sites: a decided transaction can
/// only be read, never re-decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved {
        by: ActorId,
        at: DateTime<Utc>,
    },
    Rejected {
        /// Absent for automatic rejections (e.g. ledger failure at approval time).
        by: Option<ActorId>,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl ApprovalState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ApprovalState::Pending)
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalState::Approved { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ApprovalState::Rejected { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved { .. } => "approved",
            ApprovalState::Rejected { .. } => "rejected",
        }
    }

    /// `Pending -> Approved`; anything else is already decided.
    pub fn approve(&self, by: ActorId, at: DateTime<Utc>) -> DomainResult<ApprovalState> {
        match self {
            ApprovalState::Pending => Ok(ApprovalState::Approved { by, at }),
            decided => Err(DomainError::invalid_transition(format!(
                "transaction already decided ({})",
                decided.as_str()
            ))),
        }
    }

    /// `Pending -> Rejected`; requires a non-empty reason.
    pub fn reject(
        &self,
        by: Option<ActorId>,
        reason: &str,
        at: DateTime<Utc>,
    ) -> DomainResult<ApprovalState> {
        if reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason cannot be empty"));
        }
        match self {
            ApprovalState::Pending => Ok(ApprovalState::Rejected {
                by,
                reason: reason.to_string(),
                at,
            }),
            decided => Err(DomainError::invalid_transition(format!(
                "transaction already decided ({})",
                decided.as_str()
            ))),
        }
    }
}

/// One immutable entry in the append-only transaction log.
///
/// The quantity delta is applied to the stock position if and only if the
/// transaction is approved (explicitly or by policy). Decided transactions
/// never change again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: TransactionId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub kind: TransactionKind,
    /// Signed on-hand (adjustment/transfer) or reserved (reservation/release)
    /// quantity change, depending on `kind`.
    pub quantity_delta: i64,
    pub reference: Option<Reference>,
    pub transfer_group: Option<TransferGroupId>,
    pub counterpart_warehouse: Option<WarehouseId>,
    pub reason: String,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub approval: ApprovalState,
    /// On-hand quantity right after the delta was applied to the ledger.
    /// `None` until (unless) the transaction is applied.
    pub on_hand_after: Option<i64>,
}

impl InventoryTransaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: PositionKey,
        kind: TransactionKind,
        quantity_delta: i64,
        reference: Option<Reference>,
        reason: impl Into<String>,
        created_by: ActorId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            kind,
            quantity_delta,
            reference,
            transfer_group: None,
            counterpart_warehouse: None,
            reason: reason.into(),
            created_by,
            created_at,
            approval: ApprovalState::Pending,
            on_hand_after: None,
        }
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.product_id, self.warehouse_id)
    }

    /// Attach the transfer pairing metadata to a transfer leg.
    pub fn with_transfer_group(
        mut self,
        group: TransferGroupId,
        counterpart: WarehouseId,
    ) -> Self {
        self.transfer_group = Some(group);
        self.counterpart_warehouse = Some(counterpart);
        self
    }

    /// Magnitude used by the approval policy.
    pub fn magnitude(&self) -> i64 {
        self.quantity_delta.abs()
    }

    pub fn approve(mut self, by: ActorId, at: DateTime<Utc>) -> DomainResult<Self> {
        self.approval = self.approval.approve(by, at)?;
        Ok(self)
    }

    pub fn reject(
        mut self,
        by: Option<ActorId>,
        reason: &str,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        self.approval = self.approval.reject(by, reason, at)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> PositionKey {
        PositionKey::new(ProductId::new(), WarehouseId::new())
    }

    fn pending_txn() -> InventoryTransaction {
        InventoryTransaction::new(
            test_key(),
            TransactionKind::Adjustment,
            -20,
            Some(Reference::new("manual", "stocktake-7")),
            "shrinkage",
            ActorId::new(),
            Utc::now(),
        )
    }

    #[test]
    fn approve_transitions_pending_only_once() {
        let approver = ActorId::new();
        let txn = pending_txn().approve(approver, Utc::now()).unwrap();
        assert!(txn.approval.is_approved());

        let err = txn.approve(approver, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn reject_requires_reason() {
        let err = pending_txn().reject(Some(ActorId::new()), "  ", Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rejected_is_terminal() {
        let txn = pending_txn()
            .reject(None, "insufficient stock at approval time", Utc::now())
            .unwrap();
        assert!(txn.approval.is_rejected());

        let err = txn.approve(ActorId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn transfer_legs_carry_pairing_metadata() {
        let group = TransferGroupId::new();
        let counterpart = WarehouseId::new();
        let txn = InventoryTransaction::new(
            test_key(),
            TransactionKind::TransferOut,
            -10,
            None,
            "rebalance",
            ActorId::new(),
            Utc::now(),
        )
        .with_transfer_group(group, counterpart);

        assert_eq!(txn.transfer_group, Some(group));
        assert_eq!(txn.counterpart_warehouse, Some(counterpart));
        assert!(txn.kind.is_transfer());
    }
}
