//! `depot-inventory` — pure domain model for the inventory ledger.
//!
//! Deterministic types and transition functions only; no IO. All state
//! mutation flows through the engine's apply-delta gate, which calls into
//! the pure functions defined here.

pub mod alert;
pub mod position;
pub mod reservation;
pub mod transaction;

pub use alert::{AlertScope, LowStockAlert, LowStockAlertConfig, NotifyPolicy};
pub use position::{PositionKey, StockDelta, StockPosition};
pub use reservation::{Reservation, ReservationStatus};
pub use transaction::{ApprovalState, InventoryTransaction, Reference, TransactionKind};
