//! `depot-events` — post-commit event plumbing.
//!
//! The ledger publishes a [`LedgerCommitted`] event after every successful
//! conditional write. Consumers (the low-stock monitor, external adapters)
//! subscribe through the [`EventBus`] abstraction; delivery is at-least-once
//! and consumers must be idempotent.

pub mod bus;
pub mod commit;
pub mod event;
pub mod in_memory_bus;
pub mod worker;

pub use bus::{EventBus, Subscription};
pub use commit::LedgerCommitted;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use worker::{Worker, WorkerHandle};
