//! `depot-store` — the persistence boundary.
//!
//! Store traits are synchronous and storage-agnostic: the in-memory
//! implementations back tests/dev, the Postgres implementations back
//! production. The position store's conditional (versioned) write is the
//! per-key linearization point the whole engine relies on.

pub mod error;
pub mod in_memory;
pub mod postgres;
pub mod traits;

pub use error::StoreError;
pub use in_memory::{
    InMemoryAlertConfigStore, InMemoryPositionStore, InMemoryReservationStore,
    InMemoryTransactionStore,
};
pub use postgres::PostgresLedgerStore;
pub use traits::{AlertConfigStore, PositionStore, ReservationStore, TransactionStore};
