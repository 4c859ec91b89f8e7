//! `depot-engine` — the inventory ledger and reservation engine.
//!
//! Composition of the application services over the store boundary:
//!
//! - [`StockLedger`]: the single mutation gate (apply-delta + CAS retry)
//! - [`TransactionLog`]: the append-only log and approval workflow
//! - [`ReservationManager`]: holds, releases, consumption, expiry
//! - [`TransferCoordinator`]: paired warehouse moves with compensation
//! - [`LowStockMonitor`]: threshold alerts off post-commit events
//! - [`LedgerQueries`]: read-only aggregation
//!
//! [`InventoryEngine`] wires these together and is the surface adapters
//! (HTTP handlers, schedulers) call into.

pub mod clock;
pub mod ledger;
pub mod monitor;
pub mod query;
pub mod reservations;
pub mod transactions;
pub mod transfers;


use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use depot_core::{
    ActorId, AlertConfigId, DomainResult, ProductId, ReservationId, TransactionId, WarehouseId,
};
use depot_events::{EventBus, InMemoryEventBus, LedgerCommitted, WorkerHandle};
use depot_inventory::{
    InventoryTransaction, LowStockAlertConfig, PositionKey, Reference, Reservation, StockPosition,
};
use depot_store::{
    AlertConfigStore, InMemoryAlertConfigStore, InMemoryPositionStore, InMemoryReservationStore,
    InMemoryTransactionStore, PositionStore, PostgresLedgerStore, ReservationStore,
    TransactionStore,
};

pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{RetryPolicy, StockLedger};
pub use monitor::{CollectingSink, LowStockMonitor, NotificationSink, TracingSink};
pub use query::{AvailabilityCheck, LedgerQueries, WarehouseSummary};
pub use reservations::{ExpirationSweeper, ReservationManager, ReserveOutcome};
pub use transactions::{ApprovalPolicy, Decision, TransactionLog};
pub use transfers::TransferCoordinator;

/// Tunables for the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub approval: ApprovalPolicy,
    pub retry: RetryPolicy,
}

/// The engine's composition root and public surface.
pub struct InventoryEngine<B>
where
    B: EventBus<LedgerCommitted>,
{
    ledger: Arc<StockLedger<B>>,
    transactions: Arc<TransactionLog<B>>,
    reservations: Arc<ReservationManager<B>>,
    transfers: Arc<TransferCoordinator<B>>,
    monitor: Arc<LowStockMonitor>,
    queries: LedgerQueries,
    alert_configs: Arc<dyn AlertConfigStore>,
    bus: Arc<B>,
    clock: Arc<dyn Clock>,
}

/// Engine over the in-memory stack (tests/dev).
pub type InMemoryEngine = InventoryEngine<InMemoryEventBus<LedgerCommitted>>;

impl<B> InventoryEngine<B>
where
    B: EventBus<LedgerCommitted> + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        positions: Arc<dyn PositionStore>,
        transactions: Arc<dyn TransactionStore>,
        reservations: Arc<dyn ReservationStore>,
        alert_configs: Arc<dyn AlertConfigStore>,
        bus: Arc<B>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        let ledger = Arc::new(StockLedger::new(
            positions.clone(),
            bus.clone(),
            clock.clone(),
            config.retry,
        ));
        let transaction_log = Arc::new(TransactionLog::new(
            ledger.clone(),
            transactions.clone(),
            reservations.clone(),
            config.approval.clone(),
            clock.clone(),
        ));
        let reservation_manager = Arc::new(ReservationManager::new(
            ledger.clone(),
            reservations,
            transactions.clone(),
            config.approval,
            clock.clone(),
        ));
        let transfer_coordinator = Arc::new(TransferCoordinator::new(
            ledger.clone(),
            transactions.clone(),
            clock.clone(),
        ));
        let monitor = Arc::new(LowStockMonitor::new(alert_configs.clone(), sink));
        let queries = LedgerQueries::new(positions, transactions, clock.clone());

        Self {
            ledger,
            transactions: transaction_log,
            reservations: reservation_manager,
            transfers: transfer_coordinator,
            monitor,
            queries,
            alert_configs,
            bus,
            clock,
        }
    }

    // Mutations

    /// Record a stock adjustment (positive or negative on-hand delta).
    pub fn adjust(
        &self,
        key: PositionKey,
        delta: i64,
        reason: &str,
        actor: ActorId,
        reference: Option<Reference>,
    ) -> DomainResult<InventoryTransaction> {
        self.transactions
            .record_adjustment(key, delta, reference, reason, actor)
    }

    /// Place a hold against available stock.
    pub fn reserve(
        &self,
        key: PositionKey,
        quantity: i64,
        reference: Option<Reference>,
        expires_at: Option<DateTime<Utc>>,
        actor: ActorId,
    ) -> DomainResult<ReserveOutcome> {
        self.reservations
            .reserve(key, quantity, reference, expires_at, actor)
    }

    /// Release part (`Some`) or all (`None`) of a hold. Idempotent for
    /// non-active reservations.
    pub fn release(
        &self,
        id: ReservationId,
        quantity: Option<i64>,
        actor: ActorId,
    ) -> DomainResult<Reservation> {
        self.reservations.release(id, quantity, actor)
    }

    /// Convert a hold into a permanent on-hand decrement (shipment).
    pub fn consume(
        &self,
        id: ReservationId,
        quantity: Option<i64>,
        actor: ActorId,
    ) -> DomainResult<Reservation> {
        self.reservations.consume(id, quantity, actor)
    }

    /// Create the paired pending transfer legs between two warehouses.
    pub fn transfer(
        &self,
        product_id: ProductId,
        from: WarehouseId,
        to: WarehouseId,
        quantity: i64,
        reference: Option<Reference>,
        actor: ActorId,
    ) -> DomainResult<(InventoryTransaction, InventoryTransaction)> {
        self.transfers
            .transfer(product_id, from, to, quantity, reference, actor)
    }

    /// Approve a pending transaction. Transfer legs share one decision:
    /// approving either leg applies both sides.
    pub fn approve(&self, id: TransactionId, actor: ActorId) -> DomainResult<InventoryTransaction> {
        let txn = self.transactions.get(id)?;
        if txn.kind.is_transfer() {
            self.transfers.approve(id, actor)
        } else {
            self.transactions.approve(id, actor)
        }
    }

    /// Reject a pending transaction (both legs, for transfers). Requires a
    /// non-empty reason; never touches the ledger.
    pub fn reject(
        &self,
        id: TransactionId,
        actor: ActorId,
        reason: &str,
    ) -> DomainResult<InventoryTransaction> {
        let txn = self.transactions.get(id)?;
        if txn.kind.is_transfer() {
            self.transfers.reject(id, actor, reason)
        } else {
            self.transactions.reject(id, actor, reason)
        }
    }

    /// Update a position's settings (minimum level, backorder permission).
    pub fn configure_position(
        &self,
        key: PositionKey,
        min_stock_level: i64,
        max_stock_level: Option<i64>,
        allow_backorder: bool,
    ) -> DomainResult<StockPosition> {
        self.ledger
            .configure_position(key, min_stock_level, max_stock_level, allow_backorder)
    }

    // Reads

    pub fn get_position(&self, key: PositionKey) -> DomainResult<StockPosition> {
        self.queries.get_position(key)
    }

    pub fn get_transaction(&self, id: TransactionId) -> DomainResult<InventoryTransaction> {
        self.transactions.get(id)
    }

    pub fn get_reservation(&self, id: ReservationId) -> DomainResult<Reservation> {
        self.reservations.get(id)
    }

    pub fn check_availability(
        &self,
        key: PositionKey,
        quantity: i64,
    ) -> DomainResult<AvailabilityCheck> {
        self.queries.check_availability(key, quantity)
    }

    pub fn get_history(
        &self,
        key: PositionKey,
        limit: usize,
    ) -> DomainResult<Vec<InventoryTransaction>> {
        self.queries.get_history(key, limit)
    }

    pub fn list_low_stock(
        &self,
        warehouse_id: Option<WarehouseId>,
    ) -> DomainResult<Vec<StockPosition>> {
        self.queries.list_low_stock(warehouse_id)
    }

    pub fn pending_approvals(&self, limit: usize) -> DomainResult<Vec<InventoryTransaction>> {
        self.queries.pending_approvals(limit)
    }

    pub fn warehouse_summary(&self, warehouse_id: WarehouseId) -> DomainResult<WarehouseSummary> {
        self.queries.warehouse_summary(warehouse_id)
    }

    // Alert configuration (administrator surface)

    pub fn upsert_alert_config(&self, config: &LowStockAlertConfig) -> DomainResult<()> {
        Ok(self.alert_configs.upsert(config)?)
    }

    pub fn delete_alert_config(&self, id: AlertConfigId) -> DomainResult<()> {
        Ok(self.alert_configs.delete(id)?)
    }

    pub fn list_alert_configs(&self) -> DomainResult<Vec<LowStockAlertConfig>> {
        Ok(self.alert_configs.list()?)
    }

    // Background workers

    /// Spawn the low-stock monitor as a bus consumer.
    pub fn spawn_monitor(&self) -> WorkerHandle {
        self.monitor.clone().spawn(self.bus.clone())
    }

    /// Spawn the reservation-expiry sweep on an interval.
    pub fn spawn_expiration_sweeper(&self, interval: Duration) -> WorkerHandle {
        ExpirationSweeper::spawn(self.reservations.clone(), self.clock.clone(), interval)
    }

    /// Run one expiry sweep inline (lazy alternative to the background
    /// sweeper).
    pub fn expire_due_reservations(&self) -> DomainResult<Vec<Reservation>> {
        self.reservations.expire_due(self.clock.now())
    }

    // Component access for advanced callers/tests

    pub fn ledger(&self) -> &Arc<StockLedger<B>> {
        &self.ledger
    }

    pub fn monitor(&self) -> &Arc<LowStockMonitor> {
        &self.monitor
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }
}

impl InventoryEngine<InMemoryEventBus<LedgerCommitted>> {
    /// Fully in-memory engine with default policies, wall-clock time, and
    /// log-only notifications.
    pub fn in_memory() -> Self {
        Self::in_memory_with(
            EngineConfig::default(),
            Arc::new(SystemClock),
            Arc::new(TracingSink),
        )
    }

    pub fn in_memory_with(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::new(
            Arc::new(InMemoryPositionStore::new()),
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryReservationStore::new()),
            Arc::new(InMemoryAlertConfigStore::new()),
            Arc::new(InMemoryEventBus::new()),
            clock,
            sink,
            config,
        )
    }
}

impl<B> InventoryEngine<B>
where
    B: EventBus<LedgerCommitted> + Send + Sync + 'static,
{
    /// Engine over one Postgres-backed ledger store.
    pub fn durable(
        store: PostgresLedgerStore,
        bus: Arc<B>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        let store = Arc::new(store);
        Self::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            bus,
            clock,
            sink,
            config,
        )
    }
}
