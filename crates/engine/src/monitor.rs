//! Low-stock monitor: threshold evaluation over post-commit ledger events.
//!
//! The monitor consumes [`LedgerCommitted`] events and evaluates the alert
//! configs scoped to the affected position. A config alerts at most once per
//! threshold crossing: it disarms when it fires and re-arms only after
//! availability climbs back above the threshold, so a steady drain below
//! the threshold cannot cause an alert storm.

use std::sync::{Arc, Mutex};

use tracing::warn;

use depot_core::DomainResult;
use depot_events::{EventBus, LedgerCommitted, Worker, WorkerHandle};
use depot_inventory::LowStockAlert;
use depot_store::AlertConfigStore;

/// Destination for raised alerts (email/webhook adapters live behind this).
pub trait NotificationSink: Send + Sync {
    fn notify(&self, alert: &LowStockAlert);
}

impl<S> NotificationSink for Arc<S>
where
    S: NotificationSink + ?Sized,
{
    fn notify(&self, alert: &LowStockAlert) {
        (**self).notify(alert)
    }
}

/// Sink that surfaces alerts through the process log.
#[derive(Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, alert: &LowStockAlert) {
        warn!(
            product = %alert.product_id,
            warehouse = %alert.warehouse_id,
            available = alert.available,
            threshold = alert.threshold,
            "low stock"
        );
    }
}

/// Sink that stores alerts for inspection (tests, admin surfaces).
#[derive(Debug, Default)]
pub struct CollectingSink {
    inner: Mutex<Vec<LowStockAlert>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<LowStockAlert> {
        self.inner.lock().expect("sink lock poisoned").clone()
    }
}

impl NotificationSink for CollectingSink {
    fn notify(&self, alert: &LowStockAlert) {
        self.inner.lock().expect("sink lock poisoned").push(alert.clone());
    }
}

/// Evaluates low-stock thresholds after each ledger commit.
pub struct LowStockMonitor {
    configs: Arc<dyn AlertConfigStore>,
    sink: Arc<dyn NotificationSink>,
}

impl LowStockMonitor {
    pub fn new(configs: Arc<dyn AlertConfigStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { configs, sink }
    }

    /// Process one post-commit event. Idempotent: replaying an event
    /// re-evaluates the same armed state and raises nothing new.
    pub fn handle(&self, event: &LedgerCommitted) -> DomainResult<Vec<LowStockAlert>> {
        let configs = self.configs.list_for_key(event.key())?;
        let mut raised = Vec::new();

        if event.decreased_availability() {
            for config in &configs {
                if config.breached_by(event.available) && self.configs.is_armed(config.id)? {
                    let alert = LowStockAlert {
                        config_id: config.id,
                        product_id: event.product_id,
                        warehouse_id: event.warehouse_id,
                        available: event.available,
                        threshold: config.threshold,
                        occurred_at: event.occurred_at,
                    };
                    self.sink.notify(&alert);
                    self.configs.set_armed(config.id, false)?;
                    raised.push(alert);
                }
            }
        } else {
            // Re-arm once availability is strictly above the threshold again.
            for config in &configs {
                if event.available > config.threshold {
                    self.configs.set_armed(config.id, true)?;
                }
            }
        }

        Ok(raised)
    }

    /// Spawn the monitor as a background consumer of the ledger bus.
    pub fn spawn<B>(self: Arc<Self>, bus: B) -> WorkerHandle
    where
        B: EventBus<LedgerCommitted> + Send + Sync + 'static,
    {
        Worker::spawn("low-stock-monitor", bus, move |event: LedgerCommitted| {
            self.handle(&event).map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use depot_core::{ProductId, WarehouseId};
    use depot_inventory::{AlertScope, LowStockAlertConfig, NotifyPolicy, PositionKey};
    use depot_store::InMemoryAlertConfigStore;

    fn event(key: PositionKey, delta_on_hand: i64, available: i64) -> LedgerCommitted {
        LedgerCommitted {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            delta_on_hand,
            delta_reserved: 0,
            on_hand: available,
            reserved: 0,
            available,
            version: 1,
            transaction_id: None,
            occurred_at: Utc::now(),
        }
    }

    fn setup(threshold: i64, key: PositionKey) -> (LowStockMonitor, Arc<CollectingSink>) {
        let configs = Arc::new(InMemoryAlertConfigStore::new());
        let config = LowStockAlertConfig::new(
            AlertScope::Position {
                product_id: key.product_id,
                warehouse_id: key.warehouse_id,
            },
            threshold,
            NotifyPolicy::default(),
            Utc::now(),
        )
        .unwrap();
        configs.upsert(&config).unwrap();

        let sink = Arc::new(CollectingSink::new());
        (LowStockMonitor::new(configs, sink.clone()), sink)
    }

    #[test]
    fn alert_fires_once_per_crossing() {
        let key = PositionKey::new(ProductId::new(), WarehouseId::new());
        let (monitor, sink) = setup(50, key);

        // 51 -> 49 crosses the threshold: exactly one alert.
        let raised = monitor.handle(&event(key, -2, 49)).unwrap();
        assert_eq!(raised.len(), 1);

        // Further decrease while below threshold: silent.
        let raised = monitor.handle(&event(key, -9, 40)).unwrap();
        assert!(raised.is_empty());
        assert_eq!(sink.all().len(), 1);
    }

    #[test]
    fn alert_rearms_above_threshold() {
        let key = PositionKey::new(ProductId::new(), WarehouseId::new());
        let (monitor, sink) = setup(50, key);

        monitor.handle(&event(key, -2, 49)).unwrap();
        // Climbing to the threshold exactly does not re-arm...
        monitor.handle(&event(key, 1, 50)).unwrap();
        monitor.handle(&event(key, -1, 49)).unwrap();
        assert_eq!(sink.all().len(), 1);

        // ...climbing above it does.
        monitor.handle(&event(key, 11, 60)).unwrap();
        let raised = monitor.handle(&event(key, -15, 45)).unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(sink.all().len(), 2);
    }

    #[test]
    fn increases_never_alert() {
        let key = PositionKey::new(ProductId::new(), WarehouseId::new());
        let (monitor, sink) = setup(50, key);

        let raised = monitor.handle(&event(key, 10, 20)).unwrap();
        assert!(raised.is_empty());
        assert!(sink.all().is_empty());
    }
}
