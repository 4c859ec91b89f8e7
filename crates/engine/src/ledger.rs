//! The stock ledger: the single mutation gate for stock positions.
//!
//! Every stock-affecting operation in the engine is expressed as one or more
//! calls to [`StockLedger::apply_delta`], which gives one place to enforce
//! the non-negative/backorder invariants and the optimistic-retry discipline.
//!
//! ## Concurrency
//!
//! No in-process lock is held across store calls. Writers on the same
//! position key are linearized by the store's conditional write: the writer
//! whose `save` commits first wins, losers observe a conflict and retry
//! against a fresh read, bounded by [`RetryPolicy`]. Operations on different
//! keys proceed fully in parallel.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use depot_core::{DomainResult, ExpectedVersion, TransactionId};
use depot_events::{EventBus, LedgerCommitted};
use depot_inventory::{PositionKey, StockDelta, StockPosition};
use depot_store::PositionStore;

use crate::clock::Clock;

/// Bounds for the compare-and-swap retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Base sleep between attempts; grows linearly with the attempt number.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(2),
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

/// Exclusive mutation gate for stock positions.
pub struct StockLedger<B>
where
    B: EventBus<LedgerCommitted>,
{
    positions: Arc<dyn PositionStore>,
    bus: Arc<B>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl<B> StockLedger<B>
where
    B: EventBus<LedgerCommitted>,
{
    pub fn new(
        positions: Arc<dyn PositionStore>,
        bus: Arc<B>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            positions,
            bus,
            clock,
            retry,
        }
    }

    /// Current position for a key; a zero position (version 0) if the key
    /// has never been written.
    pub fn get_position(&self, key: PositionKey) -> DomainResult<StockPosition> {
        Ok(self
            .positions
            .get(key)?
            .unwrap_or_else(|| StockPosition::empty(key, self.clock.now())))
    }

    /// Single-shot apply: read, verify `expected`, compute the candidate,
    /// conditional-write, publish.
    ///
    /// A version mismatch (against `expected`, or at the store's
    /// conditional write) surfaces as a retryable conflict and leaves the
    /// position untouched. Domain rejections (insufficient stock, invalid
    /// reservation) surface unchanged.
    pub fn apply_delta(
        &self,
        key: PositionKey,
        delta: StockDelta,
        expected: ExpectedVersion,
        transaction_id: Option<TransactionId>,
    ) -> DomainResult<StockPosition> {
        let now = self.clock.now();
        let current = self
            .positions
            .get(key)?
            .unwrap_or_else(|| StockPosition::empty(key, now));

        expected.check(current.version)?;

        let candidate = current.with_delta(delta, now)?;
        self.positions
            .save(&candidate, ExpectedVersion::Exact(current.version))?;

        let event = LedgerCommitted {
            product_id: candidate.product_id,
            warehouse_id: candidate.warehouse_id,
            delta_on_hand: delta.on_hand,
            delta_reserved: delta.reserved,
            on_hand: candidate.on_hand,
            reserved: candidate.reserved,
            available: candidate.available(),
            version: candidate.version,
            transaction_id,
            occurred_at: now,
        };

        // The position and transaction log are already durable; a publish
        // failure only delays consumers, which can rebuild from the log.
        if let Err(err) = self.bus.publish(event) {
            warn!(key = %key, error = ?err, "post-commit publish failed");
        }

        Ok(candidate)
    }

    /// Update a position's settings (thresholds, backorder permission)
    /// without touching quantities. Same CAS discipline as deltas; no
    /// post-commit event since availability is unchanged.
    pub fn configure_position(
        &self,
        key: PositionKey,
        min_stock_level: i64,
        max_stock_level: Option<i64>,
        allow_backorder: bool,
    ) -> DomainResult<StockPosition> {
        let mut attempt = 1;
        loop {
            let now = self.clock.now();
            let current = self
                .positions
                .get(key)?
                .unwrap_or_else(|| StockPosition::empty(key, now));

            let candidate = StockPosition {
                min_stock_level,
                max_stock_level,
                allow_backorder,
                last_updated: now,
                version: current.version + 1,
                ..current.clone()
            };

            match self
                .positions
                .save(&candidate, ExpectedVersion::Exact(current.version))
            {
                Ok(()) => return Ok(candidate),
                Err(err) => {
                    let err: depot_core::DomainError = err.into();
                    if err.is_retryable() && attempt < self.retry.max_attempts {
                        std::thread::sleep(self.retry.backoff_for(attempt));
                        attempt += 1;
                    } else {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Bounded compare-and-swap retry loop around [`apply_delta`].
    ///
    /// Each attempt reads fresh state, so `ExpectedVersion::Any` is passed
    /// down: lost-update protection comes from the store's conditional
    /// write, not from a caller-supplied token. Conflict is surfaced only
    /// once the attempt budget is exhausted.
    ///
    /// [`apply_delta`]: StockLedger::apply_delta
    pub fn apply_delta_retrying(
        &self,
        key: PositionKey,
        delta: StockDelta,
        transaction_id: Option<TransactionId>,
    ) -> DomainResult<StockPosition> {
        let mut attempt = 1;
        loop {
            match self.apply_delta(key, delta, ExpectedVersion::Any, transaction_id) {
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    debug!(key = %key, attempt, "conditional write lost, retrying");
                    std::thread::sleep(self.retry.backoff_for(attempt));
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{DomainError, ProductId, WarehouseId};
    use depot_events::InMemoryEventBus;
    use depot_store::InMemoryPositionStore;

    use crate::clock::SystemClock;

    fn test_key() -> PositionKey {
        PositionKey::new(ProductId::new(), WarehouseId::new())
    }

    fn ledger() -> (
        StockLedger<InMemoryEventBus<LedgerCommitted>>,
        Arc<InMemoryEventBus<LedgerCommitted>>,
    ) {
        let bus = Arc::new(InMemoryEventBus::new());
        let ledger = StockLedger::new(
            Arc::new(InMemoryPositionStore::new()),
            bus.clone(),
            Arc::new(SystemClock),
            RetryPolicy::default(),
        );
        (ledger, bus)
    }

    #[test]
    fn position_is_created_on_first_reference() {
        let (ledger, _bus) = ledger();
        let key = test_key();

        let position = ledger.get_position(key).unwrap();
        assert_eq!(position.on_hand, 0);
        assert_eq!(position.version, 0);
    }

    #[test]
    fn apply_publishes_post_commit_event() {
        let (ledger, bus) = ledger();
        let key = test_key();
        let sub = bus.subscribe();

        ledger
            .apply_delta(key, StockDelta::on_hand(25), ExpectedVersion::Exact(0), None)
            .unwrap();

        let event = sub.try_recv().unwrap();
        assert_eq!(event.key(), key);
        assert_eq!(event.on_hand, 25);
        assert_eq!(event.available, 25);
        assert_eq!(event.version, 1);
    }

    #[test]
    fn stale_expected_version_conflicts_without_effect() {
        let (ledger, _bus) = ledger();
        let key = test_key();

        ledger
            .apply_delta(key, StockDelta::on_hand(10), ExpectedVersion::Exact(0), None)
            .unwrap();

        let err = ledger
            .apply_delta(key, StockDelta::on_hand(5), ExpectedVersion::Exact(0), None)
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        assert_eq!(ledger.get_position(key).unwrap().on_hand, 10);
    }

    #[test]
    fn rejected_delta_leaves_position_unchanged() {
        let (ledger, _bus) = ledger();
        let key = test_key();

        ledger
            .apply_delta(key, StockDelta::on_hand(10), ExpectedVersion::Exact(0), None)
            .unwrap();
        let err = ledger
            .apply_delta_retrying(key, StockDelta::on_hand(-11), None)
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock(_)));

        let position = ledger.get_position(key).unwrap();
        assert_eq!(position.on_hand, 10);
        assert_eq!(position.version, 1);
    }

    #[test]
    fn no_lost_updates_under_contention() {
        // Generous retry budget: this test is about lost updates, not about
        // the bound itself.
        let bus = Arc::new(InMemoryEventBus::new());
        let ledger = Arc::new(StockLedger::new(
            Arc::new(InMemoryPositionStore::new()),
            bus,
            Arc::new(SystemClock),
            RetryPolicy {
                max_attempts: 100,
                backoff: Duration::from_micros(100),
            },
        ));
        let key = test_key();

        ledger
            .apply_delta_retrying(key, StockDelta::on_hand(1_000), None)
            .unwrap();

        let threads: i64 = 8;
        let per_thread: i64 = 25;
        let mut handles = Vec::new();
        for _ in 0..threads {
            let ledger = ledger.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..per_thread {
                    ledger
                        .apply_delta_retrying(key, StockDelta::on_hand(-1), None)
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let position = ledger.get_position(key).unwrap();
        assert_eq!(position.on_hand, 1_000 - threads * per_thread);
        assert_eq!(position.version, 1 + (threads * per_thread) as u64);
    }
}
