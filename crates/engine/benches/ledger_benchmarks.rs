//! Benchmarks for the apply-delta hot path.

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use depot_core::{ActorId, ProductId, WarehouseId};
use depot_engine::{ApprovalPolicy, EngineConfig, InMemoryEngine, RetryPolicy};
use depot_inventory::PositionKey;

fn bench_engine() -> InMemoryEngine {
    InMemoryEngine::in_memory_with(
        EngineConfig {
            approval: ApprovalPolicy::with_limit(i64::MAX),
            retry: RetryPolicy::default(),
        },
        Arc::new(depot_engine::SystemClock),
        Arc::new(depot_engine::TracingSink),
    )
}

fn bench_apply_delta(c: &mut Criterion) {
    let engine = bench_engine();
    let actor = ActorId::new();
    let key = PositionKey::new(ProductId::new(), WarehouseId::new());
    engine.adjust(key, 1_000_000, "seed", actor, None).unwrap();

    c.bench_function("adjust_single_key", |b| {
        b.iter(|| {
            engine.adjust(key, 1, "bench", actor, None).unwrap();
        })
    });
}

fn bench_reserve_release(c: &mut Criterion) {
    let engine = bench_engine();
    let actor = ActorId::new();
    let key = PositionKey::new(ProductId::new(), WarehouseId::new());
    engine.adjust(key, 1_000_000, "seed", actor, None).unwrap();

    c.bench_function("reserve_release_cycle", |b| {
        b.iter(|| {
            let reservation = engine
                .reserve(key, 1, None, None, actor)
                .unwrap()
                .reservation()
                .unwrap();
            engine.release(reservation.id, None, actor).unwrap();
        })
    });
}

criterion_group!(benches, bench_apply_delta, bench_reserve_release);
criterion_main!(benches);
