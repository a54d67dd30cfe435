use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

use tabula_collab::registry::RoomRegistry;
use tabula_collab::storage::MemorySnapshotStore;
use tabula_engine::CrdtEngine;

fn bench_get_or_create(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let registry = Arc::new(RoomRegistry::new(
        Arc::new(CrdtEngine::new()),
        Arc::new(MemorySnapshotStore::new()),
    ));
    rt.block_on(registry.get_or_create("hot")).unwrap();

    c.bench_function("get_or_create_resident", |b| {
        b.iter(|| {
            let session = rt
                .block_on(registry.get_or_create(black_box("hot")))
                .unwrap();
            black_box(session);
        })
    });

    let mut n = 0u64;
    c.bench_function("get_or_create_cold", |b| {
        b.iter(|| {
            n += 1;
            let id = format!("cold-{n}");
            let session = rt.block_on(registry.get_or_create(&id)).unwrap();
            black_box(session);
        })
    });
}

criterion_group!(benches, bench_get_or_create);
criterion_main!(benches);
