//! Detection + arbitration hot path.

use std::sync::Arc;

use chrono::{Duration, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use warden::{
    Arbiter, ArbiterConfig, FixedEstimator, InMemoryAuditLog, InMemoryWorld, NullEscalationSink,
    NullOutcomeSink, Proposal, ProducerId, Resource, ResourceClaim, ResourceKind, TimeWindow,
    WorldModel, Zone,
};

fn arbiter_with_batch(contenders: usize) -> Arbiter {
    let world = Arc::new(InMemoryWorld::new());
    let zone = Zone::new("bench-zone");
    world.add_zone(zone.clone()).unwrap();
    let resource = Resource::new("bench-resource", ResourceKind::Segment, zone.id);
    world.add_resource(resource.clone()).unwrap();

    let arbiter = Arbiter::new(
        ArbiterConfig {
            confidence_threshold: 0.0,
            complexity_threshold: 1000,
            ..ArbiterConfig::default()
        },
        Arc::clone(&world) as Arc<dyn WorldModel>,
        Arc::new(FixedEstimator::default()),
        Box::new(NullEscalationSink),
        Arc::new(NullOutcomeSink),
        Arc::new(InMemoryAuditLog::new()),
    );

    let now = Utc::now();
    for i in 0..contenders {
        let start = now + Duration::minutes(10 + i as i64);
        let proposal = Proposal::builder()
            .producer(ProducerId::new(), "bench")
            .claim(ResourceClaim::exclusive(resource.id))
            .window(TimeWindow::new(start, start + Duration::minutes(20)).unwrap())
            .priority(((i % 10) + 1) as u8)
            .risk(0.1)
            .uncertainty(0.1)
            .rationale("bench proposal")
            .snapshot(world.snapshot().unwrap())
            .build()
            .unwrap();
        arbiter.enqueue(proposal).unwrap();
    }
    arbiter
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_contended_batch");
    for contenders in [2usize, 8, 16] {
        group.bench_function(format!("{contenders}_proposals"), |b| {
            b.iter_batched(
                || arbiter_with_batch(contenders),
                |arbiter| arbiter.resolve_pending().unwrap(),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resolve);
criterion_main!(benches);
