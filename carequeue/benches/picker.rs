//! Benchmarks for notification picking and full notifier cycles.

#![allow(missing_docs)]

use std::sync::Arc;

use carequeue::*;
use carequeue_testkit::{CareFixture, RecordingNotifier, ScriptedLease};
use chrono::Duration;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

/// Benchmark: picking among N licensed providers with one avoided region.
fn bench_pick_provider(c: &mut Criterion) {
    let rt = create_runtime();
    let sizes = vec![10, 100, 1000];

    let mut group = c.benchmark_group("pick_provider");
    group.sample_size(50);

    for size in &sizes {
        group.bench_with_input(BenchmarkId::new("in_memory", size), size, |b, &size| {
            let store = Arc::new(InMemoryCareStore::new());
            let ca = Region::new("CA");
            let ny = Region::new("NY");
            for id in 1..=size as i64 {
                store.license_provider(&ca, ProviderId(id));
                if id % 2 == 0 {
                    store.license_provider(&ny, ProviderId(id));
                }
            }
            let picker = NotifyPicker::with_seed(Arc::clone(&store), 42);
            let request = PickRequest {
                region: ca,
                regions_to_avoid: vec![ny],
                region_rate_limit: Duration::zero(),
                provider_rate_limit: Duration::zero(),
            };

            b.to_async(&rt).iter(|| async {
                picker
                    .pick_provider_to_notify(&request)
                    .await
                    .expect("pick should succeed");
            });
        });
    }

    group.finish();
}

/// Benchmark: a notifier cycle over many regions with rate limits disabled.
fn bench_notifier_cycle(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("notifier_cycle");
    group.sample_size(30);

    group.bench_function("fifty_regions", |b| {
        let mut fixture = CareFixture::new();
        for provider in 1..=200 {
            let region = format!("R{}", provider % 50);
            fixture = fixture
                .doctor(provider, "Dr. Bench")
                .licensed(&region, &[provider]);
        }
        rt.block_on(async {
            for case in 0..50 {
                fixture
                    .pool_case(1000 + case, 5000 + case, &format!("R{case}"), case)
                    .await
                    .expect("pool should succeed");
            }
        });

        let config = NotifierConfig {
            region_rate_limit_secs: 0,
            provider_rate_limit_secs: 0,
            ..NotifierConfig::default()
        };
        let worker = fixture
            .notifier_worker(
                config,
                Arc::new(RecordingNotifier::new()),
                Arc::new(ScriptedLease::new("bench")),
            )
            .expect("build should succeed");

        b.to_async(&rt).iter(|| async {
            worker.run_cycle().await.expect("cycle should succeed");
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pick_provider, bench_notifier_cycle);
criterion_main!(benches);
