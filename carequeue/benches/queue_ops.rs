//! Benchmarks for queue operations using criterion.
//!
//! These benchmarks measure:
//! - Deduplicated insert into a provider queue
//! - Mixed batches (remove, remove, insert) as produced by case reassignment
//! - Pending listing with position assignment over growing queues
//! - Routing one event end to end through the dispatcher

#![allow(missing_docs)]

use std::sync::Arc;

use carequeue::*;
use carequeue_testkit::{CareFixture, RecordingNotifier};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

/// Creates a tokio runtime for async benchmarks.
fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

fn message(provider_id: ProviderId, item_id: i64, status: ItemStatus) -> QueueItem {
    QueueItem::new(provider_id, item_id, EventType::CaseMessage, status)
        .with_patient(PatientId(7))
        .with_description("Message from Ada Lovelace", "New message")
        .with_tags(["Acne"])
}

/// Benchmark: deduplicated insert of an item that is already queued.
fn bench_insert_deduped(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("insert_deduped");
    group.sample_size(100);

    group.bench_function("in_memory", |b| {
        let store = Arc::new(InMemoryCareStore::new());
        let provider = ProviderId(1);

        b.to_async(&rt).iter(|| async {
            store
                .apply_transitions(
                    provider,
                    vec![QueueTransition::insert_deduped(message(
                        provider,
                        42,
                        ItemStatus::Pending,
                    ))],
                )
                .await
                .expect("apply should succeed");
        });
    });

    group.finish();
}

/// Benchmark: reassignment-shaped batches against queues of varying depth.
fn bench_reassignment_batch(c: &mut Criterion) {
    let rt = create_runtime();
    let depths = vec![10, 100, 1000];

    let mut group = c.benchmark_group("reassignment_batch");
    group.sample_size(50);

    for depth in &depths {
        group.throughput(Throughput::Elements(3));
        group.bench_with_input(BenchmarkId::new("in_memory", depth), depth, |b, &depth| {
            let store = Arc::new(InMemoryCareStore::new());
            let provider = ProviderId(1);
            rt.block_on(async {
                let seed = (1..=depth as i64)
                    .map(|id| QueueTransition::insert(message(provider, id, ItemStatus::Pending)))
                    .collect();
                store
                    .apply_transitions(provider, seed)
                    .await
                    .expect("seed should succeed");
            });

            b.to_async(&rt).iter(|| async {
                let key = ItemKey::new(provider, 5, EventType::CaseMessage, ItemStatus::Pending);
                store
                    .apply_transitions(
                        provider,
                        vec![
                            QueueTransition::remove(key.clone()),
                            QueueTransition::remove(ItemKey::new(
                                provider,
                                5,
                                EventType::CaseAssignment,
                                ItemStatus::Pending,
                            )),
                            QueueTransition::insert(message(provider, 5, ItemStatus::Pending)),
                        ],
                    )
                    .await
                    .expect("apply should succeed");
            });
        });
    }

    group.finish();
}

/// Benchmark: pending listing, which sorts and assigns positions.
fn bench_pending_listing(c: &mut Criterion) {
    let rt = create_runtime();
    let depths = vec![10, 100, 1000];

    let mut group = c.benchmark_group("pending_listing");
    group.sample_size(50);

    for depth in &depths {
        group.throughput(Throughput::Elements(*depth as u64));
        group.bench_with_input(BenchmarkId::new("in_memory", depth), depth, |b, &depth| {
            let store = Arc::new(InMemoryCareStore::new());
            let provider = ProviderId(1);
            rt.block_on(async {
                let seed = (1..=depth as i64)
                    .map(|id| QueueTransition::insert(message(provider, id, ItemStatus::Pending)))
                    .collect();
                store
                    .apply_transitions(provider, seed)
                    .await
                    .expect("seed should succeed");
            });

            b.to_async(&rt).iter(|| async {
                let items = store.pending_items(provider).await.expect("listing should succeed");
                assert_eq!(items.len(), depth);
            });
        });
    }

    group.finish();
}

/// Benchmark: one case assignment routed through the dispatcher.
fn bench_route_assignment(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("route_assignment");
    group.sample_size(100);

    group.bench_function("in_memory", |b| {
        let fixture = CareFixture::new()
            .doctor(10, "Dr. Kohen")
            .care_coordinator(20, "Sam")
            .patient(30, "Ada", "Lovelace")
            .case(40, 30, "Acne");
        let router = fixture.router(Arc::new(RecordingNotifier::new()));
        let event = DomainEvent::CaseAssigned(CaseAssigned {
            case_id: CaseId(40),
            assigned_by: ProviderId(20),
            assigned_to: ProviderId(10),
            automated: false,
        });

        b.to_async(&rt).iter(|| async {
            router.route(&event).await.expect("route should succeed");
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_insert_deduped,
    bench_reassignment_batch,
    bench_pending_listing,
    bench_route_assignment
);
criterion_main!(benches);
