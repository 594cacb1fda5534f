//! Benchmarks for batch fitting and the flush path.
//!
//! Benchmarks cover:
//! - Prefix search against the token-cost heuristic
//! - Queue snapshot and write-back
//! - A full flush with an instant generator

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use batchgate::config::{CostConfig, QuotaConfig};
use batchgate::core::{
    max_prefix_within_budget, AdmissionManager, BatchScheduler, Generation, GenerationError,
    Generator, QueueStore, SchedulerLimits, TokenCostModel, WorkItem,
};
use batchgate::infra::{InMemoryMailbox, InMemoryQueueStore, InMemoryRegistry};
use rand::Rng;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct InstantGenerator;

#[async_trait]
impl Generator for InstantGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _max_output_tokens: u64,
    ) -> Result<Generation, GenerationError> {
        Ok(Generation::text(format!("{} chars", prompt.len())))
    }
}

fn random_items(count: usize) -> Vec<WorkItem> {
    let mut rng = rand::rng();
    (0..count)
        .map(|n| {
            let chars = rng.random_range(200..4_000);
            WorkItem::new(format!("item-{n}"), "en", "title", "x".repeat(chars))
        })
        .collect()
}

fn bench_max_prefix(c: &mut Criterion) {
    let mut group = c.benchmark_group("max_prefix_within_budget");
    let model = TokenCostModel::new(CostConfig::default());

    for size in [10, 100, 1_000] {
        let items = random_items(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| black_box(max_prefix_within_budget(&model, items, 30_000)));
        });
    }
    group.finish();
}

fn bench_queue_write_back(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_write_back");

    for size in [100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut store = InMemoryQueueStore::new();
                for item in random_items(size) {
                    store.enqueue("bench", item).unwrap();
                }
                let taken = store.remove_prefix("bench", size).unwrap();
                store.push_front("bench", taken[size / 2..].to_vec()).unwrap();
                black_box(store.len("bench"));
            });
        });
    }
    group.finish();
}

fn bench_flush(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("flush");

    let quota = QuotaConfig {
        max_requests_per_minute: u32::MAX,
        max_tokens_per_minute: u64::MAX / 2,
        max_tokens_per_call: 30_000,
        ..QuotaConfig::default()
    };
    let limits = SchedulerLimits {
        batch_threshold: 5,
        max_queue_depth: 100_000,
        call_timeout: Duration::from_secs(5),
        max_output_tokens: 1_024,
    };

    for size in [5, 50, 200] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| {
                let quota = quota.clone();
                let limits = limits.clone();
                async move {
                    let registry = InMemoryRegistry::new();
                    registry.subscribe("bench", "chan-1", "en");
                    registry.subscribe("bench", "chan-2", "en");
                    let sched = BatchScheduler::new(
                        limits,
                        Arc::new(AdmissionManager::new(quota)),
                        InMemoryQueueStore::new(),
                        InstantGenerator,
                        registry,
                        InMemoryMailbox::new(),
                    );
                    for item in random_items(size) {
                        sched.enqueue("bench", item).unwrap();
                    }
                    let cancel = CancellationToken::new();
                    while !sched.is_empty("bench") {
                        black_box(sched.flush("bench", &cancel).await.unwrap());
                    }
                }
            });
        });
    }
    group.finish();
}

criterion_group!(fitter_benches, bench_max_prefix, bench_queue_write_back);
criterion_group!(flush_benches, bench_flush);
criterion_main!(fitter_benches, flush_benches);
