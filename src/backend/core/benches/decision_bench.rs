//! Benchmarks for the decision hot path.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::sync::Arc;
use warden_core::access::{AccessDecisionEngine, HierarchyLevel, Principal, ResourcePath, Role};
use warden_core::cache::{Cache, CacheKey};
use warden_core::config::Config;
use warden_core::store::MemoryStore;

const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/acme.json");

const PATHS: [&str; 4] = [
    "hrm",
    "hrm.leave",
    "hrm.leave.requests",
    "hrm.leave.requests.approve",
];

fn build_engine() -> AccessDecisionEngine {
    let store = Arc::new(MemoryStore::from_path(FIXTURE).unwrap());
    AccessDecisionEngine::from_store(store, Cache::in_memory(100_000), &Config::default())
}

fn manager() -> Principal {
    Principal::new(1, Some(1), vec![Role::new(1, "hr-manager")])
}

fn bench_resource_path_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("resource_path_parse");

    for raw in PATHS {
        group.bench_with_input(BenchmarkId::from_parameter(raw), &raw, |b, raw| {
            b.iter(|| black_box(raw.parse::<ResourcePath>().unwrap()));
        });
    }

    group.finish();
}

fn bench_cache_key_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("decision_cache_key");

    group.bench_function("access_check", |b| {
        b.iter(|| black_box(CacheKey::access_check(1, HierarchyLevel::Action, 1000).build()));
    });

    group.bench_function("access_scope", |b| {
        b.iter(|| black_box(CacheKey::access_scope(1, 1000).build()));
    });

    group.finish();
}

fn bench_decision_warm(c: &mut Criterion) {
    let mut group = c.benchmark_group("decision_warm");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = build_engine();
    let principal = manager();

    for raw in PATHS {
        let path: ResourcePath = raw.parse().unwrap();
        rt.block_on(async {
            engine.check(&principal, &path).await.unwrap();
        });

        group.bench_with_input(BenchmarkId::from_parameter(raw), &path, |b, path| {
            b.iter(|| {
                rt.block_on(async { black_box(engine.check(&principal, path).await.unwrap()) })
            });
        });
    }

    group.finish();
}

fn bench_decision_cold(c: &mut Criterion) {
    let mut group = c.benchmark_group("decision_cold");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let path: ResourcePath = "hrm.leave.requests.approve".parse().unwrap();
    let principal = manager();

    group.bench_function("action_cascade", |b| {
        b.iter_batched(
            build_engine,
            |engine| {
                rt.block_on(async {
                    black_box(engine.can_perform_action(&principal, &path).await.unwrap())
                })
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_accessible_modules(c: &mut Criterion) {
    let mut group = c.benchmark_group("accessible_modules");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = build_engine();
    let principal = Principal::new(
        1,
        Some(1),
        vec![Role::new(1, "hr-manager"), Role::new(4, "accountant")],
    );
    rt.block_on(async {
        engine.get_accessible_modules(&principal).await.unwrap();
    });

    group.bench_function("warm", |b| {
        b.iter(|| {
            rt.block_on(async { black_box(engine.get_accessible_modules(&principal).await.unwrap()) })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_resource_path_parse,
    bench_cache_key_build,
    bench_decision_warm,
    bench_decision_cold,
    bench_accessible_modules,
);
criterion_main!(benches);
