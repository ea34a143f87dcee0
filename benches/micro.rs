//! Micro-benchmarks for the cache engine's commit and replay paths.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- submit    # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::Rng;

use batchwal::config::{CacheConfig, FlushMode};
use batchwal::engine::CacheEngine;
use batchwal::executor::InMemorySqlExecutor;
use batchwal::registry::{EntityTypeDescriptor, EntityTypeRegistry};
use batchwal::wal::codec::{Entry, Op, Value};
use tempfile::TempDir;

fn registry() -> EntityTypeRegistry {
    let mut r = EntityTypeRegistry::new();
    r.register(EntityTypeDescriptor::new("customer", "id"));
    r
}

fn open_engine(dir: &std::path::Path, flush_mode: FlushMode) -> CacheEngine {
    let registry = registry();
    let mut config = CacheConfig::with_dir(dir);
    config.wal.flush_mode = flush_mode;
    let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
    CacheEngine::open(config, executor, registry).unwrap()
}

fn insert_entry(id: i64) -> Entry {
    Entry {
        tenant: "t1".to_string(),
        table: "customer".to_string(),
        op: Op::Insert,
        data: vec![
            ("id".to_string(), Value::Int64(id)),
            ("name".to_string(), Value::Str("Alice".to_string())),
        ],
    }
}

// ================================================================================================
// Submission benchmarks
// ================================================================================================

/// Benchmark group for `submit_batch`.
///
/// # Sub-benchmarks
///
/// ## `single_entry/fsync_per_batch`
///
/// **Scenario:** Submits a single-entry batch with `FlushMode::PerBatch`, forcing an
/// `fsync` of the active WAL segment on every call.
///
/// **What it measures:** The full three-phase commit protocol (WAL append + fsync, DB
/// transaction, Store apply) under the durability-maximizing flush mode.
///
/// **Expected behaviour:** Dominated by the fsync; the in-memory DB and Store steps are
/// comparatively cheap.
///
/// ## `single_entry/every_n`
///
/// **Scenario:** Same as above but with `FlushMode::EveryN(64)`, syncing only every 64th
/// batch.
///
/// **What it measures:** Commit latency with fsync amortized across many batches —
/// isolates the non-durability-bound cost of the commit path.
///
/// ## `multi_entry/10`
///
/// **Scenario:** Submits a 10-entry batch spanning one tenant.
///
/// **What it measures:** How commit latency scales with batch size once WAL encoding,
/// DB-transaction entry application, and Store application all touch every entry.
fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit");

    group.bench_function(BenchmarkId::new("single_entry", "fsync_per_batch"), |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(dir.path(), FlushMode::PerBatch);
        let mut seq = 0i64;
        b.iter(|| {
            let result = engine.submit_batch(vec![black_box(insert_entry(seq))]);
            assert!(result.success);
            seq += 1;
        });
    });

    group.bench_function(BenchmarkId::new("single_entry", "every_n"), |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(dir.path(), FlushMode::EveryN(64));
        let mut seq = 0i64;
        b.iter(|| {
            let result = engine.submit_batch(vec![black_box(insert_entry(seq))]);
            assert!(result.success);
            seq += 1;
        });
    });

    group.bench_function(BenchmarkId::new("multi_entry", "10"), |b| {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(dir.path(), FlushMode::EveryN(64));
        let mut seq = 0i64;
        b.iter(|| {
            let entries: Vec<_> = (0..10).map(|_| { seq += 1; insert_entry(seq) }).collect();
            let result = engine.submit_batch(black_box(entries));
            assert!(result.success);
        });
    });

    group.finish();
}

// ================================================================================================
// Read benchmarks
// ================================================================================================

/// Benchmark group for `CacheEngine::get`.
///
/// # Sub-benchmarks
///
/// ## `hit` and `miss`
///
/// **Scenario:** Looks up keys in a Store pre-populated with 10,000 records, split between
/// existing and never-written keys.
///
/// **What it measures:** Pure in-memory keyed-store lookup latency — a single `RwLock`
/// read guard plus a hash-map probe.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path(), FlushMode::EveryN(1_000));
    let n = 10_000i64;
    for i in 0..n {
        let result = engine.submit_batch(vec![insert_entry(i)]);
        assert!(result.success);
    }

    group.bench_function("hit", |b| {
        let mut i = 0i64;
        b.iter(|| {
            let _ = black_box(engine.get("customer", "t1", &(i % n).to_string()));
            i += 1;
        });
    });

    group.bench_function("miss", |b| {
        let mut i = 0i64;
        b.iter(|| {
            let _ = black_box(engine.get("customer", "t1", &(n + i).to_string()));
            i += 1;
        });
    });

    group.finish();
}

// ================================================================================================
// Recovery (replay) benchmark
// ================================================================================================

/// Benchmark group for startup replay latency.
///
/// # Sub-benchmarks
///
/// ## `open_existing/{1000,10000}`
///
/// **Scenario:** A WAL is pre-populated with N single-entry batches via a prior engine
/// instance, then `CacheEngine::open` is called against a fresh executor (no persisted
/// checkpoint), forcing a full replay from offset zero.
///
/// **What it measures:** Cold-start recovery time — sequential WAL read, codec decode,
/// and idempotent Store repopulation for the full WAL contents.
///
/// **Expected behaviour:** Scales roughly linearly with record count; the 10,000-entry
/// case should take noticeably longer than the 1,000-entry case.
fn bench_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("recovery");
    group.sample_size(10);

    for &count in &[1_000i64, 10_000] {
        group.bench_function(BenchmarkId::new("open_existing", count), |b| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    {
                        let engine = open_engine(dir.path(), FlushMode::EveryN(10_000));
                        for i in 0..count {
                            let result = engine.submit_batch(vec![insert_entry(i)]);
                            assert!(result.success);
                        }
                        engine.shutdown(5_000).unwrap();
                    }
                    dir
                },
                |dir| {
                    // A fresh executor with no checkpoint forces the full WAL
                    // to replay on open.
                    let registry = registry();
                    let executor = Box::new(InMemorySqlExecutor::new(registry.clone()));
                    let engine =
                        CacheEngine::open(CacheConfig::with_dir(dir.path()), executor, registry)
                            .unwrap();
                    black_box(engine.statistics().store_size);
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

// ================================================================================================
// Batch-size scaling
// ================================================================================================

/// Benchmark group for batch-size scaling analysis.
///
/// # Sub-benchmarks
///
/// ## `entries/{1,10,50,200}`
///
/// **Scenario:** Submits a single batch of the given entry count, all within one tenant.
///
/// **What it measures:** How commit latency and per-entry throughput scale with batch
/// size. `Throughput::Elements` enables per-entry reporting.
///
/// **Expected behaviour:** Near-linear total latency with batch size; per-entry cost
/// should decrease slightly for larger batches since the fixed per-batch WAL-append and
/// DB-transaction overhead amortizes across more entries.
fn bench_batch_size_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_size_scaling");

    for &size in &[1u64, 10, 50, 200] {
        group.throughput(Throughput::Elements(size));
        group.bench_function(BenchmarkId::new("entries", size), |b| {
            let dir = TempDir::new().unwrap();
            let engine = open_engine(dir.path(), FlushMode::EveryN(1_000));
            let mut seq = 0i64;
            b.iter(|| {
                let entries: Vec<_> = (0..size)
                    .map(|_| {
                        seq += 1;
                        insert_entry(seq)
                    })
                    .collect();
                let result = engine.submit_batch(black_box(entries));
                assert!(result.success);
            });
        });
    }

    group.finish();
}

// ================================================================================================
// Mixed read/write workload
// ================================================================================================

/// Benchmark group for a YCSB-style mixed read/write workload.
///
/// # Sub-benchmarks
///
/// ## `95_read_5_write` and `50_read_50_write`
///
/// **Scenario:** Pre-populates 5,000 records, then issues a stream of operations drawn
/// from the given read/write mix — reads via `get`, writes via single-entry `UPDATE`
/// batches against a randomly chosen existing key.
///
/// **What it measures:** Sustained throughput under realistic access patterns that
/// interleave the cheap Store-only read path with the full WAL/DB/Store write path.
///
/// **Expected behaviour:** `95_read_5_write` should be substantially faster than
/// `50_read_50_write` since reads never touch the WAL or the executor.
fn bench_mixed_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_workload");
    group.sample_size(10);

    let n = 5_000i64;

    for &(label, write_pct) in &[("95_read_5_write", 5u8), ("50_read_50_write", 50u8)] {
        group.bench_function(label, |b| {
            let dir = TempDir::new().unwrap();
            let engine = open_engine(dir.path(), FlushMode::EveryN(1_000));
            for i in 0..n {
                let result = engine.submit_batch(vec![insert_entry(i)]);
                assert!(result.success);
            }

            let mut rng = rand::rng();
            b.iter(|| {
                let key = rng.random_range(0..n);
                if rng.random_range(0..100) < write_pct {
                    let result = engine.submit_batch(vec![insert_entry(key)]);
                    black_box(result.success);
                } else {
                    let _ = black_box(engine.get("customer", "t1", &key.to_string()));
                }
            });
        });
    }

    group.finish();
}

// ================================================================================================
// Shutdown benchmark
// ================================================================================================

/// Benchmark group for graceful `shutdown` latency.
///
/// # Sub-benchmarks
///
/// ## `empty` and `after_writes`
///
/// **Scenario:** Shuts down an engine immediately after open, versus after 1,000
/// submitted batches.
///
/// **What it measures:** Shutdown cost — draining in-flight batches (none outstanding in
/// either case here) and flushing the active WAL segment.
fn bench_shutdown(c: &mut Criterion) {
    let mut group = c.benchmark_group("shutdown");
    group.sample_size(10);

    group.bench_function("empty", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let engine = open_engine(dir.path(), FlushMode::PerBatch);
                (dir, engine)
            },
            |(_dir, engine)| {
                engine.shutdown(5_000).unwrap();
            },
            BatchSize::PerIteration,
        );
    });

    group.bench_function("after_writes", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let engine = open_engine(dir.path(), FlushMode::EveryN(1_000));
                for i in 0..1_000i64 {
                    let result = engine.submit_batch(vec![insert_entry(i)]);
                    assert!(result.success);
                }
                (dir, engine)
            },
            |(_dir, engine)| {
                engine.shutdown(5_000).unwrap();
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

// ================================================================================================
// Group registration
// ================================================================================================

criterion_group!(
    benches,
    bench_submit,
    bench_get,
    bench_recovery,
    bench_batch_size_scaling,
    bench_mixed_workload,
    bench_shutdown,
);

criterion_main!(benches);
