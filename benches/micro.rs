//! Micro-benchmarks for the engine's core operations.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- put       # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use spankv::{Engine, EngineConfig, KeyRange};
use std::sync::Arc;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Default value payload for benchmarks (128 bytes).
const VALUE_128B: &[u8; 128] = &[0xAB; 128];

/// Larger value payload (1 KiB).
const VALUE_1K: &[u8; 1024] = &[0xCD; 1024];

/// Format a zero-padded key.
fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

/// Open and start a fresh engine over a `{default, bench}` namespace set.
fn open_engine(tmp: &TempDir) -> (Engine, Arc<KeyRange>) {
    let mut config = EngineConfig::new(tmp.path().join("data"), tmp.path().join("checkpoints"));
    config.namespaces.push("bench".to_string());
    let engine = Engine::open(config).expect("open");
    engine.start(&[]).expect("start");
    let range = engine.new_key_range("bench", None, None).expect("range");
    (engine, range)
}

/// Pre-load `count` sequential keys.
fn preload(engine: &Engine, range: &Arc<KeyRange>, count: u64, value: &[u8]) {
    let batch = engine.start_batch().expect("batch");
    for i in 0..count {
        engine
            .batch_put(batch, range, make_key(i), value.to_vec())
            .expect("put");
    }
    engine.end_batch(batch).expect("commit");
}

// ------------------------------------------------------------------------------------------------
// Benchmarks
// ------------------------------------------------------------------------------------------------

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    for (label, value) in [("128b", &VALUE_128B[..]), ("1k", &VALUE_1K[..])] {
        group.throughput(Throughput::Bytes(value.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &value, |b, value| {
            let tmp = TempDir::new().unwrap();
            let (engine, range) = open_engine(&tmp);
            let mut i = 0u64;
            b.iter(|| {
                engine
                    .put(&range, make_key(i), value.to_vec())
                    .expect("put");
                i += 1;
            });
            engine.stop().expect("stop");
        });
    }
    group.finish();
}

fn bench_batched_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_put");
    for batch_size in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                let tmp = TempDir::new().unwrap();
                let (engine, range) = open_engine(&tmp);
                let mut i = 0u64;
                b.iter(|| {
                    let batch = engine.start_batch().expect("batch");
                    for _ in 0..batch_size {
                        engine
                            .batch_put(batch, &range, make_key(i), VALUE_128B.to_vec())
                            .expect("put");
                        i += 1;
                    }
                    engine.end_batch(batch).expect("commit");
                });
                engine.stop().expect("stop");
            },
        );
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    group.bench_function("memtable_hit", |b| {
        let tmp = TempDir::new().unwrap();
        let (engine, range) = open_engine(&tmp);
        preload(&engine, &range, 10_000, VALUE_128B);
        let mut i = 0u64;
        b.iter(|| {
            let value = engine.get("bench", &make_key(i % 10_000)).expect("get");
            black_box(value);
            i += 1;
        });
        engine.stop().expect("stop");
    });

    group.bench_function("missing_key", |b| {
        let tmp = TempDir::new().unwrap();
        let (engine, range) = open_engine(&tmp);
        preload(&engine, &range, 10_000, VALUE_128B);
        b.iter(|| {
            let value = engine.get("bench", b"absent-key").expect("get");
            black_box(value);
        });
        engine.stop().expect("stop");
    });

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    for span in [100u64, 1000] {
        group.throughput(Throughput::Elements(span));
        group.bench_with_input(BenchmarkId::from_parameter(span), &span, |b, &span| {
            let tmp = TempDir::new().unwrap();
            let (engine, range) = open_engine(&tmp);
            preload(&engine, &range, 10_000, VALUE_128B);
            b.iter(|| {
                let mut iter = engine
                    .iterator("bench", Some(&make_key(0)), Some(&make_key(span)))
                    .expect("iterator");
                let mut count = 0u64;
                let mut valid = iter.seek_first().expect("seek");
                while valid {
                    black_box(iter.value());
                    count += 1;
                    valid = iter.next().expect("next");
                }
                assert_eq!(count, span);
            });
            engine.stop().expect("stop");
        });
    }
    group.finish();
}

fn bench_approximate_size(c: &mut Criterion) {
    c.bench_function("approximate_size", |b| {
        let tmp = TempDir::new().unwrap();
        let (engine, range) = open_engine(&tmp);
        preload(&engine, &range, 10_000, VALUE_128B);
        b.iter(|| {
            let size = engine
                .approximate_size("bench", None, None)
                .expect("approximate_size");
            black_box(size);
        });
        engine.stop().expect("stop");
    });
}

criterion_group!(
    benches,
    bench_put,
    bench_batched_put,
    bench_get,
    bench_scan,
    bench_approximate_size
);
criterion_main!(benches);
