//! Benchmarks for lsreset
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lsreset::attr::{AttributeMutator, MemoryStore};
use lsreset::dispatch::{Dispatcher, ParallelExecutor, SequentialExecutor, TaskResult, WorkerConfig};
use lsreset::sampler::Sampler;
use lsreset::walker::FileTask;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn tasks(n: usize) -> Vec<FileTask> {
    (0..n)
        .map(|i| FileTask::new(format!("/bench/dir{}/file{}.md", i % 64, i), "md"))
        .collect()
}

fn benchmark_dispatch(c: &mut Criterion) {
    let store = MemoryStore::new();
    for task in tasks(10_000) {
        store.add_file(task.path, false);
    }
    let mutator = AttributeMutator::new(store);
    let check = |path: &std::path::Path| mutator.check(path);
    let sink = |_: &FileTask, r: &TaskResult| {
        black_box(r);
    };

    let config = WorkerConfig {
        worker_count: 4,
        chunk_size: 256,
        ..WorkerConfig::default()
    };
    let shutdown = Arc::new(AtomicBool::new(false));
    let parallel = ParallelExecutor::new(config.clone(), Arc::clone(&shutdown));
    let sequential = SequentialExecutor::new(config, shutdown);

    c.bench_function("dispatch_parallel_10k", |b| {
        b.iter(|| black_box(parallel.run(tasks(10_000), &check, &sink).processed()))
    });

    c.bench_function("dispatch_sequential_10k", |b| {
        b.iter(|| black_box(sequential.run(tasks(10_000), &check, &sink).processed()))
    });
}

fn benchmark_sampling(c: &mut Criterion) {
    c.bench_function("reservoir_sample_50_of_100k", |b| {
        let mut sampler = Sampler::new(50, Some(1));
        b.iter(|| {
            let result = sampler.sample("md", tasks(100_000), |_| Ok(false));
            black_box(result);
        })
    });
}

criterion_group!(benches, benchmark_dispatch, benchmark_sampling);
criterion_main!(benches);
