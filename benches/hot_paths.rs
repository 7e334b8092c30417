//! Hot path benchmarks for profiling-driven optimization.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! Covers the CPU-bound parts of a delivery: building the zip archive,
//! concatenating job files, reading API files, and splitting references
//! into status chunks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use letter_courier::archive::pack;
use letter_courier::delivery::{concat_job_files, notification_references, reference_from_key};
use letter_courier::fanout::chunk;

/// Benchmark archive::pack with realistic letter counts
fn bench_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive_pack");

    for letters in [1, 50, 500] {
        let entries: Vec<(String, Bytes)> = (0..letters)
            .map(|i| {
                (
                    format!("NOTIFY.REF{:06}.D.2.C.C.20170101173000.PDF", i),
                    Bytes::from(vec![b'%'; 16 * 1024]),
                )
            })
            .collect();
        group.throughput(Throughput::Bytes((letters * 16 * 1024) as u64));

        group.bench_function(format!("letters_{}", letters), |b| {
            b.iter(|| pack(black_box(&entries)))
        });
    }

    group.finish();
}

/// Benchmark job file concatenation
fn bench_concat_job_files(c: &mut Criterion) {
    let mut group = c.benchmark_group("concat_job_files");

    let files: Vec<Bytes> = (0..200)
        .map(|i| {
            let mut row = format!("job {} ", i).into_bytes();
            row.resize(4096, b'x');
            Bytes::from(row)
        })
        .collect();
    group.throughput(Throughput::Elements(files.len() as u64));

    group.bench_function("jobs_200", |b| {
        b.iter(|| concat_job_files(black_box(&files)))
    });

    group.finish();
}

/// Benchmark reference extraction and status chunking for a large batch
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    let keys: Vec<String> = (0..10_000)
        .map(|i| format!("2017-01-01/NOTIFY.REF{:06}.D.2.C.C.20170101173000.PDF", i))
        .collect();
    group.throughput(Throughput::Elements(keys.len() as u64));

    group.bench_function("references_10k", |b| {
        b.iter(|| {
            black_box(&keys)
                .iter()
                .map(|k| reference_from_key(k))
                .collect::<Vec<_>>()
        })
    });

    let api_file: String = (0..10_000)
        .map(|i| format!("140|500|001||REF{:06}|Recipient|Address\n", i))
        .collect();
    group.bench_function("api_references_10k", |b| {
        b.iter(|| notification_references("api.txt", black_box(api_file.as_bytes())))
    });

    let references: Vec<String> = keys.iter().map(|k| reference_from_key(k)).collect();
    group.bench_function("chunk_10k", |b| {
        b.iter(|| chunk(black_box(&references), 1000).map(|c| c.to_vec()).count())
    });

    group.finish();
}

criterion_group!(benches, bench_pack, bench_concat_job_files, bench_fanout);

criterion_main!(benches);
