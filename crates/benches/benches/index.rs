//! Index handle benchmarks
//!
//! ## Running Benchmarks
//! ```bash
//! cargo bench -p vecbridge-benches --bench index
//! cargo bench -p vecbridge-benches --bench index -- index_construction
//! cargo bench -p vecbridge-benches --bench index -- search_performance
//! cargo bench -p vecbridge-benches --bench index -- filtered_search
//! cargo bench -p vecbridge-benches --bench index -- paginated_search
//! cargo bench -p vecbridge-benches --bench index -- serialization
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use tempfile::TempDir;
use vecbridge_benches::{bench_options, built_handle, random_vectors};
use vecbridge_core::{Continuation, ExclusionSet, IndexHandle, IndexKind, SearchRequest};

const DIM: usize = 128;
const INDEX_SIZES: &[usize] = &[1_000, 5_000];
const K_VALUES: &[usize] = &[1, 10, 50];
const QUERY_COUNT: usize = 64;

// ============================================================================
// Index Construction
// ============================================================================

fn bench_index_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_construction");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for &size in INDEX_SIZES {
        let vectors = random_vectors(size, DIM, 1);
        let ids: Vec<i64> = (0..size as i64).collect();
        group.throughput(Throughput::Elements(size as u64));

        for kind in IndexKind::ALL {
            group.bench_with_input(BenchmarkId::new(kind.to_string(), size), &size, |b, _| {
                b.iter(|| {
                    let mut handle = IndexHandle::create(bench_options(kind, DIM), None).unwrap();
                    handle.build(black_box(&vectors), &ids, None).unwrap();
                    black_box(handle.count())
                });
            });
        }
    }

    group.finish();
}

// ============================================================================
// Search Performance
// ============================================================================

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_performance");
    let queries = random_vectors(QUERY_COUNT, DIM, 7);

    for kind in IndexKind::ALL {
        let handle = built_handle(kind, 10_000, DIM);
        for &k in K_VALUES {
            group.bench_with_input(BenchmarkId::new(kind.to_string(), k), &k, |b, &k| {
                let mut i = 0;
                b.iter(|| {
                    let row = i % QUERY_COUNT;
                    i += 1;
                    let query = &queries[row * DIM..(row + 1) * DIM];
                    black_box(handle.search(&SearchRequest::new(query, k)).unwrap())
                });
            });
        }
    }

    group.finish();
}

fn bench_filtered_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtered_search");
    let size = 10_000;
    let handle = built_handle(IndexKind::Graph, size, DIM);
    let query = random_vectors(1, DIM, 9);

    for excluded_pct in [10usize, 50, 90] {
        let excluded: ExclusionSet = (0..size as i64)
            .filter(|id| (*id as usize * 100 / size) < excluded_pct)
            .collect();
        let valid_ratio = 1.0 - excluded_pct as f32 / 100.0;
        group.bench_with_input(
            BenchmarkId::new("excluded_pct", excluded_pct),
            &excluded,
            |b, excluded| {
                b.iter(|| {
                    let request = SearchRequest::new(&query, 10)
                        .with_filter(excluded)
                        .with_valid_ratio(valid_ratio);
                    black_box(handle.search(&request).unwrap())
                });
            },
        );
    }

    group.finish();
}

fn bench_paginated_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("paginated_search");
    let handle = built_handle(IndexKind::Graph, 10_000, DIM);
    let query = random_vectors(1, DIM, 11);

    for pages in [1usize, 5, 10] {
        group.bench_with_input(BenchmarkId::new("pages_of_10", pages), &pages, |b, &pages| {
            b.iter(|| {
                let mut continuation = Continuation::new();
                for page in 0..pages {
                    let request = SearchRequest::new(&query, 10)
                        .with_ef_search(200)
                        .with_last_search(page + 1 == pages);
                    black_box(handle.search_iter(&request, &mut continuation).unwrap());
                }
            });
        });
    }

    group.finish();
}

// ============================================================================
// Serialization
// ============================================================================

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");
    group.sample_size(20);

    for kind in [IndexKind::Flat, IndexKind::Graph] {
        let handle = built_handle(kind, 5_000, DIM);
        let dir = TempDir::new().unwrap();
        handle.serialize_to_directory(dir.path()).unwrap();

        group.bench_function(BenchmarkId::new("serialize_stream", kind.to_string()), |b| {
            b.iter(|| {
                let mut buf = Vec::new();
                handle.serialize_to_stream(&mut buf).unwrap();
                black_box(buf.len())
            });
        });

        group.bench_function(BenchmarkId::new("deserialize_dir", kind.to_string()), |b| {
            let mut target = IndexHandle::create(bench_options(kind, DIM), None).unwrap();
            b.iter(|| {
                target.deserialize_from_directory(dir.path()).unwrap();
                black_box(target.count())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_index_construction,
    bench_search,
    bench_filtered_search,
    bench_paginated_search,
    bench_serialization
);
criterion_main!(benches);
