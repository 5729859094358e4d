//! Shared data generation for the vecbridge benchmarks

pub use vecbridge_core::testing::random_vectors;
use vecbridge_core::{IndexHandle, IndexKind, IndexOptions};

pub fn bench_options(kind: IndexKind, dim: usize) -> IndexOptions {
    IndexOptions::new(kind, dim)
        .with_max_degree(16)
        .with_ef_construction(100)
        .with_ef_search(64)
}

/// Handle of `kind` built from `rows` seeded vectors with ids `0..rows`
pub fn built_handle(kind: IndexKind, rows: usize, dim: usize) -> IndexHandle {
    let vectors = random_vectors(rows, dim, 42);
    let ids: Vec<i64> = (0..rows as i64).collect();
    let mut handle = match IndexHandle::create(bench_options(kind, dim), None) {
        Ok(handle) => handle,
        Err(e) => panic!("create {} handle: {}", kind, e),
    };
    if let Err(e) = handle.build(&vectors, &ids, None) {
        panic!("build {} handle: {}", kind, e);
    }
    handle
}
