//! vecbridge - index lifecycle and search orchestration
//!
//! This crate sits between callers and the [`vecbridge_engine`] vector index. It
//! maps a small set of index kinds onto engine configurations, owns the index
//! handle across build/add/search/serialize, bridges caller filters into the
//! engine's filter capability and drives paginated search through continuation
//! contexts.
//!
//! # Example
//!
//! ```
//! use vecbridge_core::{IndexHandle, IndexKind, IndexOptions, SearchRequest};
//!
//! let options = IndexOptions::new(IndexKind::Flat, 4).with_max_degree(8);
//! let mut handle = IndexHandle::create(options, None).unwrap();
//!
//! let vectors = [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
//! handle.build(&vectors, &[7, 8], None).unwrap();
//! assert_eq!(handle.count(), 2);
//!
//! let query = [0.9, 0.0, 0.0, 0.0];
//! let result = handle.search(&SearchRequest::new(&query, 1)).unwrap();
//! assert_eq!(result.ids, vec![8]);
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod handle;
pub mod kind;
pub mod logging;
pub mod persistence;
pub mod runtime;
pub mod search;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{ConfigProfile, EngineConfig, IndexConfigBuilder, IndexOptions};
pub use error::{AdapterError, Result};
pub use filter::{ExclusionSet, FilterBridge, FilterPredicate};
pub use handle::IndexHandle;
pub use kind::{is_supported_index, IndexKind};
pub use logging::{LogLevel, Logger, TaskTimer};
pub use runtime::{init, ProcessState, RuntimeConfig};
pub use search::{Continuation, SearchRequest, SearchResult, SessionState};

pub use vecbridge_engine::{Allocator, DefaultAllocator, FilterTarget};

/// Crate version string
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
