//! vecbridge engine
//!
//! Graph-based approximate nearest neighbor search with optional scalar (SQ8)
//! and binary (RaBitQ-style) quantization.
//!
//! The engine is reached through a small surface:
//!
//! - [`Factory::create_index`] turns an engine name (`"hnsw"` or `"hgraph"`) and a
//!   JSON parameter document into a boxed [`Index`].
//! - [`Index`] exposes build/add/search/serialize operations over [`Dataset`] batches.
//! - [`Filter`] lets callers restrict search results by id or by extra-info record.
//! - [`IteratorContext`] carries state across paginated searches.
//! - [`BinarySet`] is the named-blob form an index decomposes into for persistence.
//!
//! # Example
//!
//! ```
//! use vecbridge_engine::{Dataset, EngineOptions, Factory};
//!
//! let parameters = r#"{
//!     "dtype": "float32", "metric_type": "l2", "dim": 4,
//!     "hnsw": {"max_degree": 8, "ef_construction": 64, "ef_search": 32, "use_static": false}
//! }"#;
//! let mut index = Factory::create_index("hnsw", parameters, None, &EngineOptions::default()).unwrap();
//!
//! let vectors = vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0];
//! let ids = vec![10, 20];
//! index.build(&Dataset::new(&vectors, 4).with_ids(&ids)).unwrap();
//!
//! let query = vec![1.0, 0.0, 0.0, 0.0];
//! let params = r#"{"hnsw": {"ef_search": 16}}"#;
//! let result = index.knn_search(&Dataset::query(&query), 1, params, None).unwrap();
//! assert_eq!(result.ids, vec![20]);
//! ```

pub mod allocator;
pub mod binary_set;
pub mod dataset;
pub mod distance;
pub mod factory;
pub mod filter;
pub mod graph;
pub mod index;
pub mod iterator;
pub mod params;
pub mod quantize;
pub mod storage;

use thiserror::Error;

pub use allocator::{Allocator, DefaultAllocator};
pub use binary_set::BinarySet;
pub use dataset::{Dataset, SearchOutput};
pub use distance::Metric;
pub use factory::Factory;
pub use filter::{Filter, FilterTarget};
pub use index::Index;
pub use iterator::IteratorContext;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Default upper bound for a single storage block (128 MiB)
pub const DEFAULT_BLOCK_SIZE_LIMIT: usize = 128 * 1024 * 1024;

/// Error categories reported by the engine.
///
/// The discriminants are stable and cross the C boundary unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorType {
    UnknownError = 1,
    InternalError = 2,
    InvalidArgument = 3,
    WrongStatus = 4,
    BuildTwice = 5,
    IndexNotEmpty = 6,
    UnsupportedIndex = 7,
    UnsupportedIndexOperation = 8,
    DimensionNotEqual = 9,
    IndexEmpty = 10,
    NoEnoughMemory = 11,
    ReadError = 12,
    MissingFile = 13,
    InvalidBinary = 14,
}

impl ErrorType {
    /// Integer code of this error category
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an integer code back to its category
    pub fn from_code(code: i32) -> Option<Self> {
        let kind = match code {
            1 => Self::UnknownError,
            2 => Self::InternalError,
            3 => Self::InvalidArgument,
            4 => Self::WrongStatus,
            5 => Self::BuildTwice,
            6 => Self::IndexNotEmpty,
            7 => Self::UnsupportedIndex,
            8 => Self::UnsupportedIndexOperation,
            9 => Self::DimensionNotEqual,
            10 => Self::IndexEmpty,
            11 => Self::NoEnoughMemory,
            12 => Self::ReadError,
            13 => Self::MissingFile,
            14 => Self::InvalidBinary,
            _ => return None,
        };
        Some(kind)
    }
}

/// Engine error: a category plus a human readable message
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct Error {
    pub kind: ErrorType,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorType::InvalidArgument, message)
    }

    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::new(
            ErrorType::DimensionNotEqual,
            format!("dimension not equal: expected {}, got {}", expected, actual),
        )
    }

    /// Integer code of the error category
    pub fn code(&self) -> i32 {
        self.kind.code()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorType::ReadError, err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::new(ErrorType::InvalidBinary, err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorType::InvalidArgument, err.to_string())
    }
}

/// Process-independent options the engine reads when an index is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Upper bound in bytes for a single storage block
    pub block_size_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            block_size_limit: DEFAULT_BLOCK_SIZE_LIMIT,
        }
    }
}

impl EngineOptions {
    /// Set the block size limit; values below one record are rounded up at use
    pub fn with_block_size_limit(mut self, limit: usize) -> Self {
        self.block_size_limit = limit;
        self
    }
}

/// Warm up runtime CPU feature detection used by the distance kernels.
///
/// Always succeeds; repeated calls are cheap.
pub fn init() -> bool {
    let arch = pulp::Arch::new();
    tracing::debug!(?arch, "vecbridge engine initialized");
    true
}

/// Engine version string
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
