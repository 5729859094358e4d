//! The closed set of index kinds a handle can be created as

use crate::error::{AdapterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use vecbridge_engine::quantize::QuantizationType;

/// Index configuration selected at creation.
///
/// Discriminants are part of the C interface; 2 through 4 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum IndexKind {
    /// Plain graph over fp32 vectors
    Flat = 0,
    /// Graph over 8-bit scalar codes
    ScalarQuantized = 1,
    /// Graph over binary codes, reranked with fp32 vectors
    BinaryQuantized = 5,
    /// General graph over fp32 vectors with extra-info support
    Graph = 6,
}

impl IndexKind {
    pub const ALL: [IndexKind; 4] = [
        IndexKind::Flat,
        IndexKind::ScalarQuantized,
        IndexKind::BinaryQuantized,
        IndexKind::Graph,
    ];

    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(IndexKind::Flat),
            1 => Ok(IndexKind::ScalarQuantized),
            5 => Ok(IndexKind::BinaryQuantized),
            6 => Ok(IndexKind::Graph),
            other => Err(AdapterError::UnsupportedIndexKind(other.to_string())),
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Engine name handed to the factory
    pub fn engine_name(self) -> &'static str {
        match self {
            IndexKind::Flat => "hnsw",
            _ => "hgraph",
        }
    }

    /// Base codec of the general graph engine; `None` for the plain kind
    pub fn quantization(self) -> Option<QuantizationType> {
        match self {
            IndexKind::Flat => None,
            IndexKind::ScalarQuantized => Some(QuantizationType::Sq8),
            IndexKind::BinaryQuantized => Some(QuantizationType::RaBitQ),
            IndexKind::Graph => Some(QuantizationType::Fp32),
        }
    }

    /// Whether the caller's degree is doubled before reaching the engine
    pub fn doubles_degree(self) -> bool {
        self != IndexKind::Flat
    }

    /// Flat indexes store no extra-info records; their size is forced to 0
    pub fn carries_extra_info(self) -> bool {
        self != IndexKind::Flat
    }

    /// Binary-quantized indexes cannot serve paginated searches
    pub fn supports_iterative_search(self) -> bool {
        self != IndexKind::BinaryQuantized
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexKind::Flat => "flat",
            IndexKind::ScalarQuantized => "sq",
            IndexKind::BinaryQuantized => "bq",
            IndexKind::Graph => "graph",
        };
        f.write_str(name)
    }
}

impl TryFrom<i32> for IndexKind {
    type Error = AdapterError;

    fn try_from(raw: i32) -> Result<Self> {
        IndexKind::from_raw(raw)
    }
}

/// True only for the four defined discriminants
pub fn is_supported_index(raw: i32) -> bool {
    IndexKind::from_raw(raw).is_ok()
}
