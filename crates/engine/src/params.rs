//! JSON parameter documents accepted by the factory and by searches
//!
//! Index parameters:
//!
//! ```json
//! {"dtype": "float32", "metric_type": "l2", "dim": 128,
//!  "hnsw": {"max_degree": 16, "ef_construction": 200, "ef_search": 100, "use_static": false}}
//! ```
//!
//! ```json
//! {"dtype": "float32", "metric_type": "ip", "dim": 128,
//!  "index_param": {"base_quantization_type": "sq8", "max_degree": 32,
//!                  "ef_construction": 200, "build_thread_count": 0}}
//! ```
//!
//! Search parameters: `{"hnsw": {"ef_search": 64, "skip_ratio": 0.7}}` or
//! `{"hgraph": {"ef_search": 64, "use_extra_info_filter": false}}`.

use crate::distance::Metric;
use crate::quantize::QuantizationType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Element type tag accepted by every engine
pub const DTYPE_FLOAT32: &str = "float32";

/// I/O layout of the precise (reorder) representation
pub const BLOCK_MEMORY_IO: &str = "block_memory_io";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexParameters {
    pub dtype: String,
    pub metric_type: Metric,
    pub dim: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hnsw: Option<HnswParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_param: Option<HGraphParameters>,
}

impl IndexParameters {
    pub fn from_json(json: &str) -> Result<Self> {
        let parameters: Self = serde_json::from_str(json)?;
        parameters.validate()?;
        Ok(parameters)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.dtype != DTYPE_FLOAT32 {
            return Err(Error::invalid_argument(format!(
                "unsupported dtype '{}'",
                self.dtype
            )));
        }
        if self.dim == 0 {
            return Err(Error::invalid_argument("dim must be greater than 0"));
        }
        if let Some(hnsw) = &self.hnsw {
            if hnsw.max_degree < 2 {
                return Err(Error::invalid_argument("hnsw.max_degree must be at least 2"));
            }
        }
        if let Some(hgraph) = &self.index_param {
            if hgraph.max_degree < 4 {
                return Err(Error::invalid_argument(
                    "index_param.max_degree must be at least 4",
                ));
            }
            if let Some(precise) = hgraph.precise_quantization_type {
                if precise != QuantizationType::Fp32 {
                    return Err(Error::invalid_argument(format!(
                        "unsupported precise_quantization_type '{}'",
                        precise
                    )));
                }
            }
            if let Some(io) = &hgraph.precise_io_type {
                if io != BLOCK_MEMORY_IO {
                    return Err(Error::invalid_argument(format!(
                        "unsupported precise_io_type '{}'",
                        io
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Parameters of the base graph engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParameters {
    pub max_degree: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    #[serde(default)]
    pub use_static: bool,
}

/// Parameters of the general graph engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HGraphParameters {
    pub base_quantization_type: QuantizationType,
    pub max_degree: usize,
    pub ef_construction: usize,
    /// 0 lets the engine pick a thread count
    #[serde(default)]
    pub build_thread_count: usize,
    #[serde(default)]
    pub extra_info_size: usize,
    #[serde(default)]
    pub use_reorder: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precise_quantization_type: Option<QuantizationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precise_io_type: Option<String>,
    /// Skip the rerank pass unless a search explicitly enables it
    #[serde(default)]
    pub ignore_reorder: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hnsw: Option<HnswSearchParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hgraph: Option<HGraphSearchParameters>,
}

impl SearchParameters {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswSearchParameters {
    pub ef_search: usize,
    #[serde(default)]
    pub skip_ratio: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HGraphSearchParameters {
    pub ef_search: usize,
    #[serde(default)]
    pub use_extra_info_filter: bool,
    /// Rerank with precise codes even when the index ignores reorder by default
    #[serde(default)]
    pub use_reorder: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hnsw_parameters() {
        let json = r#"{"dtype":"float32","metric_type":"l2","dim":8,
            "hnsw":{"max_degree":16,"ef_construction":100,"ef_search":50,"use_static":false}}"#;
        let params = IndexParameters::from_json(json).unwrap();
        assert_eq!(params.metric_type, Metric::L2);
        assert_eq!(params.hnsw.unwrap().max_degree, 16);
        assert!(params.index_param.is_none());
    }

    #[test]
    fn test_parse_hgraph_defaults() {
        let json = r#"{"dtype":"float32","metric_type":"ip","dim":8,
            "index_param":{"base_quantization_type":"rabitq","max_degree":32,"ef_construction":100}}"#;
        let params = IndexParameters::from_json(json).unwrap();
        let hgraph = params.index_param.unwrap();
        assert_eq!(hgraph.base_quantization_type, QuantizationType::RaBitQ);
        assert_eq!(hgraph.build_thread_count, 0);
        assert_eq!(hgraph.extra_info_size, 0);
        assert!(!hgraph.use_reorder);
    }

    #[test]
    fn test_rejects_bad_documents() {
        let bad = [
            r#"{"dtype":"int8","metric_type":"l2","dim":8}"#,
            r#"{"dtype":"float32","metric_type":"cosine","dim":8}"#,
            r#"{"dtype":"float32","metric_type":"l2","dim":0}"#,
            r#"{"dtype":"float32","metric_type":"l2","dim":8,
                "index_param":{"base_quantization_type":"sq8","max_degree":32,"ef_construction":100,
                "precise_quantization_type":"sq8"}}"#,
            "not json",
        ];
        for json in bad {
            let err = IndexParameters::from_json(json).unwrap_err();
            assert_eq!(err.kind, crate::ErrorType::InvalidArgument, "{}", json);
        }
    }

    #[test]
    fn test_search_parameters_json() {
        let params = SearchParameters {
            hnsw: Some(HnswSearchParameters {
                ef_search: 40,
                skip_ratio: 0.7,
            }),
            hgraph: None,
        };
        let json = params.to_json().unwrap();
        assert_eq!(json, r#"{"hnsw":{"ef_search":40,"skip_ratio":0.7}}"#);
        assert_eq!(SearchParameters::from_json(&json).unwrap(), params);
    }
}
