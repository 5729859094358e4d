//! Translation of index kinds into engine parameter documents
//!
//! [`IndexConfigBuilder`] is a pure mapping from [`IndexOptions`] to the JSON
//! document the engine factory accepts, plus the per-call search document.
//! Kinds backed by the general graph engine pass `2 * max_degree` down: callers
//! count degree the way the plain graph does (upper-layer neighbours), while the
//! general engine counts layer-0 neighbours.

use crate::error::{AdapterError, Result};
use crate::kind::IndexKind;
use serde::{Deserialize, Serialize};
use vecbridge_engine::distance::Metric;
use vecbridge_engine::params::{
    HGraphParameters, HGraphSearchParameters, HnswParameters, HnswSearchParameters,
    IndexParameters, SearchParameters, BLOCK_MEMORY_IO,
};
use vecbridge_engine::quantize::QuantizationType;

/// Skip ratio used by filtered searches on the plain graph
pub const FLAT_SKIP_RATIO: f32 = 0.7;

/// Creation parameters a handle remembers for its whole life
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub kind: IndexKind,
    pub dtype: String,
    pub metric: String,
    pub dim: usize,
    pub max_degree: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// Bytes of extra info stored per vector; 0 disables it
    pub extra_info_size: usize,
}

impl IndexOptions {
    pub fn new(kind: IndexKind, dim: usize) -> Self {
        Self {
            kind,
            dtype: "float32".to_string(),
            metric: "l2".to_string(),
            dim,
            max_degree: 16,
            ef_construction: 200,
            ef_search: 100,
            extra_info_size: 0,
        }
    }

    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.dtype = dtype.into();
        self
    }

    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    pub fn with_max_degree(mut self, max_degree: usize) -> Self {
        self.max_degree = max_degree;
        self
    }

    pub fn with_ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn with_ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = ef_search;
        self
    }

    pub fn with_extra_info_size(mut self, extra_info_size: usize) -> Self {
        self.extra_info_size = extra_info_size;
        self
    }
}

/// Capabilities of one generation of the configuration schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigProfile {
    /// Search documents may carry `use_extra_info_filter`
    pub supports_extra_info_filter: bool,
    /// Paginated searches with continuation contexts are allowed
    pub supports_continuation: bool,
    /// Passed to the engine as `build_thread_count` (0 = engine picks)
    pub build_thread_count: usize,
}

impl ConfigProfile {
    /// The profile every handle is created with
    pub const CURRENT: ConfigProfile = ConfigProfile {
        supports_extra_info_filter: true,
        supports_continuation: true,
        build_thread_count: 0,
    };

    /// Earlier schema: single-threaded build, no extra-info filtering, no pagination
    pub const LEGACY: ConfigProfile = ConfigProfile {
        supports_extra_info_filter: false,
        supports_continuation: false,
        build_thread_count: 1,
    };
}

impl Default for ConfigProfile {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Engine name plus its index parameter document
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub engine: &'static str,
    pub parameters: IndexParameters,
}

impl EngineConfig {
    pub fn to_json(&self) -> Result<String> {
        Ok(self.parameters.to_json()?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexConfigBuilder {
    profile: ConfigProfile,
}

impl IndexConfigBuilder {
    pub fn new(profile: ConfigProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> ConfigProfile {
        self.profile
    }

    /// Map creation options to the engine's configuration for that kind
    pub fn build(&self, options: &IndexOptions) -> Result<EngineConfig> {
        if options.dtype.is_empty() {
            return Err(AdapterError::NullArgument("dtype"));
        }
        if options.metric.is_empty() {
            return Err(AdapterError::NullArgument("metric"));
        }
        let metric: Metric = options.metric.parse()?;
        let max_degree = if options.kind.doubles_degree() {
            options.max_degree * 2
        } else {
            options.max_degree
        };

        let mut parameters = IndexParameters {
            dtype: options.dtype.clone(),
            metric_type: metric,
            dim: options.dim,
            hnsw: None,
            index_param: None,
        };

        match options.kind.quantization() {
            None => {
                parameters.hnsw = Some(HnswParameters {
                    max_degree,
                    ef_construction: options.ef_construction,
                    ef_search: options.ef_search,
                    use_static: false,
                });
            }
            Some(quantization) => {
                let binary = quantization == QuantizationType::RaBitQ;
                parameters.index_param = Some(HGraphParameters {
                    base_quantization_type: quantization,
                    max_degree,
                    ef_construction: options.ef_construction,
                    build_thread_count: self.profile.build_thread_count,
                    extra_info_size: options.extra_info_size,
                    use_reorder: binary,
                    precise_quantization_type: binary.then_some(QuantizationType::Fp32),
                    precise_io_type: binary.then(|| BLOCK_MEMORY_IO.to_string()),
                    ignore_reorder: binary,
                });
            }
        }

        Ok(EngineConfig {
            engine: options.kind.engine_name(),
            parameters,
        })
    }

    /// Per-call search document for `kind`
    pub fn search_parameters(
        &self,
        kind: IndexKind,
        ef_search: usize,
        use_extra_info_filter: bool,
    ) -> SearchParameters {
        match kind {
            IndexKind::Flat => SearchParameters {
                hnsw: Some(HnswSearchParameters {
                    ef_search,
                    skip_ratio: FLAT_SKIP_RATIO,
                }),
                hgraph: None,
            },
            _ => SearchParameters {
                hnsw: None,
                hgraph: Some(HGraphSearchParameters {
                    ef_search,
                    use_extra_info_filter: use_extra_info_filter
                        && self.profile.supports_extra_info_filter,
                    use_reorder: false,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(kind: IndexKind) -> IndexOptions {
        IndexOptions::new(kind, 64)
            .with_max_degree(16)
            .with_ef_construction(100)
            .with_ef_search(50)
            .with_extra_info_size(8)
    }

    #[test]
    fn test_flat_keeps_degree() {
        let config = IndexConfigBuilder::default().build(&options(IndexKind::Flat)).unwrap();
        assert_eq!(config.engine, "hnsw");
        let hnsw = config.parameters.hnsw.unwrap();
        assert_eq!(hnsw.max_degree, 16);
        assert_eq!(hnsw.ef_search, 50);
        assert!(!hnsw.use_static);
        assert!(config.parameters.index_param.is_none());
    }

    #[test]
    fn test_quantized_kinds_double_degree() {
        let builder = IndexConfigBuilder::default();
        for (kind, quantization) in [
            (IndexKind::ScalarQuantized, QuantizationType::Sq8),
            (IndexKind::BinaryQuantized, QuantizationType::RaBitQ),
            (IndexKind::Graph, QuantizationType::Fp32),
        ] {
            let config = builder.build(&options(kind)).unwrap();
            assert_eq!(config.engine, "hgraph");
            let hgraph = config.parameters.index_param.unwrap();
            assert_eq!(hgraph.max_degree, 32, "{}", kind);
            assert_eq!(hgraph.base_quantization_type, quantization);
            assert_eq!(hgraph.build_thread_count, 0);
            assert_eq!(hgraph.extra_info_size, 8);
        }
    }

    #[test]
    fn test_degree_doubling_follows_kind() {
        let builder = IndexConfigBuilder::default();
        for kind in IndexKind::ALL {
            let config = builder.build(&options(kind)).unwrap();
            let degree = match (config.parameters.hnsw, config.parameters.index_param) {
                (Some(hnsw), None) => hnsw.max_degree,
                (None, Some(hgraph)) => hgraph.max_degree,
                other => panic!("unexpected parameter blocks for {}: {:?}", kind, other),
            };
            let expected = if kind.doubles_degree() { 32 } else { 16 };
            assert_eq!(degree, expected, "{}", kind);
        }
    }

    #[test]
    fn test_binary_requests_reorder() {
        let config = IndexConfigBuilder::default()
            .build(&options(IndexKind::BinaryQuantized))
            .unwrap();
        let hgraph = config.parameters.index_param.unwrap();
        assert!(hgraph.use_reorder);
        assert!(hgraph.ignore_reorder);
        assert_eq!(hgraph.precise_quantization_type, Some(QuantizationType::Fp32));
        assert_eq!(hgraph.precise_io_type.as_deref(), Some(BLOCK_MEMORY_IO));

        let sq = IndexConfigBuilder::default()
            .build(&options(IndexKind::ScalarQuantized))
            .unwrap();
        assert!(!sq.parameters.index_param.unwrap().use_reorder);
    }

    #[test]
    fn test_empty_strings_are_null_arguments() {
        let builder = IndexConfigBuilder::default();
        let err = builder.build(&options(IndexKind::Flat).with_dtype("")).unwrap_err();
        assert!(matches!(err, AdapterError::NullArgument("dtype")));
        let err = builder.build(&options(IndexKind::Flat).with_metric("")).unwrap_err();
        assert!(matches!(err, AdapterError::NullArgument("metric")));
        let err = builder.build(&options(IndexKind::Flat).with_metric("cos")).unwrap_err();
        assert_eq!(err.code(), 3);
    }

    #[test]
    fn test_search_parameters_per_kind() {
        let builder = IndexConfigBuilder::default();
        let flat = builder.search_parameters(IndexKind::Flat, 40, true);
        assert_eq!(flat.to_json().unwrap(), r#"{"hnsw":{"ef_search":40,"skip_ratio":0.7}}"#);

        let graph = builder.search_parameters(IndexKind::Graph, 40, true);
        let hgraph = graph.hgraph.unwrap();
        assert_eq!(hgraph.ef_search, 40);
        assert!(hgraph.use_extra_info_filter);
        assert!(graph.hnsw.is_none());
    }

    #[test]
    fn test_legacy_profile() {
        let builder = IndexConfigBuilder::new(ConfigProfile::LEGACY);
        let config = builder.build(&options(IndexKind::ScalarQuantized)).unwrap();
        assert_eq!(config.parameters.index_param.unwrap().build_thread_count, 1);

        let search = builder.search_parameters(IndexKind::Graph, 10, true);
        assert!(!search.hgraph.unwrap().use_extra_info_filter);
        assert!(!ConfigProfile::LEGACY.supports_continuation);
    }

    #[test]
    fn test_json_is_accepted_by_engine() {
        let config = IndexConfigBuilder::default()
            .build(&options(IndexKind::BinaryQuantized))
            .unwrap();
        let json = config.to_json().unwrap();
        let parsed = IndexParameters::from_json(&json).unwrap();
        assert_eq!(parsed, config.parameters);
    }
}
