//! Index creation by engine name

use crate::allocator::Allocator;
use crate::index::{EngineKind, GraphIndex, Index};
use crate::params::IndexParameters;
use crate::{EngineOptions, Error, ErrorType, Result};
use std::sync::Arc;

/// Engine names accepted by [`Factory::create_index`]
pub const ENGINE_NAMES: [&str; 2] = ["hnsw", "hgraph"];

pub struct Factory;

impl Factory {
    /// Create an empty index.
    ///
    /// `name` selects the engine, `parameters` is the JSON index document and
    /// `allocator` (when given) backs all vector, code and extra-info storage.
    pub fn create_index(
        name: &str,
        parameters: &str,
        allocator: Option<Arc<dyn Allocator>>,
        options: &EngineOptions,
    ) -> Result<Box<dyn Index>> {
        let engine = match name {
            "hnsw" => EngineKind::Hnsw,
            "hgraph" => EngineKind::HGraph,
            other => {
                return Err(Error::new(
                    ErrorType::UnsupportedIndex,
                    format!("unknown engine '{}'", other),
                ))
            }
        };
        let parameters = IndexParameters::from_json(parameters)?;
        let index = GraphIndex::new(engine, parameters, allocator, options)?;
        Ok(Box::new(index))
    }
}
