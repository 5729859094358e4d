//! The index handle: one engine index plus the options it was created with

use crate::config::{ConfigProfile, IndexConfigBuilder, IndexOptions};
use crate::error::{AdapterError, Result};
use crate::kind::IndexKind;
use crate::logging::TaskTimer;
use crate::runtime::ProcessState;
use std::sync::Arc;
use vecbridge_engine::{Allocator, Dataset, Factory, Index};

/// Owns one engine index.
///
/// The handle remembers the caller's original (un-doubled) degree and every
/// other creation option so a fresh engine index of the same configuration can
/// be built again when loading serialized state.
pub struct IndexHandle {
    options: IndexOptions,
    profile: ConfigProfile,
    allocator: Option<Arc<dyn Allocator>>,
    pub(crate) index: Box<dyn Index>,
}

impl IndexHandle {
    /// Create an empty index with the current configuration profile
    pub fn create(options: IndexOptions, allocator: Option<Arc<dyn Allocator>>) -> Result<Self> {
        Self::create_with_profile(options, ConfigProfile::CURRENT, allocator)
    }

    pub fn create_with_profile(
        options: IndexOptions,
        profile: ConfigProfile,
        allocator: Option<Arc<dyn Allocator>>,
    ) -> Result<Self> {
        let _timer = TaskTimer::new("create index");
        let mut options = options;
        if !options.kind.carries_extra_info() {
            options.extra_info_size = 0;
        }
        tracing::debug!(
            "TRACE LOG[create_index]: kind={}, dtype={}, metric={}, dim={}, max_degree={}, ef_construction={}, ef_search={}, extra_info_size={}",
            options.kind,
            options.dtype,
            options.metric,
            options.dim,
            options.max_degree,
            options.ef_construction,
            options.ef_search,
            options.extra_info_size
        );

        let index = new_engine_index(&options, profile, allocator.clone()).map_err(|e| {
            tracing::error!(code = e.code(), "create index failed: {}", e);
            e
        })?;

        Ok(Self {
            options,
            profile,
            allocator,
            index,
        })
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn profile(&self) -> ConfigProfile {
        self.profile
    }

    pub fn kind(&self) -> IndexKind {
        self.options.kind
    }

    pub fn dim(&self) -> usize {
        self.options.dim
    }

    pub fn extra_info_size(&self) -> usize {
        self.options.extra_info_size
    }

    /// Allocator backing the engine's memory, when one was supplied
    pub fn allocator(&self) -> Option<&Arc<dyn Allocator>> {
        self.allocator.as_ref()
    }

    /// Bulk load into an empty index
    pub fn build(&mut self, vectors: &[f32], ids: &[i64], extra_info: Option<&[u8]>) -> Result<()> {
        let _timer = TaskTimer::new("build index");
        tracing::debug!("TRACE LOG[build_index]: count={}", ids.len());
        let batch = self.batch(vectors, ids, extra_info)?;
        let result = self.index.build(&batch);
        self.finish_insert("build index", result)
    }

    /// Incremental insert
    pub fn add(&mut self, vectors: &[f32], ids: &[i64], extra_info: Option<&[u8]>) -> Result<()> {
        let _timer = TaskTimer::new("add index");
        tracing::debug!("TRACE LOG[add_index]: count={}", ids.len());
        let batch = self.batch(vectors, ids, extra_info)?;
        let result = self.index.add(&batch);
        self.finish_insert("add index", result)
    }

    fn batch<'a>(
        &self,
        vectors: &'a [f32],
        ids: &'a [i64],
        extra_info: Option<&'a [u8]>,
    ) -> Result<Dataset<'a>> {
        if vectors.is_empty() {
            return Err(AdapterError::NullArgument("vectors"));
        }
        if ids.is_empty() {
            return Err(AdapterError::NullArgument("ids"));
        }
        let mut batch = Dataset::new(vectors, self.options.dim).with_ids(ids);
        if let Some(extra) = extra_info {
            batch = batch.with_extra_infos(extra);
        }
        Ok(batch)
    }

    fn finish_insert(
        &self,
        op: &str,
        result: vecbridge_engine::Result<Vec<i64>>,
    ) -> Result<()> {
        match result {
            Ok(skipped) => {
                if !skipped.is_empty() {
                    tracing::warn!("{}: {} duplicate ids skipped", op, skipped.len());
                }
                tracing::debug!("   {} success, count={}", op, self.index.num_elements());
                Ok(())
            }
            Err(e) => {
                tracing::error!(code = e.code(), "{} failed: {}", op, e);
                Err(e.into())
            }
        }
    }

    /// Number of stored vectors
    pub fn count(&self) -> i64 {
        self.index.num_elements() as i64
    }

    /// One distance per id; unknown ids get the engine's sentinel
    pub fn cal_distance_by_id(&self, query: &[f32], ids: &[i64]) -> Result<Vec<f32>> {
        if query.is_empty() {
            return Err(AdapterError::NullArgument("query"));
        }
        if ids.is_empty() {
            return Err(AdapterError::NullArgument("ids"));
        }
        tracing::debug!("TRACE LOG[cal_distance_by_id]: count={}", ids.len());
        let distances = self.index.cal_distance_by_id(query, ids).map_err(|e| {
            tracing::error!(code = e.code(), "cal distance failed: {}", e);
            e
        })?;
        Ok(distances)
    }

    /// Smallest and largest stored id; `(0, 0)` for an empty index
    pub fn id_bounds(&self) -> Result<(i64, i64)> {
        if self.index.num_elements() == 0 {
            return Ok((0, 0));
        }
        Ok(self.index.get_min_and_max_id()?)
    }

    /// Copy extra-info records into `out`, which must be `ids.len() * extra_info_size` bytes
    pub fn get_extra_info_by_ids(&self, ids: &[i64], out: &mut [u8]) -> Result<()> {
        if ids.is_empty() {
            return Err(AdapterError::NullArgument("ids"));
        }
        self.index.get_extra_info_by_ids(ids, out).map_err(|e| {
            tracing::error!(code = e.code(), "get extra info failed: {}", e);
            AdapterError::from(e)
        })
    }

    pub fn estimate_memory(&self, rows: u64) -> u64 {
        self.index.estimate_memory(rows)
    }

    pub fn memory_usage(&self) -> usize {
        self.index.memory_usage()
    }

    /// Release the engine index
    pub fn destroy(self) {
        tracing::debug!("TRACE LOG[delete_index]: kind={}", self.options.kind);
    }

    /// Fresh, empty engine index with this handle's configuration
    pub(crate) fn new_engine_index(&self) -> Result<Box<dyn Index>> {
        new_engine_index(&self.options, self.profile, self.allocator.clone())
    }
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("options", &self.options)
            .field("profile", &self.profile)
            .field("count", &self.index.num_elements())
            .finish()
    }
}

fn new_engine_index(
    options: &IndexOptions,
    profile: ConfigProfile,
    allocator: Option<Arc<dyn Allocator>>,
) -> Result<Box<dyn Index>> {
    let config = IndexConfigBuilder::new(profile).build(options)?;
    let json = config.to_json()?;
    let engine_options = ProcessState::get().engine_options();
    Ok(Factory::create_index(config.engine, &json, allocator, &engine_options)?)
}
