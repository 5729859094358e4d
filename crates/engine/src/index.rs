//! The [`Index`] trait and its graph-backed implementation
//!
//! [`GraphIndex`] serves both engine names:
//!
//! - `hnsw`: fp32 storage, layer 0 keeps `2 * max_degree` neighbors
//! - `hgraph`: selectable base quantization, optional precise fp32 copy for
//!   reranking, optional fixed-size extra-info records; layer 0 keeps
//!   `max_degree` neighbors and upper layers `max_degree / 2`
//!
//! Caller ids are mapped to dense internal ids in insertion order. Vector codes,
//! precise codes and extra-info records live in [`BlockStorage`] allocated from
//! the index's [`Allocator`].

use crate::allocator::{default_allocator, Allocator};
use crate::binary_set::BinarySet;
use crate::dataset::{Dataset, SearchOutput};
use crate::distance::Metric;
use crate::filter::{Filter, FilterTarget};
use crate::graph::{GraphConfig, LayeredGraph, SearchFilter};
use crate::iterator::IteratorContext;
use crate::params::{IndexParameters, SearchParameters};
use crate::quantize::{AnyQuantizer, Fp32Quantizer, PreparedQuery, QuantizationType, Quantizer};
use crate::storage::BlockStorage;
use crate::{EngineOptions, Error, ErrorType, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BinaryHeap, HashMap};
use std::io::{Read, Write};
use std::sync::Arc;

pub const KEY_PARAMETERS: &str = "parameters";
pub const KEY_IDS: &str = "ids";
pub const KEY_GRAPH: &str = "graph";
pub const KEY_BASE_CODES: &str = "base_codes";
pub const KEY_PRECISE_CODES: &str = "precise_codes";
pub const KEY_EXTRA_INFOS: &str = "extra_infos";

/// Distance reported by `cal_distance_by_id` for ids the index does not hold
pub const UNKNOWN_ID_DISTANCE: f32 = -1.0;

/// A vector index produced by [`crate::Factory`]
pub trait Index: Send + Sync {
    /// Bulk load into an empty index.
    ///
    /// Returns the ids that were skipped because they already exist.
    fn build(&mut self, base: &Dataset<'_>) -> Result<Vec<i64>>;

    /// Incremental insert. Returns the ids skipped as duplicates.
    fn add(&mut self, base: &Dataset<'_>) -> Result<Vec<i64>>;

    /// One-shot k-NN search for a single-row query
    fn knn_search(
        &self,
        query: &Dataset<'_>,
        k: usize,
        parameters: &str,
        filter: Option<&dyn Filter>,
    ) -> Result<SearchOutput>;

    /// Paginated k-NN search.
    ///
    /// When `context` is `None` a fresh context is created (its memory comes from
    /// `allocator`, or the index's allocator) and stored back. Each call returns
    /// the next `k` results not returned before through the same context.
    #[allow(clippy::too_many_arguments)]
    fn knn_search_iter(
        &self,
        query: &Dataset<'_>,
        k: usize,
        parameters: &str,
        filter: Option<&dyn Filter>,
        context: &mut Option<IteratorContext>,
        is_last_search: bool,
        allocator: Option<Arc<dyn Allocator>>,
    ) -> Result<SearchOutput>;

    /// Distance from `query` to each id; unknown ids yield [`UNKNOWN_ID_DISTANCE`]
    fn cal_distance_by_id(&self, query: &[f32], ids: &[i64]) -> Result<Vec<f32>>;

    /// Copy the extra-info records of `ids` into `out` (`ids.len() * extra_info_size` bytes)
    fn get_extra_info_by_ids(&self, ids: &[i64], out: &mut [u8]) -> Result<()>;

    /// Smallest and largest stored id; `IndexEmpty` when nothing is stored
    fn get_min_and_max_id(&self) -> Result<(i64, i64)>;

    fn num_elements(&self) -> usize;

    fn dim(&self) -> usize;

    /// Bytes an index of this configuration needs to hold `rows` vectors
    fn estimate_memory(&self, rows: u64) -> u64;

    /// Bytes currently held
    fn memory_usage(&self) -> usize;

    fn serialize(&self) -> Result<BinarySet>;

    fn serialize_to(&self, writer: &mut dyn Write) -> Result<()> {
        self.serialize()?.write_to(writer)
    }

    /// Load state into an empty index of the same configuration
    fn deserialize(&mut self, set: &BinarySet) -> Result<()>;

    fn deserialize_from(&mut self, reader: &mut dyn Read) -> Result<()> {
        let set = BinarySet::read_from(reader)?;
        self.deserialize(&set)
    }
}

/// Which engine name an index was created under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Hnsw,
    HGraph,
}

impl EngineKind {
    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Hnsw => "hnsw",
            EngineKind::HGraph => "hgraph",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CodesBlob {
    quantizer: AnyQuantizer,
    codes: Vec<u8>,
}

/// Resolved per-call search settings
#[derive(Debug, Clone, Copy)]
struct SearchSettings {
    ef_search: usize,
    skip_ratio: f32,
    use_extra_info_filter: bool,
    rerank: bool,
}

pub struct GraphIndex {
    engine: EngineKind,
    parameters: IndexParameters,
    dim: usize,
    metric: Metric,
    use_static: bool,
    ignore_reorder: bool,
    build_threads: usize,
    quantizer: AnyQuantizer,
    base_codes: BlockStorage,
    precise_codes: Option<BlockStorage>,
    extra_info_size: usize,
    extra_infos: Option<BlockStorage>,
    labels: Vec<i64>,
    label_map: HashMap<i64, u32>,
    graph: LayeredGraph,
    allocator: Arc<dyn Allocator>,
    block_size_limit: usize,
}

impl GraphIndex {
    pub fn new(
        engine: EngineKind,
        parameters: IndexParameters,
        allocator: Option<Arc<dyn Allocator>>,
        options: &EngineOptions,
    ) -> Result<Self> {
        let allocator = allocator.unwrap_or_else(default_allocator);
        let dim = parameters.dim;
        let limit = options.block_size_limit;

        let (graph_config, quantizer, use_static, ignore_reorder, build_threads, precise, extra) =
            match engine {
                EngineKind::Hnsw => {
                    let hnsw = parameters.hnsw.ok_or_else(|| {
                        Error::invalid_argument("hnsw index requires an 'hnsw' parameter block")
                    })?;
                    let config = GraphConfig {
                        max_degree: hnsw.max_degree,
                        max_degree0: hnsw.max_degree * 2,
                        ef_construction: hnsw.ef_construction.max(1),
                    };
                    let quantizer = AnyQuantizer::Fp32(Fp32Quantizer::new(dim));
                    (config, quantizer, hnsw.use_static, false, 1, false, 0)
                }
                EngineKind::HGraph => {
                    let hgraph = parameters.index_param.as_ref().ok_or_else(|| {
                        Error::invalid_argument(
                            "hgraph index requires an 'index_param' parameter block",
                        )
                    })?;
                    let config = GraphConfig {
                        max_degree: hgraph.max_degree / 2,
                        max_degree0: hgraph.max_degree,
                        ef_construction: hgraph.ef_construction.max(1),
                    };
                    let quantizer = AnyQuantizer::new(hgraph.base_quantization_type, dim);
                    (
                        config,
                        quantizer,
                        false,
                        hgraph.ignore_reorder,
                        hgraph.build_thread_count,
                        hgraph.use_reorder,
                        hgraph.extra_info_size,
                    )
                }
            };

        let base_codes = BlockStorage::new(quantizer.code_size(), limit, Arc::clone(&allocator));
        let precise_codes =
            precise.then(|| BlockStorage::new(dim * 4, limit, Arc::clone(&allocator)));
        let extra_infos =
            (extra > 0).then(|| BlockStorage::new(extra, limit, Arc::clone(&allocator)));

        tracing::debug!(
            engine = engine.name(),
            dim,
            metric = %parameters.metric_type,
            quantization = %quantizer.kind(),
            reorder = precise,
            extra_info_size = extra,
            allocator = allocator.name(),
            "created graph index"
        );

        Ok(Self {
            engine,
            dim,
            metric: parameters.metric_type,
            parameters,
            use_static,
            ignore_reorder,
            build_threads,
            quantizer,
            base_codes,
            precise_codes,
            extra_info_size: extra,
            extra_infos,
            labels: Vec::new(),
            label_map: HashMap::new(),
            graph: LayeredGraph::new(graph_config),
            allocator,
            block_size_limit: limit,
        })
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    pub fn parameters(&self) -> &IndexParameters {
        &self.parameters
    }

    pub fn quantization(&self) -> QuantizationType {
        self.quantizer.kind()
    }

    fn view(&self) -> VectorView<'_> {
        VectorView {
            metric: self.metric,
            dim: self.dim,
            quantizer: &self.quantizer,
            base_codes: &self.base_codes,
            precise_codes: self.precise_codes.as_ref(),
        }
    }

    fn validate_batch(&self, base: &Dataset<'_>) -> Result<usize> {
        if base.dim() != self.dim {
            return Err(Error::dimension_mismatch(self.dim, base.dim()));
        }
        let count = base.num_elements();
        if count == 0 || base.vectors().len() != count * self.dim {
            return Err(Error::invalid_argument("base dataset holds no complete vectors"));
        }
        if base.ids().len() != count {
            return Err(Error::invalid_argument(format!(
                "expected {} ids, got {}",
                count,
                base.ids().len()
            )));
        }
        if let Some(extra) = base.extra_infos() {
            if self.extra_info_size == 0 {
                return Err(Error::invalid_argument(
                    "index was created without extra info",
                ));
            }
            if extra.len() != count * self.extra_info_size {
                return Err(Error::invalid_argument(format!(
                    "expected {} extra info bytes, got {}",
                    count * self.extra_info_size,
                    extra.len()
                )));
            }
        }
        Ok(count)
    }

    fn encode_batch(&self, vectors: &[f32]) -> Result<Vec<u8>> {
        let code_size = self.quantizer.code_size();
        let mut codes = vec![0u8; (vectors.len() / self.dim) * code_size];
        if code_size == 0 {
            return Ok(codes);
        }
        let quantizer = &self.quantizer;
        let dim = self.dim;

        if self.build_threads == 1 {
            for (code, row) in codes.chunks_exact_mut(code_size).zip(vectors.chunks_exact(dim)) {
                quantizer.encode(row, code);
            }
            return Ok(codes);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.build_threads)
            .build()
            .map_err(|e| Error::new(ErrorType::InternalError, e.to_string()))?;
        pool.install(|| {
            codes
                .par_chunks_mut(code_size)
                .zip(vectors.par_chunks(dim))
                .for_each(|(code, row)| quantizer.encode(row, code));
        });
        Ok(codes)
    }

    fn insert_batch(&mut self, base: &Dataset<'_>) -> Result<Vec<i64>> {
        let count = self.validate_batch(base)?;
        if !self.quantizer.is_trained() {
            self.quantizer.train(base.vectors());
            tracing::debug!(
                quantization = %self.quantizer.kind(),
                rows = count,
                "trained base quantizer"
            );
        }
        let codes = self.encode_batch(base.vectors())?;
        let code_size = self.quantizer.code_size();
        let zero_extra = vec![0u8; self.extra_info_size];
        let precise_encoder = Fp32Quantizer::new(self.dim);
        let mut precise_buf = vec![0u8; self.dim * 4];
        let mut skipped = Vec::new();

        for i in 0..count {
            let id = base.ids()[i];
            if self.label_map.contains_key(&id) {
                tracing::warn!(id, "skipping duplicate id");
                skipped.push(id);
                continue;
            }
            let internal = self.labels.len() as u32;
            let row = base.row(i);

            self.base_codes.push(&codes[i * code_size..(i + 1) * code_size])?;
            if let Some(precise) = self.precise_codes.as_mut() {
                precise_encoder.encode(row, &mut precise_buf);
                precise.push(&precise_buf)?;
            }
            if let Some(extra) = self.extra_infos.as_mut() {
                let record = match base.extra_infos() {
                    Some(all) => &all[i * self.extra_info_size..(i + 1) * self.extra_info_size],
                    None => zero_extra.as_slice(),
                };
                extra.push(record)?;
            }
            self.labels.push(id);
            self.label_map.insert(id, internal);

            let view = VectorView {
                metric: self.metric,
                dim: self.dim,
                quantizer: &self.quantizer,
                base_codes: &self.base_codes,
                precise_codes: self.precise_codes.as_ref(),
            };
            let prepared = view.quantizer.prepare(row);
            let query_dist = |other: u32| view.construction_distance(row, &prepared, other);
            let pair_dist = |a: u32, b: u32| view.pair_distance(a, b);
            self.graph.insert(internal, &query_dist, &pair_dist);
        }

        if !skipped.is_empty() {
            tracing::warn!(skipped = skipped.len(), "duplicate ids were not inserted");
        }
        Ok(skipped)
    }

    fn search_settings(&self, parameters: &str) -> Result<SearchSettings> {
        let parsed = SearchParameters::from_json(parameters)?;
        match self.engine {
            EngineKind::Hnsw => {
                let hnsw = parsed.hnsw.ok_or_else(|| {
                    Error::invalid_argument("hnsw search requires an 'hnsw' parameter block")
                })?;
                Ok(SearchSettings {
                    ef_search: hnsw.ef_search,
                    skip_ratio: hnsw.skip_ratio.clamp(0.0, 1.0),
                    use_extra_info_filter: false,
                    rerank: false,
                })
            }
            EngineKind::HGraph => {
                let hgraph = parsed.hgraph.ok_or_else(|| {
                    Error::invalid_argument("hgraph search requires an 'hgraph' parameter block")
                })?;
                if hgraph.use_extra_info_filter && self.extra_infos.is_none() {
                    return Err(Error::invalid_argument(
                        "extra info filtering requested on an index without extra info",
                    ));
                }
                Ok(SearchSettings {
                    ef_search: hgraph.ef_search,
                    skip_ratio: 0.0,
                    use_extra_info_filter: hgraph.use_extra_info_filter,
                    rerank: self.precise_codes.is_some()
                        && (!self.ignore_reorder || hgraph.use_reorder),
                })
            }
        }
    }

    /// Core search returning `(distance, internal id)` pairs, ascending
    fn search_internal(
        &self,
        query: &Dataset<'_>,
        k: usize,
        parameters: &str,
        filter: Option<&dyn Filter>,
        context: Option<&IteratorContext>,
    ) -> Result<Vec<(f32, u32)>> {
        if query.dim() != self.dim {
            return Err(Error::dimension_mismatch(self.dim, query.dim()));
        }
        if query.num_elements() != 1 || query.vectors().len() != self.dim {
            return Err(Error::invalid_argument("query dataset must hold exactly one vector"));
        }
        if k == 0 {
            return Err(Error::invalid_argument("k must be greater than 0"));
        }
        let settings = self.search_settings(parameters)?;
        if self.labels.is_empty() {
            return Ok(Vec::new());
        }

        let vector = query.row(0);
        let view = self.view();
        let prepared = self.quantizer.prepare(vector);
        let query_dist = |id: u32| view.query_distance(&prepared, id);

        let extra_infos = self.extra_infos.as_ref();
        let labels = &self.labels;
        let is_valid = |id: u32| -> bool {
            if context.map_or(false, |ctx| ctx.is_returned(id)) {
                return false;
            }
            match filter {
                None => true,
                Some(f) => match (settings.use_extra_info_filter, extra_infos) {
                    (true, Some(extra)) => {
                        f.check_valid(FilterTarget::ExtraInfo(extra.get(id as usize)))
                    }
                    _ => f.check_valid(FilterTarget::Id(labels[id as usize])),
                },
            }
        };

        let ef = settings.ef_search.max(k);
        let valid_ratio = filter.map_or(1.0, |f| f.valid_ratio().clamp(0.0, 1.0));
        let remaining = self.labels.len() - context.map_or(0, IteratorContext::num_returned);
        let estimated_valid = valid_ratio * remaining as f32;
        let restricted = filter.is_some() || context.is_some();

        let mut hits = if restricted && estimated_valid < ef as f32 {
            tracing::debug!(estimated_valid, ef, "falling back to exhaustive scan");
            self.brute_force(ef, &query_dist, &is_valid)
        } else {
            let skip_threshold = settings.skip_ratio * (1.0 - valid_ratio);
            let skip = |id: u32| unit_hash(id) < skip_threshold;
            let search_filter = SearchFilter {
                is_valid: restricted.then_some(&is_valid as &(dyn Fn(u32) -> bool + Sync)),
                skip: (filter.is_some() && skip_threshold > 0.0)
                    .then_some(&skip as &(dyn Fn(u32) -> bool + Sync)),
            };
            self.graph.search(ef, &query_dist, search_filter)
        };

        if settings.rerank {
            for hit in hits.iter_mut() {
                hit.0 = view.precise_distance(vector, hit.1);
            }
            hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        }
        hits.truncate(k);
        Ok(hits)
    }

    fn brute_force(
        &self,
        ef: usize,
        query_dist: &(dyn Fn(u32) -> f32 + Sync),
        is_valid: &(dyn Fn(u32) -> bool + Sync),
    ) -> Vec<(f32, u32)> {
        let mut heap: BinaryHeap<(OrderedDistance, u32)> = BinaryHeap::with_capacity(ef + 1);
        for id in 0..self.labels.len() as u32 {
            if !is_valid(id) {
                continue;
            }
            let dist = OrderedDistance(query_dist(id));
            if heap.len() < ef {
                heap.push((dist, id));
            } else if heap.peek().map_or(false, |&(worst, _)| dist < worst) {
                heap.pop();
                heap.push((dist, id));
            }
        }
        let mut out: Vec<(f32, u32)> = heap.into_iter().map(|(d, id)| (d.0, id)).collect();
        out.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        out
    }

    fn to_output(&self, hits: &[(f32, u32)]) -> SearchOutput {
        let ids = hits.iter().map(|&(_, id)| self.labels[id as usize]).collect();
        let distances = hits.iter().map(|&(d, _)| d).collect();
        let extra_infos = self.extra_infos.as_ref().map(|storage| {
            let mut buf = Vec::with_capacity(hits.len() * self.extra_info_size);
            for &(_, id) in hits {
                buf.extend_from_slice(storage.get(id as usize));
            }
            buf
        });
        SearchOutput {
            ids,
            distances,
            extra_infos,
        }
    }

    fn iterate_page(
        &self,
        query: &Dataset<'_>,
        k: usize,
        parameters: &str,
        filter: Option<&dyn Filter>,
        context: &mut IteratorContext,
        is_last_search: bool,
    ) -> Result<SearchOutput> {
        context.check_active()?;
        let hits = self.search_internal(query, k, parameters, filter, Some(context))?;
        let internal: Vec<u32> = hits.iter().map(|&(_, id)| id).collect();
        context.record_page(&internal, is_last_search)?;
        Ok(self.to_output(&hits))
    }
}

impl Index for GraphIndex {
    fn build(&mut self, base: &Dataset<'_>) -> Result<Vec<i64>> {
        if !self.labels.is_empty() {
            return Err(Error::new(
                ErrorType::BuildTwice,
                "build called on an index that already holds data",
            ));
        }
        let skipped = self.insert_batch(base)?;
        tracing::info!(
            engine = self.engine.name(),
            count = self.labels.len(),
            max_level = self.graph.max_level(),
            "index built"
        );
        Ok(skipped)
    }

    fn add(&mut self, base: &Dataset<'_>) -> Result<Vec<i64>> {
        if self.use_static && !self.labels.is_empty() {
            return Err(Error::new(
                ErrorType::UnsupportedIndexOperation,
                "static index does not accept additions after build",
            ));
        }
        let skipped = self.insert_batch(base)?;
        tracing::debug!(count = self.labels.len(), "vectors added");
        Ok(skipped)
    }

    fn knn_search(
        &self,
        query: &Dataset<'_>,
        k: usize,
        parameters: &str,
        filter: Option<&dyn Filter>,
    ) -> Result<SearchOutput> {
        let hits = self.search_internal(query, k, parameters, filter, None)?;
        Ok(self.to_output(&hits))
    }

    fn knn_search_iter(
        &self,
        query: &Dataset<'_>,
        k: usize,
        parameters: &str,
        filter: Option<&dyn Filter>,
        context: &mut Option<IteratorContext>,
        is_last_search: bool,
        allocator: Option<Arc<dyn Allocator>>,
    ) -> Result<SearchOutput> {
        let mut ctx = match context.take() {
            Some(ctx) => ctx,
            None => {
                let allocator = allocator.unwrap_or_else(|| Arc::clone(&self.allocator));
                IteratorContext::new(self.labels.len(), allocator)?
            }
        };
        let result = self.iterate_page(query, k, parameters, filter, &mut ctx, is_last_search);
        *context = Some(ctx);
        result
    }

    fn cal_distance_by_id(&self, query: &[f32], ids: &[i64]) -> Result<Vec<f32>> {
        if query.len() != self.dim {
            return Err(Error::dimension_mismatch(self.dim, query.len()));
        }
        let view = self.view();
        Ok(ids
            .iter()
            .map(|id| match self.label_map.get(id) {
                Some(&internal) => view.precise_distance(query, internal),
                None => UNKNOWN_ID_DISTANCE,
            })
            .collect())
    }

    fn get_extra_info_by_ids(&self, ids: &[i64], out: &mut [u8]) -> Result<()> {
        let storage = self.extra_infos.as_ref().ok_or_else(|| {
            Error::new(
                ErrorType::UnsupportedIndexOperation,
                "index was created without extra info",
            )
        })?;
        let size = self.extra_info_size;
        if out.len() != ids.len() * size {
            return Err(Error::invalid_argument(format!(
                "output buffer must be {} bytes, got {}",
                ids.len() * size,
                out.len()
            )));
        }
        for (slot, id) in out.chunks_exact_mut(size).zip(ids) {
            let internal = self
                .label_map
                .get(id)
                .ok_or_else(|| Error::invalid_argument(format!("id {} is not in the index", id)))?;
            slot.copy_from_slice(storage.get(*internal as usize));
        }
        Ok(())
    }

    fn get_min_and_max_id(&self) -> Result<(i64, i64)> {
        let min = self.labels.iter().min().copied();
        let max = self.labels.iter().max().copied();
        match (min, max) {
            (Some(min), Some(max)) => Ok((min, max)),
            _ => Err(Error::new(ErrorType::IndexEmpty, "index holds no vectors")),
        }
    }

    fn num_elements(&self) -> usize {
        self.labels.len()
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn estimate_memory(&self, rows: u64) -> u64 {
        let rows = rows as usize;
        let limit = self.block_size_limit;
        let mut total = BlockStorage::estimate(self.quantizer.code_size(), rows, limit);
        if self.precise_codes.is_some() {
            total += BlockStorage::estimate(self.dim * 4, rows, limit);
        }
        if self.extra_info_size > 0 {
            total += BlockStorage::estimate(self.extra_info_size, rows, limit);
        }
        total += LayeredGraph::estimate_memory(self.graph.config(), rows);
        // labels plus the id map
        total += rows * (std::mem::size_of::<i64>() * 2 + std::mem::size_of::<u32>() * 2);
        total as u64
    }

    fn memory_usage(&self) -> usize {
        self.base_codes.memory_usage()
            + self.precise_codes.as_ref().map_or(0, BlockStorage::memory_usage)
            + self.extra_infos.as_ref().map_or(0, BlockStorage::memory_usage)
            + self.graph.memory_usage()
            + self.labels.capacity() * std::mem::size_of::<i64>()
    }

    fn serialize(&self) -> Result<BinarySet> {
        let mut set = BinarySet::new();
        set.set(KEY_PARAMETERS, self.parameters.to_json()?.into_bytes());
        set.set(KEY_IDS, bincode::serialize(&self.labels)?);
        set.set(KEY_GRAPH, bincode::serialize(&self.graph)?);
        let blob = CodesBlob {
            quantizer: self.quantizer.clone(),
            codes: self.base_codes.to_bytes(),
        };
        set.set(KEY_BASE_CODES, bincode::serialize(&blob)?);
        if let Some(precise) = &self.precise_codes {
            set.set(KEY_PRECISE_CODES, precise.to_bytes());
        }
        if let Some(extra) = &self.extra_infos {
            set.set(KEY_EXTRA_INFOS, extra.to_bytes());
        }
        tracing::debug!(
            keys = set.len(),
            bytes = set.total_size(),
            "index serialized"
        );
        Ok(set)
    }

    fn deserialize(&mut self, set: &BinarySet) -> Result<()> {
        if !self.labels.is_empty() {
            return Err(Error::new(
                ErrorType::IndexNotEmpty,
                "deserialize requires an empty index",
            ));
        }

        let stored = std::str::from_utf8(set.require(KEY_PARAMETERS)?)
            .map_err(|e| Error::new(ErrorType::InvalidBinary, e.to_string()))
            .and_then(|json| {
                IndexParameters::from_json(json)
                    .map_err(|e| Error::new(ErrorType::InvalidBinary, e.message))
            })?;
        if stored != self.parameters {
            return Err(Error::new(
                ErrorType::InvalidBinary,
                "stored parameters do not match this index's configuration",
            ));
        }

        let labels: Vec<i64> = bincode::deserialize(set.require(KEY_IDS)?)?;
        let graph: LayeredGraph = bincode::deserialize(set.require(KEY_GRAPH)?)?;
        let blob: CodesBlob = bincode::deserialize(set.require(KEY_BASE_CODES)?)?;

        if graph.config() != self.graph.config() || graph.len() != labels.len() {
            return Err(Error::new(
                ErrorType::InvalidBinary,
                "graph blob does not match the stored ids or configuration",
            ));
        }
        if blob.quantizer.kind() != self.quantizer.kind() || blob.quantizer.dim() != self.dim {
            return Err(Error::new(
                ErrorType::InvalidBinary,
                "code blob was produced by a different quantizer",
            ));
        }

        let limit = self.block_size_limit;
        let mut base_codes =
            BlockStorage::new(blob.quantizer.code_size(), limit, Arc::clone(&self.allocator));
        base_codes.extend_from_bytes(&blob.codes)?;
        if base_codes.len() != labels.len() && blob.quantizer.code_size() > 0 {
            return Err(Error::new(
                ErrorType::InvalidBinary,
                "code count does not match id count",
            ));
        }

        let precise_codes = match &self.precise_codes {
            Some(existing) => {
                let mut storage = BlockStorage::new(
                    existing.record_size(),
                    limit,
                    Arc::clone(&self.allocator),
                );
                storage.extend_from_bytes(set.require(KEY_PRECISE_CODES)?)?;
                if storage.len() != labels.len() {
                    return Err(Error::new(
                        ErrorType::InvalidBinary,
                        "precise code count does not match id count",
                    ));
                }
                Some(storage)
            }
            None => None,
        };

        let extra_infos = match &self.extra_infos {
            Some(existing) => {
                let mut storage = BlockStorage::new(
                    existing.record_size(),
                    limit,
                    Arc::clone(&self.allocator),
                );
                storage.extend_from_bytes(set.require(KEY_EXTRA_INFOS)?)?;
                if storage.len() != labels.len() {
                    return Err(Error::new(
                        ErrorType::InvalidBinary,
                        "extra info count does not match id count",
                    ));
                }
                Some(storage)
            }
            None => None,
        };

        let mut label_map = HashMap::with_capacity(labels.len());
        for (internal, &id) in labels.iter().enumerate() {
            if label_map.insert(id, internal as u32).is_some() {
                return Err(Error::new(
                    ErrorType::InvalidBinary,
                    format!("id {} appears twice in the stored ids", id),
                ));
            }
        }

        self.quantizer = blob.quantizer;
        self.base_codes = base_codes;
        self.precise_codes = precise_codes;
        self.extra_infos = extra_infos;
        self.graph = graph;
        self.labels = labels;
        self.label_map = label_map;

        tracing::debug!(count = self.labels.len(), "index deserialized");
        Ok(())
    }
}

/// Borrowed view of stored vectors used to compute distances
struct VectorView<'a> {
    metric: Metric,
    dim: usize,
    quantizer: &'a AnyQuantizer,
    base_codes: &'a BlockStorage,
    precise_codes: Option<&'a BlockStorage>,
}

impl VectorView<'_> {
    /// Distance from a prepared query to stored base codes
    fn query_distance(&self, query: &PreparedQuery, id: u32) -> f32 {
        match self.quantizer {
            AnyQuantizer::Fp32(_) => self
                .metric
                .distance(&query.vector, self.base_codes.get_f32(id as usize)),
            other => other.distance(self.metric, query, self.base_codes.get(id as usize)),
        }
    }

    /// Most accurate distance available: precise codes, else base codes
    fn precise_distance(&self, query: &[f32], id: u32) -> f32 {
        match self.precise_codes {
            Some(precise) => self.metric.distance(query, precise.get_f32(id as usize)),
            None => self.query_distance(&self.quantizer.prepare(query), id),
        }
    }

    fn construction_distance(&self, row: &[f32], prepared: &PreparedQuery, id: u32) -> f32 {
        match self.precise_codes {
            Some(precise) => self.metric.distance(row, precise.get_f32(id as usize)),
            None => self.query_distance(prepared, id),
        }
    }

    fn vector(&self, id: u32) -> Cow<'_, [f32]> {
        if let Some(precise) = self.precise_codes {
            return Cow::Borrowed(precise.get_f32(id as usize));
        }
        match self.quantizer {
            AnyQuantizer::Fp32(_) => Cow::Borrowed(self.base_codes.get_f32(id as usize)),
            other => {
                let mut out = vec![0.0f32; self.dim];
                other.decode(self.base_codes.get(id as usize), &mut out);
                Cow::Owned(out)
            }
        }
    }

    fn pair_distance(&self, a: u32, b: u32) -> f32 {
        self.metric.distance(&self.vector(a), &self.vector(b))
    }
}

/// Deterministic uniform value in [0, 1) derived from an internal id
fn unit_hash(id: u32) -> f32 {
    let mut z = (id as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 40) as f32 / (1u64 << 24) as f32
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedDistance(f32);

impl Eq for OrderedDistance {}

impl PartialOrd for OrderedDistance {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedDistance {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}
