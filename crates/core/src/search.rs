//! Search orchestration: one-shot and paginated k-NN search
//!
//! A paginated session is one query vector and one filter carried across several
//! calls through a [`Continuation`]:
//!
//! ```text
//! Fresh --search--> InProgress --search(is_last_search)--> Exhausted
//! ```
//!
//! A continuation must be released exactly once when the caller is done with
//! it, including after it became exhausted.

use crate::config::IndexConfigBuilder;
use crate::error::{AdapterError, Result};
use crate::filter::{FilterBridge, FilterPredicate};
use crate::handle::IndexHandle;
use crate::logging::TaskTimer;
use std::sync::Arc;
use vecbridge_engine::{
    Allocator, Dataset, Error as EngineError, ErrorType, Filter, IteratorContext, SearchOutput,
};

/// One search call's inputs
#[derive(Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a [f32],
    pub topk: usize,
    /// Candidate list size; `None` uses the handle's creation value
    pub ef_search: Option<usize>,
    pub filter: Option<&'a dyn FilterPredicate>,
    pub reverse_filter: bool,
    pub use_extra_info_filter: bool,
    pub need_extra_info: bool,
    /// Estimated fraction of the corpus the filter keeps
    pub valid_ratio: f32,
    pub is_last_search: bool,
    /// Allocator for iterator state; the index's allocator otherwise
    pub allocator: Option<Arc<dyn Allocator>>,
}

impl<'a> SearchRequest<'a> {
    pub fn new(query: &'a [f32], topk: usize) -> Self {
        Self {
            query,
            topk,
            ef_search: None,
            filter: None,
            reverse_filter: false,
            use_extra_info_filter: false,
            need_extra_info: false,
            valid_ratio: 1.0,
            is_last_search: false,
            allocator: None,
        }
    }

    pub fn with_ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = Some(ef_search);
        self
    }

    pub fn with_filter(mut self, filter: &'a dyn FilterPredicate) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_reverse_filter(mut self, reverse: bool) -> Self {
        self.reverse_filter = reverse;
        self
    }

    pub fn with_extra_info_filter(mut self, enabled: bool) -> Self {
        self.use_extra_info_filter = enabled;
        self
    }

    pub fn with_extra_info(mut self, needed: bool) -> Self {
        self.need_extra_info = needed;
        self
    }

    pub fn with_valid_ratio(mut self, valid_ratio: f32) -> Self {
        self.valid_ratio = valid_ratio;
        self
    }

    pub fn with_last_search(mut self, is_last: bool) -> Self {
        self.is_last_search = is_last;
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }
}

/// Ids and distances ascending by distance, plus extra info when requested
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub ids: Vec<i64>,
    pub distances: Vec<f32>,
    pub extra_infos: Option<Vec<u8>>,
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    InProgress,
    Exhausted,
}

/// Cursor of a paginated search session
#[derive(Debug)]
pub struct Continuation {
    context: Option<IteratorContext>,
    state: SessionState,
}

impl Continuation {
    pub fn new() -> Self {
        Self {
            context: None,
            state: SessionState::Fresh,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Results handed out so far in this session
    pub fn num_returned(&self) -> usize {
        self.context.as_ref().map_or(0, IteratorContext::num_returned)
    }

    /// Drop engine state; calling again is a no-op
    pub fn release(&mut self) {
        if self.context.take().is_some() {
            tracing::debug!("TRACE LOG[delete_iter_ctx]");
        }
        self.state = SessionState::Exhausted;
    }
}

impl Default for Continuation {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexHandle {
    /// One-shot k-NN search
    pub fn search(&self, request: &SearchRequest<'_>) -> Result<SearchResult> {
        let _timer = TaskTimer::new("knn search");
        self.trace_request(request);
        self.validate(request)?;

        let parameters = self.search_parameters(request)?;
        let bridge = request
            .filter
            .map(|p| FilterBridge::new(p, request.reverse_filter, request.valid_ratio));
        let filter = bridge.as_ref().map(|b| b as &dyn Filter);

        let output = self
            .index
            .knn_search(&Dataset::query(request.query), request.topk, &parameters, filter)
            .map_err(search_failed)?;
        Ok(self.unpack(output, request.need_extra_info))
    }

    /// Next page of a paginated search.
    ///
    /// Binary-quantized handles and handles on a profile without continuation
    /// support reject this with `UnsupportedIndexKind` before reaching the engine.
    pub fn search_iter(
        &self,
        request: &SearchRequest<'_>,
        continuation: &mut Continuation,
    ) -> Result<SearchResult> {
        let _timer = TaskTimer::new("knn search iter");
        self.trace_request(request);
        if !self.kind().supports_iterative_search() || !self.profile().supports_continuation {
            tracing::error!("iterative search is not supported for kind {}", self.kind());
            return Err(AdapterError::UnsupportedIndexKind(format!(
                "{} does not support iterative search",
                self.kind()
            )));
        }
        self.validate(request)?;
        if continuation.state == SessionState::Exhausted && continuation.context.is_none() {
            return Err(EngineError::new(
                ErrorType::WrongStatus,
                "continuation was released",
            )
            .into());
        }

        let parameters = self.search_parameters(request)?;
        let bridge = request
            .filter
            .map(|p| FilterBridge::new(p, request.reverse_filter, request.valid_ratio));
        let filter = bridge.as_ref().map(|b| b as &dyn Filter);

        let result = self.index.knn_search_iter(
            &Dataset::query(request.query),
            request.topk,
            &parameters,
            filter,
            &mut continuation.context,
            request.is_last_search,
            request.allocator.clone(),
        );
        if continuation.context.as_ref().map_or(false, IteratorContext::is_exhausted) {
            continuation.state = SessionState::Exhausted;
        } else if continuation.context.is_some() {
            continuation.state = SessionState::InProgress;
        }

        let output = result.map_err(search_failed)?;
        Ok(self.unpack(output, request.need_extra_info))
    }

    fn validate(&self, request: &SearchRequest<'_>) -> Result<()> {
        if request.query.is_empty() {
            return Err(AdapterError::NullArgument("query"));
        }
        Ok(())
    }

    fn search_parameters(&self, request: &SearchRequest<'_>) -> Result<String> {
        let ef_search = request.ef_search.unwrap_or(self.options().ef_search);
        let parameters = IndexConfigBuilder::new(self.profile()).search_parameters(
            self.kind(),
            ef_search,
            request.use_extra_info_filter,
        );
        Ok(parameters.to_json()?)
    }

    fn trace_request(&self, request: &SearchRequest<'_>) {
        tracing::debug!(
            "TRACE LOG[knn_search]: topk={}, ef_search={:?}, filter={}, reverse_filter={}, use_extra_info_filter={}, need_extra_info={}, valid_ratio={}, is_last_search={}",
            request.topk,
            request.ef_search,
            request.filter.is_some(),
            request.reverse_filter,
            request.use_extra_info_filter,
            request.need_extra_info,
            request.valid_ratio,
            request.is_last_search
        );
    }

    fn unpack(&self, output: SearchOutput, need_extra_info: bool) -> SearchResult {
        let (ids, distances, extra_infos) = output.into_parts();
        for (id, distance) in ids.iter().zip(&distances) {
            tracing::debug!("   result: id={}, distance={}", id, distance);
        }
        SearchResult {
            ids,
            distances,
            extra_infos: if need_extra_info { extra_infos } else { None },
        }
    }
}

fn search_failed(e: EngineError) -> AdapterError {
    tracing::error!(code = e.code(), "knn search failed: {}", e);
    e.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigProfile, IndexOptions};
    use crate::filter::ExclusionSet;
    use crate::kind::IndexKind;
    use crate::testing::random_vectors;
    use std::collections::HashSet;
    use vecbridge_engine::FilterTarget;

    fn built(kind: IndexKind, rows: usize, dim: usize, seed: u64) -> (IndexHandle, Vec<f32>) {
        let options = IndexOptions::new(kind, dim)
            .with_max_degree(16)
            .with_ef_construction(100)
            .with_ef_search(64);
        let mut handle = IndexHandle::create(options, None).unwrap();
        let vectors = random_vectors(rows, dim, seed);
        let ids: Vec<i64> = (0..rows as i64).collect();
        handle.build(&vectors, &ids, None).unwrap();
        (handle, vectors)
    }

    #[test]
    fn test_topk_length_and_order() {
        let dim = 16;
        for kind in IndexKind::ALL {
            let (handle, vectors) = built(kind, 300, dim, 1);
            let query = &vectors[..dim];
            let result = handle.search(&SearchRequest::new(query, 10)).unwrap();
            assert_eq!(result.len(), 10, "{}", kind);
            for pair in result.distances.windows(2) {
                assert!(pair[0] <= pair[1], "{}", kind);
            }

            // corpus smaller than topk
            let small = &vectors[..dim * 5];
            let mut tiny = IndexHandle::create(IndexOptions::new(kind, dim), None).unwrap();
            tiny.build(small, &[1, 2, 3, 4, 5], None).unwrap();
            let result = tiny.search(&SearchRequest::new(query, 10)).unwrap();
            assert_eq!(result.len(), 5, "{}", kind);
        }
    }

    #[test]
    fn test_exclusion_filter() {
        let dim = 8;
        let (handle, vectors) = built(IndexKind::Flat, 400, dim, 2);
        let excluded: ExclusionSet = (0..400).filter(|id| id % 3 == 0).collect();
        let query = &vectors[..dim];

        let result = handle
            .search(&SearchRequest::new(query, 20).with_filter(&excluded))
            .unwrap();
        assert_eq!(result.len(), 20);
        assert!(result.ids.iter().all(|id| !excluded.contains(*id)));

        let result = handle
            .search(
                &SearchRequest::new(query, 20)
                    .with_filter(&excluded)
                    .with_reverse_filter(true),
            )
            .unwrap();
        assert_eq!(result.len(), 20);
        assert!(result.ids.iter().all(|id| excluded.contains(*id)));
        assert_eq!(result.ids[0], 0);
    }

    #[test]
    fn test_filter_on_quantized_kinds() {
        let dim = 16;
        for kind in [IndexKind::ScalarQuantized, IndexKind::BinaryQuantized, IndexKind::Graph] {
            let (handle, vectors) = built(kind, 300, dim, 3);
            let odd = |id: i64| id % 2 == 1;
            let result = handle
                .search(
                    &SearchRequest::new(&vectors[..dim], 10)
                        .with_filter(&odd)
                        .with_valid_ratio(0.5),
                )
                .unwrap();
            assert_eq!(result.len(), 10, "{}", kind);
            assert!(result.ids.iter().all(|id| id % 2 == 0), "{}", kind);
        }
    }

    struct ExcludeTag(u8);

    impl FilterPredicate for ExcludeTag {
        fn test(&self, target: FilterTarget<'_>) -> bool {
            match target {
                FilterTarget::ExtraInfo(record) => record[0] == self.0,
                FilterTarget::Id(_) => false,
            }
        }
    }

    #[test]
    fn test_extra_info_filter_and_payloads() {
        let dim = 8;
        let options = IndexOptions::new(IndexKind::Graph, dim).with_extra_info_size(2);
        let mut handle = IndexHandle::create(options, None).unwrap();
        let vectors = random_vectors(200, dim, 4);
        let ids: Vec<i64> = (0..200).collect();
        let extra: Vec<u8> = (0..200u32).flat_map(|i| [(i % 2) as u8, 0xAB]).collect();
        handle.build(&vectors, &ids, Some(&extra)).unwrap();

        let tag = ExcludeTag(0);
        let request = SearchRequest::new(&vectors[..dim], 5)
            .with_filter(&tag)
            .with_extra_info_filter(true)
            .with_extra_info(true);
        let result = handle.search(&request).unwrap();
        assert_eq!(result.len(), 5);
        assert!(result.ids.iter().all(|id| id % 2 == 1));
        let payload = result.extra_infos.unwrap();
        assert_eq!(payload.len(), 10);
        assert!(payload.chunks(2).all(|r| r == [1, 0xAB]));

        // payloads omitted unless requested
        let plain = handle.search(&SearchRequest::new(&vectors[..dim], 5)).unwrap();
        assert!(plain.extra_infos.is_none());
    }

    #[test]
    fn test_iterative_pages_match_single_search() {
        let dim = 8;
        for kind in [IndexKind::Flat, IndexKind::Graph, IndexKind::ScalarQuantized] {
            let (handle, vectors) = built(kind, 300, dim, 5);
            let query = &vectors[7 * dim..8 * dim];
            let request = SearchRequest::new(query, 10).with_ef_search(400);

            let mut continuation = Continuation::new();
            assert_eq!(continuation.state(), SessionState::Fresh);
            let first = handle.search_iter(&request, &mut continuation).unwrap();
            assert_eq!(continuation.state(), SessionState::InProgress);
            let second = handle
                .search_iter(&request.clone().with_last_search(true), &mut continuation)
                .unwrap();
            assert_eq!(continuation.state(), SessionState::Exhausted);

            let both = handle
                .search(&SearchRequest::new(query, 20).with_ef_search(400))
                .unwrap();

            let a: HashSet<i64> = first.ids.iter().copied().collect();
            let b: HashSet<i64> = second.ids.iter().copied().collect();
            assert_eq!(a.len(), 10);
            assert!(a.is_disjoint(&b), "{}", kind);
            let union: HashSet<i64> = a.union(&b).copied().collect();
            let expected: HashSet<i64> = both.ids.iter().copied().collect();
            assert_eq!(union, expected, "{}", kind);

            continuation.release();
            continuation.release();
        }
    }

    #[test]
    fn test_exhausted_continuation_rejected() {
        let dim = 4;
        let (handle, vectors) = built(IndexKind::Flat, 50, dim, 6);
        let request = SearchRequest::new(&vectors[..dim], 5).with_last_search(true);
        let mut continuation = Continuation::new();
        handle.search_iter(&request, &mut continuation).unwrap();

        let err = handle.search_iter(&request, &mut continuation).unwrap_err();
        assert_eq!(err.engine_kind(), Some(ErrorType::WrongStatus));

        continuation.release();
        let err = handle.search_iter(&request, &mut continuation).unwrap_err();
        assert_eq!(err.engine_kind(), Some(ErrorType::WrongStatus));
    }

    #[test]
    fn test_binary_quantized_rejects_iteration() {
        let dim = 8;
        let (handle, vectors) = built(IndexKind::BinaryQuantized, 50, dim, 7);
        let mut continuation = Continuation::new();
        let err = handle
            .search_iter(&SearchRequest::new(&vectors[..dim], 5), &mut continuation)
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedIndexKind(_)));
        assert_ne!(err.code(), 0);
        // nothing reached the engine
        assert_eq!(continuation.state(), SessionState::Fresh);
        assert_eq!(continuation.num_returned(), 0);
    }

    #[test]
    fn test_legacy_profile_rejects_iteration() {
        let dim = 4;
        let handle = IndexHandle::create_with_profile(
            IndexOptions::new(IndexKind::Flat, dim),
            ConfigProfile::LEGACY,
            None,
        )
        .unwrap();
        let mut continuation = Continuation::new();
        let err = handle
            .search_iter(&SearchRequest::new(&[0.0; 4], 1), &mut continuation)
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedIndexKind(_)));
    }

    #[test]
    fn test_null_query() {
        let (handle, _) = built(IndexKind::Flat, 10, 4, 8);
        let err = handle.search(&SearchRequest::new(&[], 1)).unwrap_err();
        assert!(matches!(err, AdapterError::NullArgument("query")));
    }

    #[test]
    fn test_flat_scenario_finds_last_vector() {
        let dim = 128;
        let rows = 10_000;
        let options = IndexOptions::new(IndexKind::Flat, dim)
            .with_max_degree(16)
            .with_ef_construction(100)
            .with_ef_search(200);
        let mut handle = IndexHandle::create(options, None).unwrap();
        let vectors = random_vectors(rows, dim, 9);
        let ids: Vec<i64> = (0..rows as i64).collect();
        handle.build(&vectors, &ids, None).unwrap();
        assert_eq!(handle.count(), rows as i64);

        let last = &vectors[(rows - 1) * dim..];
        let result = handle.search(&SearchRequest::new(last, 10)).unwrap();
        assert_eq!(result.len(), 10);
        assert_eq!(result.ids[0], (rows - 1) as i64);
        assert!(result.distances[0].abs() < 1e-4);
    }
}
