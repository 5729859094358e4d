//! C ABI for vecbridge
//!
//! Exposes index handles, filtered and paginated k-NN search, and persistence to
//! C and any language with a C FFI.
//!
//! # Conventions
//!
//! * Functions return `0` on success and a non-zero vecbridge error code on
//!   failure. The message is available from [`vb_last_error`] on the same thread.
//! * A panic inside the library is caught and reported as the internal error
//!   code; it never unwinds into the caller.
//! * Every pointer argument is checked for NULL before use.
//!
//! # Memory ownership
//!
//! * `VbIndex*` is created by [`vb_create_index`] and released with [`vb_delete_index`].
//! * `VbSearchResult*` is created by [`vb_knn_search`] and released with
//!   [`vb_free_search_result`].
//! * `VbIterContext*` is created by the first paginated [`vb_knn_search`] and
//!   released with [`vb_delete_iter_ctx`].
//! * Distance buffers from [`vb_cal_distance_by_id`] are released with
//!   [`vb_free_distances`].
//! * Error strings are owned by the library and valid until the next call on the
//!   same thread.
//!
//! # Thread safety
//!
//! A handle must not be used from several threads at once. Distinct handles are
//! independent.

use std::alloc::Layout;
use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::Arc;

use vecbridge_core::{
    AdapterError, Allocator, Continuation, FilterPredicate, FilterTarget, IndexHandle, IndexKind,
    IndexOptions, LogLevel, Logger, ProcessState, Result, SearchRequest, SearchResult,
};
use vecbridge_engine::{Error as EngineError, ErrorType};

static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

// =============================================================================
// Error Handling
// =============================================================================

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: String) {
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(message));
}

fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
}

/// Run `body` and turn its outcome into a status code
fn ffi_status(name: &str, body: impl FnOnce() -> Result<()>) -> c_int {
    clear_last_error();
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            set_last_error(err.to_string());
            err.code()
        }
        Err(_) => {
            tracing::error!("panic caught in {}", name);
            set_last_error(format!("Panic in {}", name));
            ErrorType::InternalError.code()
        }
    }
}

/// Run `body` for a function that reports through its return value only
fn ffi_value<T>(name: &str, fallback: T, body: impl FnOnce() -> T) -> T {
    clear_last_error();
    panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|_| {
        tracing::error!("panic caught in {}", name);
        set_last_error(format!("Panic in {}", name));
        fallback
    })
}

unsafe fn c_str<'a>(ptr: *const c_char, name: &'static str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(AdapterError::NullArgument(name));
    }
    CStr::from_ptr(ptr).to_str().map_err(|_| {
        EngineError::invalid_argument(format!("{} is not valid UTF-8", name)).into()
    })
}

unsafe fn raw_slice<'a, T>(ptr: *const T, len: usize, name: &'static str) -> Result<&'a [T]> {
    if ptr.is_null() {
        return Err(AdapterError::NullArgument(name));
    }
    Ok(slice::from_raw_parts(ptr, len))
}

fn to_usize(value: i64, name: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        EngineError::invalid_argument(format!("{} must be non-negative, got {}", name, value))
            .into()
    })
}

fn checked_len(rows: usize, width: usize, name: &str) -> Result<usize> {
    rows.checked_mul(width).ok_or_else(|| {
        EngineError::invalid_argument(format!("{} size overflows: {} x {}", name, rows, width))
            .into()
    })
}

unsafe fn index_ref<'a>(handle: *const VbIndex) -> Result<&'a VbIndex> {
    handle.as_ref().ok_or(AdapterError::NullArgument("handle"))
}

unsafe fn index_mut<'a>(handle: *mut VbIndex) -> Result<&'a mut VbIndex> {
    handle.as_mut().ok_or(AdapterError::NullArgument("handle"))
}

// =============================================================================
// Types
// =============================================================================

/// Opaque index handle
pub struct VbIndex {
    handle: IndexHandle,
}

/// Opaque paginated-search session
pub struct VbIterContext {
    continuation: Continuation,
}

/// Opaque search result
pub struct VbSearchResult {
    result: SearchResult,
}

/// Caller-supplied memory source.
///
/// Both callbacks receive `ctx` unchanged. `deallocate` gets the same size and
/// alignment that were passed to the matching `allocate`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VbAllocator {
    pub ctx: *mut c_void,
    pub allocate: Option<extern "C" fn(ctx: *mut c_void, size: usize, align: usize) -> *mut c_void>,
    pub deallocate:
        Option<extern "C" fn(ctx: *mut c_void, ptr: *mut c_void, size: usize, align: usize)>,
}

/// Log sink receiving the level (0 trace .. 6 off) and a NUL-terminated line
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VbLogger {
    pub ctx: *mut c_void,
    pub log: Option<extern "C" fn(ctx: *mut c_void, level: c_int, message: *const c_char)>,
}

/// Exclusion predicate: a callback returns true for items filtered out.
///
/// A missing callback excludes nothing of that kind.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VbFilter {
    pub ctx: *mut c_void,
    pub test_id: Option<extern "C" fn(ctx: *mut c_void, id: i64) -> bool>,
    pub test_extra_info:
        Option<extern "C" fn(ctx: *mut c_void, data: *const u8, len: usize) -> bool>,
}

struct ForeignAllocator {
    raw: VbAllocator,
}

// The caller guarantees the context stays valid and thread-safe for as long as
// any handle or session created with it is alive.
unsafe impl Send for ForeignAllocator {}
unsafe impl Sync for ForeignAllocator {}

impl Allocator for ForeignAllocator {
    fn name(&self) -> &str {
        "foreign"
    }

    fn allocate(&self, layout: Layout) -> *mut u8 {
        match self.raw.allocate {
            Some(allocate) => allocate(self.raw.ctx, layout.size(), layout.align()) as *mut u8,
            None => ptr::null_mut(),
        }
    }

    unsafe fn deallocate(&self, ptr: *mut u8, layout: Layout) {
        if let Some(deallocate) = self.raw.deallocate {
            deallocate(self.raw.ctx, ptr as *mut c_void, layout.size(), layout.align());
        }
    }
}

unsafe fn foreign_allocator(raw: *const VbAllocator) -> Result<Option<Arc<dyn Allocator>>> {
    let Some(raw) = raw.as_ref() else {
        return Ok(None);
    };
    if raw.allocate.is_none() || raw.deallocate.is_none() {
        return Err(AdapterError::NullArgument("allocator callback"));
    }
    Ok(Some(Arc::new(ForeignAllocator { raw: *raw })))
}

struct ForeignLogger {
    ctx: *mut c_void,
    log: extern "C" fn(ctx: *mut c_void, level: c_int, message: *const c_char),
}

unsafe impl Send for ForeignLogger {}
unsafe impl Sync for ForeignLogger {}

impl Logger for ForeignLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let line = CString::new(message.replace('\0', " ")).unwrap_or_default();
        (self.log)(self.ctx, level.as_raw(), line.as_ptr());
    }
}

struct ForeignFilter {
    raw: VbFilter,
}

unsafe impl Send for ForeignFilter {}
unsafe impl Sync for ForeignFilter {}

impl FilterPredicate for ForeignFilter {
    fn test(&self, target: FilterTarget<'_>) -> bool {
        match target {
            FilterTarget::Id(id) => self.raw.test_id.map_or(false, |f| f(self.raw.ctx, id)),
            FilterTarget::ExtraInfo(data) => self
                .raw
                .test_extra_info
                .map_or(false, |f| f(self.raw.ctx, data.as_ptr(), data.len())),
        }
    }
}

// =============================================================================
// Process
// =============================================================================

/// Initialize the library. Safe to call more than once.
///
/// # Returns
/// * `true` when the engine is ready
#[no_mangle]
pub extern "C" fn vb_init() -> bool {
    ffi_value("vb_init", false, vecbridge_core::init)
}

/// Library version as a static NUL-terminated string
#[no_mangle]
pub extern "C" fn vb_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

/// Set the minimum level forwarded to the installed logger.
///
/// Values above 6 are treated as off.
#[no_mangle]
pub extern "C" fn vb_set_log_level(level: c_int) -> c_int {
    ffi_status("vb_set_log_level", || {
        ProcessState::get().set_log_level(LogLevel::from_raw(level.into()));
        Ok(())
    })
}

/// Install a log sink. A logger whose `log` callback is NULL removes the
/// current sink.
///
/// Installing a sink resets the level to debug.
///
/// # Safety
/// * `logger.ctx` must remain valid until the sink is replaced or removed
/// * The callback may be invoked from any thread that uses the library
///
/// # Example (C)
/// ```c
/// void on_log(void* ctx, int level, const char* line) {
///     fprintf(stderr, "[%d] %s\n", level, line);
/// }
///
/// VbLogger logger = { NULL, on_log };
/// vb_set_logger(logger);
/// ```
#[no_mangle]
pub extern "C" fn vb_set_logger(logger: VbLogger) -> c_int {
    ffi_status("vb_set_logger", || {
        let state = ProcessState::get();
        match logger.log {
            Some(log) => state.set_logger(Arc::new(ForeignLogger {
                ctx: logger.ctx,
                log,
            })),
            None => state.clear_logger(),
        }
        Ok(())
    })
}

/// Upper bound in bytes for one engine storage block; applies to handles
/// created or deserialized afterwards
#[no_mangle]
pub extern "C" fn vb_set_block_size_limit(limit: u64) -> c_int {
    ffi_status("vb_set_block_size_limit", || {
        let limit = usize::try_from(limit).map_err(|_| {
            EngineError::invalid_argument(format!("block size limit {} is too large", limit))
        })?;
        ProcessState::get().set_block_size_limit(limit);
        Ok(())
    })
}

/// True for the defined kind discriminants (0 flat, 1 scalar-quantized,
/// 5 binary-quantized, 6 graph)
#[no_mangle]
pub extern "C" fn vb_is_supported_index(kind: c_int) -> bool {
    vecbridge_core::is_supported_index(kind)
}

/// Get the last error message on the current thread.
///
/// # Returns
/// * Error message string (NULL if no error)
///
/// # Safety
/// * Do NOT free the returned string
/// * Valid until the next vecbridge call on the same thread
///
/// # Example (C)
/// ```c
/// int rc = vb_build_index(index, vectors, ids, dim, count, NULL);
/// if (rc != 0) {
///     fprintf(stderr, "build failed (%d): %s\n", rc, vb_last_error());
/// }
/// ```
#[no_mangle]
pub extern "C" fn vb_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        Some(err) => err.as_ptr(),
        None => ptr::null(),
    })
}

// =============================================================================
// Index Lifecycle
// =============================================================================

/// Create an empty index.
///
/// # Arguments
/// * `out` - Receives the new handle
/// * `kind` - Index kind discriminant
/// * `dtype` - Element type name, e.g. "float32"
/// * `metric` - "l2" or "ip"
/// * `dim` - Vector dimension
/// * `max_degree`, `ef_construction`, `ef_search` - Graph parameters
/// * `allocator` - Memory source for the index (NULL for the default)
/// * `extra_info_size` - Bytes of payload per vector (0 for none)
///
/// # Safety
/// * `dtype` and `metric` must be valid NUL-terminated strings
/// * A non-NULL `allocator` must outlive the handle
///
/// # Example (C)
/// ```c
/// VbIndex* index = NULL;
/// if (vb_create_index(&index, 6, "float32", "l2", 128, 16, 200, 100, NULL, 0) != 0) {
///     fprintf(stderr, "%s\n", vb_last_error());
/// }
/// ```
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn vb_create_index(
    out: *mut *mut VbIndex,
    kind: c_int,
    dtype: *const c_char,
    metric: *const c_char,
    dim: c_int,
    max_degree: c_int,
    ef_construction: c_int,
    ef_search: c_int,
    allocator: *const VbAllocator,
    extra_info_size: c_int,
) -> c_int {
    ffi_status("vb_create_index", || unsafe {
        if out.is_null() {
            return Err(AdapterError::NullArgument("out"));
        }
        let kind = IndexKind::from_raw(kind)?;
        let options = IndexOptions::new(kind, to_usize(dim.into(), "dim")?)
            .with_dtype(c_str(dtype, "dtype")?)
            .with_metric(c_str(metric, "metric")?)
            .with_max_degree(to_usize(max_degree.into(), "max_degree")?)
            .with_ef_construction(to_usize(ef_construction.into(), "ef_construction")?)
            .with_ef_search(to_usize(ef_search.into(), "ef_search")?)
            .with_extra_info_size(to_usize(extra_info_size.into(), "extra_info_size")?);
        let handle = IndexHandle::create(options, foreign_allocator(allocator)?)?;
        *out = Box::into_raw(Box::new(VbIndex { handle }));
        Ok(())
    })
}

/// Destroy an index and set `*handle` to NULL.
///
/// NULL, or a pointer to NULL, is a no-op returning 0.
///
/// # Example (C)
/// ```c
/// vb_delete_index(&index);
/// vb_delete_index(&index); /* no-op */
/// ```
#[no_mangle]
pub extern "C" fn vb_delete_index(handle: *mut *mut VbIndex) -> c_int {
    ffi_status("vb_delete_index", || unsafe {
        if handle.is_null() || (*handle).is_null() {
            return Ok(());
        }
        let index = Box::from_raw(*handle);
        *handle = ptr::null_mut();
        index.handle.destroy();
        Ok(())
    })
}

unsafe fn insert_batch<'a>(
    index: &VbIndex,
    vectors: *const f32,
    ids: *const i64,
    dim: c_int,
    count: i64,
    extra_infos: *const u8,
) -> Result<(&'a [f32], &'a [i64], Option<&'a [u8]>)> {
    let dim = to_usize(dim.into(), "dim")?;
    if dim != index.handle.dim() {
        return Err(EngineError::dimension_mismatch(index.handle.dim(), dim).into());
    }
    let count = to_usize(count, "count")?;
    let vectors = raw_slice(vectors, checked_len(count, dim, "vectors")?, "vectors")?;
    let ids = raw_slice(ids, count, "ids")?;
    let width = index.handle.extra_info_size();
    let extra = if extra_infos.is_null() || width == 0 {
        None
    } else {
        Some(raw_slice(extra_infos, checked_len(count, width, "extra_infos")?, "extra_infos")?)
    };
    Ok((vectors, ids, extra))
}

/// Bulk load `count` vectors into an empty index.
///
/// # Arguments
/// * `vectors` - `count * dim` floats, row-major
/// * `ids` - `count` ids
/// * `extra_infos` - `count * extra_info_size` bytes, or NULL
#[no_mangle]
pub extern "C" fn vb_build_index(
    handle: *mut VbIndex,
    vectors: *const f32,
    ids: *const i64,
    dim: c_int,
    count: i64,
    extra_infos: *const u8,
) -> c_int {
    ffi_status("vb_build_index", || unsafe {
        let index = index_mut(handle)?;
        let (vectors, ids, extra) = insert_batch(index, vectors, ids, dim, count, extra_infos)?;
        index.handle.build(vectors, ids, extra)
    })
}

/// Insert `count` vectors. Arguments as for [`vb_build_index`].
#[no_mangle]
pub extern "C" fn vb_add_index(
    handle: *mut VbIndex,
    vectors: *const f32,
    ids: *const i64,
    dim: c_int,
    count: i64,
    extra_infos: *const u8,
) -> c_int {
    ffi_status("vb_add_index", || unsafe {
        let index = index_mut(handle)?;
        let (vectors, ids, extra) = insert_batch(index, vectors, ids, dim, count, extra_infos)?;
        index.handle.add(vectors, ids, extra)
    })
}

#[no_mangle]
pub extern "C" fn vb_get_index_number(handle: *const VbIndex, out: *mut i64) -> c_int {
    ffi_status("vb_get_index_number", || unsafe {
        let index = index_ref(handle)?;
        let out = out.as_mut().ok_or(AdapterError::NullArgument("out"))?;
        *out = index.handle.count();
        Ok(())
    })
}

/// Kind discriminant of the index, or -1 for NULL
#[no_mangle]
pub extern "C" fn vb_get_index_type(handle: *const VbIndex) -> c_int {
    ffi_value("vb_get_index_type", -1, || unsafe {
        handle.as_ref().map_or(-1, |index| index.handle.kind().as_raw())
    })
}

/// Estimated bytes for an index of this configuration holding `rows` vectors;
/// 0 for NULL
#[no_mangle]
pub extern "C" fn vb_estimate_memory(handle: *const VbIndex, rows: u64) -> u64 {
    ffi_value("vb_estimate_memory", 0, || unsafe {
        handle.as_ref().map_or(0, |index| index.handle.estimate_memory(rows))
    })
}

// =============================================================================
// Lookups
// =============================================================================

/// Distance from `query` to each of `count` stored ids.
///
/// Unknown ids get -1. On success `*out` holds `count` floats to be released
/// with [`vb_free_distances`].
#[no_mangle]
pub extern "C" fn vb_cal_distance_by_id(
    handle: *const VbIndex,
    query: *const f32,
    dim: c_int,
    ids: *const i64,
    count: i64,
    out: *mut *mut f32,
) -> c_int {
    ffi_status("vb_cal_distance_by_id", || unsafe {
        let index = index_ref(handle)?;
        if out.is_null() {
            return Err(AdapterError::NullArgument("out"));
        }
        let query = raw_slice(query, to_usize(dim.into(), "dim")?, "query")?;
        let ids = raw_slice(ids, to_usize(count, "count")?, "ids")?;
        let distances = index.handle.cal_distance_by_id(query, ids)?;
        *out = Box::into_raw(distances.into_boxed_slice()) as *mut f32;
        Ok(())
    })
}

/// Release a buffer from [`vb_cal_distance_by_id`]. NULL is a no-op.
///
/// # Safety
/// * `count` must be the count passed to the producing call
#[no_mangle]
pub extern "C" fn vb_free_distances(distances: *mut f32, count: i64) {
    if distances.is_null() {
        return;
    }
    let Ok(count) = usize::try_from(count) else {
        return;
    };
    unsafe {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(distances, count)));
    }
}

/// Smallest and largest stored id; both 0 for an empty index
#[no_mangle]
pub extern "C" fn vb_get_vid_bound(handle: *const VbIndex, min: *mut i64, max: *mut i64) -> c_int {
    ffi_status("vb_get_vid_bound", || unsafe {
        let index = index_ref(handle)?;
        let min = min.as_mut().ok_or(AdapterError::NullArgument("min"))?;
        let max = max.as_mut().ok_or(AdapterError::NullArgument("max"))?;
        (*min, *max) = index.handle.id_bounds()?;
        Ok(())
    })
}

/// Copy the payloads of `count` ids into `out`, which must hold
/// `count * extra_info_size` bytes
#[no_mangle]
pub extern "C" fn vb_get_extra_info_by_ids(
    handle: *const VbIndex,
    ids: *const i64,
    count: i64,
    out: *mut u8,
) -> c_int {
    ffi_status("vb_get_extra_info_by_ids", || unsafe {
        let index = index_ref(handle)?;
        let count = to_usize(count, "count")?;
        let ids = raw_slice(ids, count, "ids")?;
        if out.is_null() {
            return Err(AdapterError::NullArgument("out"));
        }
        let len = checked_len(count, index.handle.extra_info_size(), "out")?;
        let out = slice::from_raw_parts_mut(out, len);
        index.handle.get_extra_info_by_ids(ids, out)
    })
}

// =============================================================================
// Search
// =============================================================================

/// k-NN search, one-shot or paginated.
///
/// # Arguments
/// * `query` - `dim` floats
/// * `topk` - Maximum results
/// * `ef_search` - Candidate list size; 0 or negative uses the index default
/// * `need_extra_info` - Attach payloads to the result
/// * `filter` - Exclusion predicate (NULL for none)
/// * `reverse_filter` - Keep only the items the predicate matches
/// * `use_extra_info_filter` - Ask the predicate about payloads instead of ids
/// * `valid_ratio` - Caller's estimate of the fraction of items that pass
/// * `allocator` - Memory for this search's session state (NULL for the default)
/// * `iter_ctx` - NULL for a one-shot search. Otherwise the address of a
///   session pointer: NULL starts a session, non-NULL continues it.
/// * `is_last_search` - Release the session's state after this page
/// * `out` - Receives the result
///
/// # Example (C)
/// ```c
/// VbIterContext* session = NULL;
/// VbSearchResult* page = NULL;
/// for (int i = 0; i < 3; i++) {
///     vb_knn_search(index, query, 128, 10, 200, false, NULL, false, false, 1.0f,
///                   NULL, &session, i == 2, &page);
///     /* read vb_result_ids(page) ... */
///     vb_free_search_result(page);
/// }
/// vb_delete_iter_ctx(session);
/// ```
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn vb_knn_search(
    handle: *const VbIndex,
    query: *const f32,
    dim: c_int,
    topk: i64,
    ef_search: c_int,
    need_extra_info: bool,
    filter: *const VbFilter,
    reverse_filter: bool,
    use_extra_info_filter: bool,
    valid_ratio: f32,
    allocator: *const VbAllocator,
    iter_ctx: *mut *mut VbIterContext,
    is_last_search: bool,
    out: *mut *mut VbSearchResult,
) -> c_int {
    ffi_status("vb_knn_search", || unsafe {
        let index = index_ref(handle)?;
        if out.is_null() {
            return Err(AdapterError::NullArgument("out"));
        }
        let query = raw_slice(query, to_usize(dim.into(), "dim")?, "query")?;
        let predicate = filter.as_ref().map(|raw| ForeignFilter { raw: *raw });

        let mut request = SearchRequest::new(query, to_usize(topk, "topk")?)
            .with_extra_info(need_extra_info)
            .with_reverse_filter(reverse_filter)
            .with_extra_info_filter(use_extra_info_filter)
            .with_valid_ratio(valid_ratio)
            .with_last_search(is_last_search);
        if ef_search > 0 {
            request = request.with_ef_search(ef_search as usize);
        }
        if let Some(predicate) = predicate.as_ref() {
            request = request.with_filter(predicate);
        }
        if let Some(allocator) = foreign_allocator(allocator)? {
            request = request.with_allocator(allocator);
        }

        let result = if iter_ctx.is_null() {
            index.handle.search(&request)?
        } else if let Some(session) = (*iter_ctx).as_mut() {
            index.handle.search_iter(&request, &mut session.continuation)?
        } else {
            let mut session = Box::new(VbIterContext {
                continuation: Continuation::new(),
            });
            let result = index.handle.search_iter(&request, &mut session.continuation)?;
            *iter_ctx = Box::into_raw(session);
            result
        };
        *out = Box::into_raw(Box::new(VbSearchResult { result }));
        Ok(())
    })
}

/// Release a paginated-search session. NULL is a no-op.
#[no_mangle]
pub extern "C" fn vb_delete_iter_ctx(ctx: *mut VbIterContext) {
    if ctx.is_null() {
        return;
    }
    let _ = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        let mut session = Box::from_raw(ctx);
        session.continuation.release();
    }));
}

/// Number of hits in a result; 0 for NULL
#[no_mangle]
pub extern "C" fn vb_result_size(result: *const VbSearchResult) -> i64 {
    unsafe { result.as_ref() }.map_or(0, |r| r.result.len() as i64)
}

/// Hit ids, nearest first; NULL for a NULL result
#[no_mangle]
pub extern "C" fn vb_result_ids(result: *const VbSearchResult) -> *const i64 {
    unsafe { result.as_ref() }.map_or(ptr::null(), |r| r.result.ids.as_ptr())
}

/// Distances parallel to [`vb_result_ids`]
#[no_mangle]
pub extern "C" fn vb_result_distances(result: *const VbSearchResult) -> *const f32 {
    unsafe { result.as_ref() }.map_or(ptr::null(), |r| r.result.distances.as_ptr())
}

/// Payloads parallel to [`vb_result_ids`], `extra_info_size` bytes each; NULL
/// unless the search asked for them
#[no_mangle]
pub extern "C" fn vb_result_extra_infos(result: *const VbSearchResult) -> *const u8 {
    unsafe { result.as_ref() }
        .and_then(|r| r.result.extra_infos.as_ref())
        .map_or(ptr::null(), |extra| extra.as_ptr())
}

/// Release a result from [`vb_knn_search`]. NULL is a no-op.
#[no_mangle]
pub extern "C" fn vb_free_search_result(result: *mut VbSearchResult) {
    if !result.is_null() {
        unsafe { drop(Box::from_raw(result)) };
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// Write the index under directory `dir`, one file per blob plus a manifest
#[no_mangle]
pub extern "C" fn vb_serialize(handle: *const VbIndex, dir: *const c_char) -> c_int {
    ffi_status("vb_serialize", || unsafe {
        let index = index_ref(handle)?;
        index.handle.serialize_to_directory(c_str(dir, "dir")?)
    })
}

/// Replace the index contents with those written by [`vb_serialize`].
///
/// The handle must have been created with the same configuration. On failure
/// the previous contents are kept.
#[no_mangle]
pub extern "C" fn vb_deserialize_bin(handle: *mut VbIndex, dir: *const c_char) -> c_int {
    ffi_status("vb_deserialize_bin", || unsafe {
        let index = index_mut(handle)?;
        index.handle.deserialize_from_directory(c_str(dir, "dir")?)
    })
}

/// Write the index to a single file
#[no_mangle]
pub extern "C" fn vb_fserialize(handle: *const VbIndex, path: *const c_char) -> c_int {
    ffi_status("vb_fserialize", || unsafe {
        let index = index_ref(handle)?;
        index.handle.serialize_to_file(c_str(path, "path")?)
    })
}

/// Replace the index contents with a file written by [`vb_fserialize`]
#[no_mangle]
pub extern "C" fn vb_fdeserialize(handle: *mut VbIndex, path: *const c_char) -> c_int {
    ffi_status("vb_fdeserialize", || unsafe {
        let index = index_mut(handle)?;
        index.handle.deserialize_from_file(c_str(path, "path")?)
    })
}

// =============================================================================
// Tests
// =============================================================================
