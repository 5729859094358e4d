//! Pluggable memory allocation for index storage
//!
//! Every byte of vector codes, extra-info records and iterator state an index
//! holds is obtained through an [`Allocator`]. Callers that embed the engine can
//! route those bytes through their own memory accounting by supplying an
//! implementation at index creation (and, for iterator state, at search time).

use crate::{Error, ErrorType, Result};
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

/// Alignment of every block the engine requests
pub const BLOCK_ALIGN: usize = 16;

/// Source of raw memory for index storage.
///
/// Implementations must be usable from several threads at once.
pub trait Allocator: Send + Sync {
    /// Short identifying name, used in logs
    fn name(&self) -> &str;

    /// Allocate memory for `layout`.
    ///
    /// Returns a null pointer when the request cannot be satisfied.
    fn allocate(&self, layout: Layout) -> *mut u8;

    /// Return memory obtained from [`Allocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from a call to `allocate` on this allocator with the same
    /// `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: *mut u8, layout: Layout);
}

/// Allocator backed by the global Rust allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAllocator;

impl Allocator for DefaultAllocator {
    fn name(&self) -> &str {
        "default"
    }

    fn allocate(&self, layout: Layout) -> *mut u8 {
        if layout.size() == 0 {
            return std::ptr::null_mut();
        }
        // SAFETY: layout has a non-zero size.
        unsafe { std::alloc::alloc(layout) }
    }

    unsafe fn deallocate(&self, ptr: *mut u8, layout: Layout) {
        if !ptr.is_null() && layout.size() != 0 {
            std::alloc::dealloc(ptr, layout);
        }
    }
}

/// Shared handle to the default allocator
pub fn default_allocator() -> Arc<dyn Allocator> {
    Arc::new(DefaultAllocator)
}

/// Zero-initialized memory region owned through an [`Allocator`].
///
/// The region is returned to its allocator on drop.
pub struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
    allocator: Arc<dyn Allocator>,
}

// SAFETY: a Block exclusively owns its region; shared access only hands out
// immutable byte slices.
unsafe impl Send for Block {}
unsafe impl Sync for Block {}

impl Block {
    /// Allocate `size` zeroed bytes (at least one) from `allocator`
    pub fn new(allocator: &Arc<dyn Allocator>, size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size.max(1), BLOCK_ALIGN)
            .map_err(|e| Error::new(ErrorType::NoEnoughMemory, e.to_string()))?;
        let raw = allocator.allocate(layout);
        let ptr = NonNull::new(raw).ok_or_else(|| {
            Error::new(
                ErrorType::NoEnoughMemory,
                format!(
                    "allocator '{}' failed to provide {} bytes",
                    allocator.name(),
                    layout.size()
                ),
            )
        })?;
        // SAFETY: ptr is valid for layout.size() writes.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, layout.size()) };

        Ok(Self {
            ptr,
            layout,
            allocator: Arc::clone(allocator),
        })
    }

    /// Size of the region in bytes
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the region is initialized and lives as long as self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the region is initialized and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// View `count` f32 values starting at byte `offset`.
    ///
    /// Panics if the range is out of bounds or misaligned.
    pub fn f32_slice(&self, offset: usize, count: usize) -> &[f32] {
        let bytes = &self.as_slice()[offset..offset + count * 4];
        assert_eq!(
            bytes.as_ptr() as usize % std::mem::align_of::<f32>(),
            0,
            "misaligned f32 view"
        );
        // SAFETY: range is in bounds, aligned for f32, initialized, and every
        // bit pattern is a valid f32.
        unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const f32, count) }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: ptr and layout are exactly what allocate returned/was given.
        unsafe { self.allocator.deallocate(self.ptr.as_ptr(), self.layout) };
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.layout.size())
            .field("allocator", &self.allocator.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        live: AtomicUsize,
    }

    impl Allocator for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn allocate(&self, layout: Layout) -> *mut u8 {
            self.live.fetch_add(layout.size(), Ordering::SeqCst);
            DefaultAllocator.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: *mut u8, layout: Layout) {
            self.live.fetch_sub(layout.size(), Ordering::SeqCst);
            DefaultAllocator.deallocate(ptr, layout)
        }
    }

    struct Refusing;

    impl Allocator for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        fn allocate(&self, _layout: Layout) -> *mut u8 {
            std::ptr::null_mut()
        }

        unsafe fn deallocate(&self, _ptr: *mut u8, _layout: Layout) {}
    }

    #[test]
    fn test_block_is_zeroed_and_released() {
        let counting = Arc::new(Counting::default());
        let allocator: Arc<dyn Allocator> = counting.clone();
        {
            let mut block = Block::new(&allocator, 64).unwrap();
            assert_eq!(block.len(), 64);
            assert!(block.as_slice().iter().all(|&b| b == 0));
            block.as_mut_slice()[3] = 7;
            assert_eq!(block.as_slice()[3], 7);
            assert_eq!(counting.live.load(Ordering::SeqCst), 64);
        }
        assert_eq!(counting.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_refused_allocation_is_an_error() {
        let allocator: Arc<dyn Allocator> = Arc::new(Refusing);
        let err = Block::new(&allocator, 32).unwrap_err();
        assert_eq!(err.kind, ErrorType::NoEnoughMemory);
    }

    #[test]
    fn test_f32_view() {
        let allocator = default_allocator();
        let mut block = Block::new(&allocator, 16).unwrap();
        block.as_mut_slice()[4..8].copy_from_slice(&1.5f32.to_ne_bytes());
        let view = block.f32_slice(4, 2);
        assert_eq!(view, &[1.5, 0.0]);
    }
}
