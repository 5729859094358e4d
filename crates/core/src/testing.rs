//! Test support: a resource-tracking allocator and seeded data
//!
//! Compiled for this crate's tests and, through the `test-util` feature, for
//! the tests and benches of dependent crates.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::alloc::Layout;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vecbridge_engine::{Allocator, DefaultAllocator};

/// Counts live bytes and total allocations passing through it
#[derive(Default)]
pub struct TrackingAllocator {
    live: AtomicUsize,
    allocations: AtomicUsize,
}

impl TrackingAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn live_bytes(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn total_allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }
}

pub trait SharedAllocator {
    fn shared(&self) -> Arc<dyn Allocator>;
}

impl SharedAllocator for Arc<TrackingAllocator> {
    fn shared(&self) -> Arc<dyn Allocator> {
        Arc::clone(self) as Arc<dyn Allocator>
    }
}

impl Allocator for TrackingAllocator {
    fn name(&self) -> &str {
        "tracking"
    }

    fn allocate(&self, layout: Layout) -> *mut u8 {
        let ptr = DefaultAllocator.allocate(layout);
        if !ptr.is_null() {
            self.live.fetch_add(layout.size(), Ordering::SeqCst);
            self.allocations.fetch_add(1, Ordering::SeqCst);
        }
        ptr
    }

    unsafe fn deallocate(&self, ptr: *mut u8, layout: Layout) {
        self.live.fetch_sub(layout.size(), Ordering::SeqCst);
        DefaultAllocator.deallocate(ptr, layout);
    }
}

/// `rows * dim` uniform values in [-1, 1)
pub fn random_vectors(rows: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows * dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}
