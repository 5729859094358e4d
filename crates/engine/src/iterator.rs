//! State carried across paginated (iterative) searches

use crate::allocator::{Allocator, Block};
use crate::{Error, ErrorType, Result};
use std::sync::Arc;

/// Records which stored vectors a paginated search has already returned.
///
/// The bitmap lives in memory from the allocator given at creation. Once a page
/// is requested with `is_last_search`, the bitmap is released, the context is
/// exhausted and any further page request fails with `WrongStatus`.
pub struct IteratorContext {
    returned: Option<Block>,
    capacity: usize,
    num_returned: usize,
    pages: usize,
    exhausted: bool,
    allocator: Arc<dyn Allocator>,
}

impl IteratorContext {
    /// Create a context able to track `capacity` stored vectors
    pub fn new(capacity: usize, allocator: Arc<dyn Allocator>) -> Result<Self> {
        let returned = Block::new(&allocator, bitmap_bytes(capacity))?;
        Ok(Self {
            returned: Some(returned),
            capacity,
            num_returned: 0,
            pages: 0,
            exhausted: false,
            allocator,
        })
    }

    pub fn num_returned(&self) -> usize {
        self.num_returned
    }

    /// Pages served so far
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_returned(&self, internal_id: u32) -> bool {
        let i = internal_id as usize;
        match &self.returned {
            Some(block) if i < self.capacity => (block.as_slice()[i / 8] >> (i % 8)) & 1 == 1,
            _ => false,
        }
    }

    /// Fail with `WrongStatus` once the final page has been served
    pub fn check_active(&self) -> Result<()> {
        if self.exhausted {
            return Err(Error::new(
                ErrorType::WrongStatus,
                "iterator context already finished its last search",
            ));
        }
        Ok(())
    }

    /// Make room for `capacity` stored vectors, preserving returned marks
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        self.check_active()?;
        if capacity <= self.capacity {
            return Ok(());
        }
        let mut grown = Block::new(&self.allocator, bitmap_bytes(capacity))?;
        if let Some(old) = &self.returned {
            let old = old.as_slice();
            grown.as_mut_slice()[..old.len()].copy_from_slice(old);
        }
        self.returned = Some(grown);
        self.capacity = capacity;
        Ok(())
    }

    /// Mark one page worth of results as returned
    pub(crate) fn record_page(&mut self, internal_ids: &[u32], is_last: bool) -> Result<()> {
        if let Some(&max) = internal_ids.iter().max() {
            self.reserve(max as usize + 1)?;
        }
        if let Some(block) = self.returned.as_mut() {
            let bits = block.as_mut_slice();
            for &id in internal_ids {
                let i = id as usize;
                let mask = 1u8 << (i % 8);
                if bits[i / 8] & mask == 0 {
                    bits[i / 8] |= mask;
                    self.num_returned += 1;
                }
            }
        }
        self.pages += 1;
        if is_last {
            self.exhausted = true;
            self.returned = None;
            self.capacity = 0;
        }
        Ok(())
    }

    /// Bytes held for the returned-set bitmap
    pub fn memory_usage(&self) -> usize {
        self.returned.as_ref().map_or(0, Block::len)
    }
}

impl std::fmt::Debug for IteratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IteratorContext")
            .field("capacity", &self.capacity)
            .field("num_returned", &self.num_returned)
            .field("pages", &self.pages)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

fn bitmap_bytes(capacity: usize) -> usize {
    (capacity + 7) / 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::default_allocator;

    #[test]
    fn test_record_and_query_pages() {
        let mut ctx = IteratorContext::new(16, default_allocator()).unwrap();
        ctx.record_page(&[1, 3, 3], false).unwrap();
        assert_eq!(ctx.num_returned(), 2);
        assert!(ctx.is_returned(3));
        assert!(!ctx.is_returned(2));
        assert!(ctx.check_active().is_ok());

        ctx.record_page(&[40], false).unwrap();
        assert!(ctx.is_returned(40));
        assert!(ctx.is_returned(1));
        assert_eq!(ctx.num_returned(), 3);

        ctx.record_page(&[5], true).unwrap();
        assert!(ctx.is_exhausted());
        assert_eq!(ctx.pages(), 3);
        assert_eq!(ctx.memory_usage(), 0);
        assert_eq!(ctx.check_active().unwrap_err().kind, ErrorType::WrongStatus);
    }

    #[test]
    fn test_out_of_capacity_is_not_returned() {
        let ctx = IteratorContext::new(0, default_allocator()).unwrap();
        assert!(!ctx.is_returned(1000));
    }
}
