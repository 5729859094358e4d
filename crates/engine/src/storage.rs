//! Fixed-size record storage in allocator-backed blocks
//!
//! Records are appended into blocks of at most `block_size_limit` bytes (always
//! room for at least one record). Blocks are never reallocated, so records keep
//! a stable address for the lifetime of the storage.

use crate::allocator::{Allocator, Block};
use crate::{Error, ErrorType, Result};
use std::sync::Arc;

pub struct BlockStorage {
    record_size: usize,
    records_per_block: usize,
    blocks: Vec<Block>,
    len: usize,
    allocator: Arc<dyn Allocator>,
}

impl BlockStorage {
    pub fn new(record_size: usize, block_size_limit: usize, allocator: Arc<dyn Allocator>) -> Self {
        let records_per_block = if record_size == 0 {
            usize::MAX
        } else {
            (block_size_limit / record_size).max(1)
        };
        Self {
            record_size,
            records_per_block,
            blocks: Vec::new(),
            len: 0,
            allocator,
        }
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes currently held from the allocator
    pub fn memory_usage(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    /// Append one record, allocating a new block when the last is full
    pub fn push(&mut self, record: &[u8]) -> Result<()> {
        if record.len() != self.record_size {
            return Err(Error::new(
                ErrorType::InternalError,
                format!(
                    "record of {} bytes pushed into storage of {}-byte records",
                    record.len(),
                    self.record_size
                ),
            ));
        }
        if self.record_size == 0 {
            self.len += 1;
            return Ok(());
        }

        let slot = self.len % self.records_per_block;
        if slot == 0 {
            let block = Block::new(&self.allocator, self.records_per_block * self.record_size)?;
            self.blocks.push(block);
        }
        let offset = slot * self.record_size;
        if let Some(block) = self.blocks.last_mut() {
            block.as_mut_slice()[offset..offset + self.record_size].copy_from_slice(record);
        }
        self.len += 1;
        Ok(())
    }

    /// Record at `index`.
    ///
    /// Panics if `index >= len()`.
    pub fn get(&self, index: usize) -> &[u8] {
        assert!(index < self.len, "record {} out of range", index);
        if self.record_size == 0 {
            return &[];
        }
        let (block, offset) = self.locate(index);
        &self.blocks[block].as_slice()[offset..offset + self.record_size]
    }

    /// Record at `index` viewed as f32 values (record size must be a multiple of 4)
    pub fn get_f32(&self, index: usize) -> &[f32] {
        assert!(index < self.len, "record {} out of range", index);
        let (block, offset) = self.locate(index);
        self.blocks[block].f32_slice(offset, self.record_size / 4)
    }

    fn locate(&self, index: usize) -> (usize, usize) {
        (
            index / self.records_per_block,
            (index % self.records_per_block) * self.record_size,
        )
    }

    /// Contiguous copy of all records
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len * self.record_size);
        for i in 0..self.len {
            out.extend_from_slice(self.get(i));
        }
        out
    }

    /// Append every record from a contiguous buffer
    pub fn extend_from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.record_size == 0 {
            return Ok(());
        }
        if bytes.len() % self.record_size != 0 {
            return Err(Error::new(
                ErrorType::InvalidBinary,
                format!(
                    "{} bytes is not a whole number of {}-byte records",
                    bytes.len(),
                    self.record_size
                ),
            ));
        }
        for record in bytes.chunks_exact(self.record_size) {
            self.push(record)?;
        }
        Ok(())
    }

    /// Drop every record and release all blocks
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.len = 0;
    }

    /// Bytes needed to hold `rows` records under the given block limit
    pub fn estimate(record_size: usize, rows: usize, block_size_limit: usize) -> usize {
        if record_size == 0 || rows == 0 {
            return 0;
        }
        let per_block = (block_size_limit / record_size).max(1);
        let blocks = (rows + per_block - 1) / per_block;
        blocks * per_block * record_size
    }
}

impl std::fmt::Debug for BlockStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStorage")
            .field("record_size", &self.record_size)
            .field("len", &self.len)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::default_allocator;

    #[test]
    fn test_records_span_blocks() {
        // three 8-byte records per block
        let mut storage = BlockStorage::new(8, 24, default_allocator());
        for i in 0..10u64 {
            storage.push(&i.to_le_bytes()).unwrap();
        }
        assert_eq!(storage.len(), 10);
        assert_eq!(storage.block_count(), 4);
        assert_eq!(storage.memory_usage(), 96);
        for i in 0..10u64 {
            assert_eq!(storage.get(i as usize), &i.to_le_bytes());
        }
    }

    #[test]
    fn test_limit_smaller_than_record() {
        let mut storage = BlockStorage::new(16, 4, default_allocator());
        storage.push(&[1u8; 16]).unwrap();
        storage.push(&[2u8; 16]).unwrap();
        assert_eq!(storage.block_count(), 2);
        assert_eq!(storage.get(1), &[2u8; 16]);
    }

    #[test]
    fn test_f32_records() {
        let mut storage = BlockStorage::new(12, 1024, default_allocator());
        let mut record = Vec::new();
        for v in [1.0f32, -2.0, 0.5] {
            record.extend_from_slice(&v.to_ne_bytes());
        }
        storage.push(&record).unwrap();
        storage.push(&record).unwrap();
        assert_eq!(storage.get_f32(1), &[1.0, -2.0, 0.5]);
    }

    #[test]
    fn test_bytes_roundtrip_and_bad_length() {
        let mut storage = BlockStorage::new(4, 8, default_allocator());
        for i in 0..5u32 {
            storage.push(&i.to_le_bytes()).unwrap();
        }
        let bytes = storage.to_bytes();
        let mut restored = BlockStorage::new(4, 8, default_allocator());
        restored.extend_from_bytes(&bytes).unwrap();
        assert_eq!(restored.to_bytes(), bytes);

        let err = restored.extend_from_bytes(&[0u8; 3]).unwrap_err();
        assert_eq!(err.kind, ErrorType::InvalidBinary);
    }

    #[test]
    fn test_wrong_record_size_rejected() {
        let mut storage = BlockStorage::new(4, 64, default_allocator());
        assert!(storage.push(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_estimate() {
        assert_eq!(BlockStorage::estimate(8, 10, 24), 96);
        assert_eq!(BlockStorage::estimate(8, 0, 24), 0);
    }
}
