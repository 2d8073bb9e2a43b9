#![forbid(unsafe_code)]
//! Block I/O over a fully resident image.
//!
//! Disk images are read into memory once; every decoder above this crate
//! reads through [`BlockMedium`] by block number. The backing buffer is
//! immutable and reference counted, so clones are cheap and concurrent
//! readers never interfere.

use mfs_error::{MfsError, Result};
use mfs_types::{BlockNumber, BlockSize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Immutable, block-addressable view of a disk image.
///
/// Invariant: `block_count == data.len() / block_size`; a trailing partial
/// block is not addressable.
#[derive(Clone)]
pub struct BlockMedium {
    data: Arc<[u8]>,
    block_size: BlockSize,
    block_count: u64,
}

impl std::fmt::Debug for BlockMedium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockMedium")
            .field("len_bytes", &self.data.len())
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .finish()
    }
}

impl BlockMedium {
    /// Wrap an in-memory image.
    pub fn from_bytes(data: impl Into<Arc<[u8]>>, block_size: BlockSize) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        let block_size_u64 = u64::from(block_size.get());
        let remainder = len % block_size_u64;
        if remainder != 0 {
            debug!(
                len_bytes = len,
                block_size = block_size.get(),
                remainder,
                "ignoring trailing partial block"
            );
        }
        Self {
            data,
            block_size,
            block_count: len / block_size_u64,
        }
    }

    /// Read an image file fully into memory.
    pub fn open(path: impl AsRef<Path>, block_size: BlockSize) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        debug!(path = %path.as_ref().display(), len_bytes = data.len(), "image loaded");
        Ok(Self::from_bytes(data, block_size))
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    #[must_use]
    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }

    /// Read `count` consecutive blocks starting at `start`.
    ///
    /// Fails with `OutOfRange` unless `start + count <= block_count`.
    pub fn read_blocks(&self, start: BlockNumber, count: u64) -> Result<&[u8]> {
        let end = start
            .checked_add(count)
            .filter(|end| end.0 <= self.block_count)
            .ok_or(MfsError::OutOfRange {
                what: "block",
                index: start.0.saturating_add(count.saturating_sub(1)),
                limit: self.block_count,
            })?;

        let byte_start = self.byte_offset(start)?;
        let byte_end = self.byte_offset(end)?;
        Ok(&self.data[byte_start..byte_end])
    }

    /// Read a single block.
    pub fn read_block(&self, block: BlockNumber) -> Result<&[u8]> {
        if block.0 >= self.block_count {
            return Err(MfsError::OutOfRange {
                what: "block",
                index: block.0,
                limit: self.block_count,
            });
        }
        self.read_blocks(block, 1)
    }

    fn byte_offset(&self, block: BlockNumber) -> Result<usize> {
        self.block_size
            .block_to_byte(block)
            .and_then(|off| usize::try_from(off).ok())
            .ok_or_else(|| MfsError::Format(format!("block {block} offset overflows usize")))
    }
}
