#![forbid(unsafe_code)]
//! Next-pointer cache and free-block allocation.
//!
//! Every chained block stores its successor in its final 4 bytes. The
//! [`NextPointerCache`] keeps a lazily populated in-memory mirror of those
//! fields so chain walks do not re-read the trailing bytes of every block
//! on every traversal. The free-block stack is threaded through the same
//! mechanism: block 0's next-pointer slot in the superblock IS the
//! free-list head, so [`allocate`] and [`release`] are nothing but cache
//! and pointer manipulation plus the header stamp.
//!
//! Both operations persist every pointer they change before returning; a
//! half-threaded free chain is unrecoverable, so there is no deferred
//! write-back here.

use cfs_block::{BlockStore, ByteDevice};
use cfs_error::{CfsError, Result};
use cfs_ondisk::free_block_header;
use cfs_types::{BLOCK_SIZE, BlockNumber, NEXT_POINTER_OFFSET};
use tracing::trace;

/// Sparse, lazily populated mapping from block number to chain successor.
///
/// Block 0 is a legitimate "no successor" value on disk, so the cache must
/// distinguish "resolved as end-of-chain" from "never read". `None` marks
/// the unresolved state; the backing vector grows by doubling when a block
/// beyond the current bound is touched.
#[derive(Debug, Default)]
pub struct NextPointerCache {
    entries: Vec<Option<BlockNumber>>,
}

impl NextPointerCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size for a volume of `blocks` blocks.
    #[must_use]
    pub fn with_capacity(blocks: u32) -> Self {
        Self {
            entries: vec![None; blocks as usize],
        }
    }

    fn ensure_capacity(&mut self, block: BlockNumber) {
        let needed = block.index() + 1;
        if needed <= self.entries.len() {
            return;
        }
        let mut cap = self.entries.len().max(8);
        while cap < needed {
            cap *= 2;
        }
        self.entries.resize(cap, None);
    }

    /// The chain successor of `block`, reading the trailing 4 bytes from the
    /// store on first access.
    pub fn get_next<D: ByteDevice>(
        &mut self,
        store: &BlockStore<D>,
        block: BlockNumber,
    ) -> Result<BlockNumber> {
        self.ensure_capacity(block);
        if let Some(next) = self.entries[block.index()] {
            return Ok(next);
        }

        let mut bytes = [0_u8; 4];
        store.read_at(block, NEXT_POINTER_OFFSET, &mut bytes)?;
        let next = BlockNumber(u32::from_le_bytes(bytes));
        self.entries[block.index()] = Some(next);
        Ok(next)
    }

    /// Record `block -> value`; when `persist` also write the on-disk field.
    pub fn set_next<D: ByteDevice>(
        &mut self,
        store: &BlockStore<D>,
        block: BlockNumber,
        value: BlockNumber,
        persist: bool,
    ) -> Result<()> {
        self.ensure_capacity(block);
        if persist {
            store.write_at(block, NEXT_POINTER_OFFSET, &value.0.to_le_bytes())?;
        }
        self.entries[block.index()] = Some(value);
        Ok(())
    }

    /// Number of slots currently backed (resolved or not).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}

/// Pop a block off the free stack and stamp its header.
///
/// `header` is written at the block's start; when `zero_fill` the rest of
/// the payload is cleared too. The popped block's next-pointer still holds
/// its free-chain link on disk, so it is always reset to end-of-chain
/// before the block is handed out.
///
/// Fails with `NoSpace` when the stack is empty.
pub fn allocate<D: ByteDevice>(
    store: &BlockStore<D>,
    cache: &mut NextPointerCache,
    header: &[u8],
    zero_fill: bool,
) -> Result<BlockNumber> {
    let head = cache.get_next(store, BlockNumber::SUPERBLOCK)?;
    if head.is_nil() {
        return Err(CfsError::NoSpace);
    }

    // New free head = the popped block's own successor.
    let next_free = cache.get_next(store, head)?;
    cache.set_next(store, BlockNumber::SUPERBLOCK, next_free, true)?;

    if zero_fill {
        let mut block = vec![0_u8; BLOCK_SIZE as usize];
        block[..header.len()].copy_from_slice(header);
        store.write_block(head, &block)?;
        cache.set_next(store, head, BlockNumber::NIL, false)?;
    } else {
        store.write_at(head, 0, header)?;
        cache.set_next(store, head, BlockNumber::NIL, true)?;
    }

    trace!(block = head.0, new_free_head = next_free.0, "allocated block");
    Ok(head)
}

/// Push `block` back onto the free stack.
pub fn release<D: ByteDevice>(
    store: &BlockStore<D>,
    cache: &mut NextPointerCache,
    block: BlockNumber,
) -> Result<()> {
    store.write_at(block, 0, &free_block_header())?;

    let old_head = cache.get_next(store, BlockNumber::SUPERBLOCK)?;
    cache.set_next(store, block, old_head, true)?;
    cache.set_next(store, BlockNumber::SUPERBLOCK, block, true)?;

    trace!(block = block.0, old_free_head = old_head.0, "released block");
    Ok(())
}
