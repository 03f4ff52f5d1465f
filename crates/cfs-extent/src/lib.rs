#![forbid(unsafe_code)]
//! Extent-chain traversal.
//!
//! One entity (directory or file) is a chain of blocks linked through
//! trailing next-pointers. [`ExtentCursor`] is the single traversal
//! abstraction shared by both record kinds: it tracks the current block,
//! the byte offset within it, and the previous block in the chain (needed
//! when an emptied extent is unlinked). Directories and files differ only
//! in the header size of their extension extents, so the cursor takes the
//! header length as a parameter instead of duplicating the walk.

use cfs_alloc::NextPointerCache;
use cfs_block::{BlockStore, ByteDevice};
use cfs_error::Result;
use cfs_types::{BlockNumber, INODE_HEADER_LEN, NEXT_POINTER_OFFSET};

/// Position within an entity's extent chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentCursor {
    block: BlockNumber,
    offset: u32,
    prev: Option<BlockNumber>,
}

impl ExtentCursor {
    /// A cursor at the first payload byte of an entity's head block
    /// (immediately after the inode header).
    #[must_use]
    pub fn at_head(head: BlockNumber) -> Self {
        Self {
            block: head,
            offset: INODE_HEADER_LEN,
            prev: None,
        }
    }

    /// Current block.
    #[must_use]
    pub fn block(&self) -> BlockNumber {
        self.block
    }

    /// Byte offset within the current block.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// The block preceding the current one in the chain, if any.
    #[must_use]
    pub fn prev(&self) -> Option<BlockNumber> {
        self.prev
    }

    /// Whether the cursor is still in the head block.
    #[must_use]
    pub fn at_head_block(&self) -> bool {
        self.prev.is_none()
    }

    /// Bytes left before the trailing next-pointer.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        NEXT_POINTER_OFFSET.saturating_sub(self.offset)
    }

    /// True when fewer than `min_reserve` bytes remain before the trailing
    /// next-pointer: no further record of that size can start here.
    #[must_use]
    pub fn at_block_boundary(&self, min_reserve: u32) -> bool {
        self.remaining() < min_reserve
    }

    /// Move forward within the current block.
    pub fn bump(&mut self, len: u32) {
        self.offset += len;
    }

    /// Step to the next extent in the chain.
    ///
    /// Returns `false` (cursor unchanged) at the end of the chain.
    /// `header_len` is the extension-extent header size of the record kind
    /// being traversed; the new offset points at the first payload byte.
    pub fn advance<D: ByteDevice>(
        &mut self,
        store: &BlockStore<D>,
        cache: &mut NextPointerCache,
        header_len: u32,
    ) -> Result<bool> {
        let next = cache.get_next(store, self.block)?;
        if next.is_nil() {
            return Ok(false);
        }
        self.prev = Some(self.block);
        self.block = next;
        self.offset = header_len;
        Ok(true)
    }
}
