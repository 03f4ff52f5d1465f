#![forbid(unsafe_code)]
//! Byte-range file I/O across an extent chain.
//!
//! File payload starts right after the inode header in the head block and
//! after the 8-byte extent header (tag + owner back-pointer) in every
//! extension extent. Reads clamp to the logical size and cross extent
//! boundaries transparently; writes allocate zero-filled extension extents
//! whenever the cursor would run past the chain's current end, so a write
//! beyond EOF materializes the intervening range. The size field commits
//! only after all payload writes have succeeded.
//!
//! Callers gate on entity kind; these functions move bytes for whatever
//! chain they are pointed at (the engine rejects directories upstream).

use cfs_alloc::NextPointerCache;
use cfs_block::{BlockStore, ByteDevice};
use cfs_error::{CfsError, Result};
use cfs_ondisk::file_extent_header;
use cfs_types::{
    BlockNumber, FILE_EXTENT_HEADER_LEN, FILE_EXTENT_PAYLOAD_LEN, HEAD_PAYLOAD_LEN,
    INODE_HEADER_LEN,
};
use tracing::trace;

/// Payload start offset and capacity of one extent.
fn payload_geometry(is_head: bool) -> (u32, u32) {
    if is_head {
        (INODE_HEADER_LEN, HEAD_PAYLOAD_LEN)
    } else {
        (FILE_EXTENT_HEADER_LEN, FILE_EXTENT_PAYLOAD_LEN)
    }
}

fn truncated_chain(block: BlockNumber) -> CfsError {
    CfsError::Corruption {
        block: block.0,
        detail: "extent chain ends before the inode's logical size".to_owned(),
    }
}

/// Read up to `dest.len()` bytes starting at `offset`.
///
/// The transfer is clamped to `size - offset`; an `offset` beyond the
/// logical size is `InvalidRange`. Returns the number of bytes read.
pub fn read<D: ByteDevice>(
    store: &BlockStore<D>,
    cache: &mut NextPointerCache,
    file: BlockNumber,
    offset: u64,
    dest: &mut [u8],
) -> Result<usize> {
    let header = cfs_inode::read_header(store, file)?;
    if offset > header.size {
        return Err(CfsError::InvalidRange {
            offset,
            size: header.size,
        });
    }
    let len = usize::try_from(header.size - offset)
        .map(|avail| avail.min(dest.len()))
        .unwrap_or(dest.len());
    if len == 0 {
        return Ok(0);
    }

    // Skip whole extents until `offset` falls inside the current one.
    let mut block = file;
    let mut is_head = true;
    let mut skip = offset;
    loop {
        let (_, cap) = payload_geometry(is_head);
        if skip < u64::from(cap) {
            break;
        }
        skip -= u64::from(cap);
        block = cache.get_next(store, block)?;
        if block.is_nil() {
            return Err(truncated_chain(file));
        }
        is_head = false;
    }

    // Copy contiguous runs, crossing extents as each one is exhausted.
    #[allow(clippy::cast_possible_truncation)] // skip < cap <= u32::MAX here
    let mut pos = skip as u32;
    let mut copied = 0_usize;
    loop {
        let (start, cap) = payload_geometry(is_head);
        let run = ((cap - pos) as usize).min(len - copied);
        store.read_at(block, start + pos, &mut dest[copied..copied + run])?;
        copied += run;
        if copied == len {
            return Ok(len);
        }
        block = cache.get_next(store, block)?;
        if block.is_nil() {
            return Err(truncated_chain(file));
        }
        is_head = false;
        pos = 0;
    }
}

/// Write `src` starting at `offset`, growing the chain as needed.
///
/// Afterwards `size = max(old_size, offset + written)` and the allocated
/// block count reflects any new extents; both are persisted together after
/// the payload. Returns the number of bytes written.
pub fn write<D: ByteDevice>(
    store: &BlockStore<D>,
    cache: &mut NextPointerCache,
    file: BlockNumber,
    offset: u64,
    src: &[u8],
) -> Result<usize> {
    let header = cfs_inode::read_header(store, file)?;
    if src.is_empty() {
        return Ok(0);
    }

    let mut new_blocks = 0_u64;
    let mut grow = |store: &BlockStore<D>, cache: &mut NextPointerCache, tail: BlockNumber| {
        let extent = cfs_alloc::allocate(store, cache, &file_extent_header(file), true)?;
        cache.set_next(store, tail, extent, true)?;
        new_blocks += 1;
        Ok::<BlockNumber, CfsError>(extent)
    };

    // Skip whole extents, materializing any the chain does not have yet.
    let mut block = file;
    let mut is_head = true;
    let mut skip = offset;
    loop {
        let (_, cap) = payload_geometry(is_head);
        if skip < u64::from(cap) {
            break;
        }
        skip -= u64::from(cap);
        let next = cache.get_next(store, block)?;
        block = if next.is_nil() {
            grow(store, cache, block)?
        } else {
            next
        };
        is_head = false;
    }

    #[allow(clippy::cast_possible_truncation)] // skip < cap <= u32::MAX here
    let mut pos = skip as u32;
    let mut copied = 0_usize;
    loop {
        let (start, cap) = payload_geometry(is_head);
        let run = ((cap - pos) as usize).min(src.len() - copied);
        store.write_at(block, start + pos, &src[copied..copied + run])?;
        copied += run;
        if copied == src.len() {
            break;
        }
        let next = cache.get_next(store, block)?;
        block = if next.is_nil() {
            grow(store, cache, block)?
        } else {
            next
        };
        is_head = false;
        pos = 0;
    }

    let end = offset + src.len() as u64;
    cfs_inode::update_header(store, file, |h| {
        h.size = h.size.max(end);
        h.blocks += new_blocks;
    })?;
    trace!(
        file = file.0,
        offset,
        len = src.len(),
        new_blocks,
        "wrote file range"
    );
    Ok(src.len())
}

/// Persist a new logical size.
///
/// Extent blocks beyond the new end are not reclaimed here; freeing is
/// deferred to link-count reclamation.
pub fn truncate<D: ByteDevice>(
    store: &BlockStore<D>,
    file: BlockNumber,
    new_size: u64,
) -> Result<()> {
    cfs_inode::update_header(store, file, |h| h.size = new_size)?;
    Ok(())
}
