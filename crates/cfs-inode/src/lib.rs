#![forbid(unsafe_code)]
//! Inode header I/O and link-count management.
//!
//! The codec in `cfs-ondisk` is pure; this crate binds it to the store:
//! reading and rewriting the 64-byte header at the start of an entity's
//! head block, and the link-count state machine. An entity is Linked while
//! its count is above zero; the decrement that reaches zero reclaims the
//! whole chain through the free-block stack, and the block numbers must not
//! be used for lookups afterwards without reallocation.

use cfs_alloc::NextPointerCache;
use cfs_block::{BlockStore, ByteDevice};
use cfs_error::{CfsError, Result};
use cfs_ondisk::InodeHeader;
use cfs_types::{BlockNumber, INODE_HEADER_LEN, ParseError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Read and decode the inode header at `block`.
pub fn read_header<D: ByteDevice>(
    store: &BlockStore<D>,
    block: BlockNumber,
) -> Result<InodeHeader> {
    let mut bytes = [0_u8; INODE_HEADER_LEN as usize];
    store.read_at(block, 0, &mut bytes)?;
    InodeHeader::parse_from_bytes(&bytes).map_err(|e| parse_to_corruption(block, &e))
}

/// Encode and persist `header` at `block`.
pub fn write_header<D: ByteDevice>(
    store: &BlockStore<D>,
    block: BlockNumber,
    header: &InodeHeader,
) -> Result<()> {
    store.write_at(block, 0, &header.to_header_bytes())
}

/// Read, mutate, and persist the header at `block` in one step.
pub fn update_header<D: ByteDevice>(
    store: &BlockStore<D>,
    block: BlockNumber,
    mutate: impl FnOnce(&mut InodeHeader),
) -> Result<InodeHeader> {
    let mut header = read_header(store, block)?;
    mutate(&mut header);
    write_header(store, block, &header)?;
    Ok(header)
}

/// Current wall-clock time as an on-disk (seconds, nanoseconds) pair.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // on-disk timestamps are 32-bit
pub fn now_timestamp() -> (u32, u32) {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_epoch.as_secs() as u32, since_epoch.subsec_nanos())
}

/// Increment the link count of the inode at `block` and persist it.
pub fn bump_link<D: ByteDevice>(store: &BlockStore<D>, block: BlockNumber) -> Result<u16> {
    let header = update_header(store, block, |h| h.links = h.links.saturating_add(1))?;
    Ok(header.links)
}

/// Decrement the link count; at zero, reclaim the entity's whole chain.
///
/// Returns the remaining link count (0 means the chain was released).
/// Every successor pointer is read before its block is pushed onto the
/// free stack, since the push overwrites that pointer.
pub fn drop_link_and_maybe_reclaim<D: ByteDevice>(
    store: &BlockStore<D>,
    cache: &mut NextPointerCache,
    block: BlockNumber,
) -> Result<u16> {
    let mut header = read_header(store, block)?;
    header.links = header.links.saturating_sub(1);

    if header.links > 0 {
        write_header(store, block, &header)?;
        return Ok(header.links);
    }

    debug!(block = block.0, blocks = header.blocks, "reclaiming chain");
    let mut current = block;
    while !current.is_nil() {
        let next = cache.get_next(store, current)?;
        cfs_alloc::release(store, cache, current)?;
        current = next;
    }
    Ok(0)
}

fn parse_to_corruption(block: BlockNumber, err: &ParseError) -> CfsError {
    CfsError::Corruption {
        block: block.0,
        detail: err.to_string(),
    }
}
