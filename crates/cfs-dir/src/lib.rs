#![forbid(unsafe_code)]
//! Directory entry search, insertion, and removal.
//!
//! A directory's entries live in its extent chain: variable-length records
//! packed from the first payload byte of each extent, terminated per block
//! by a zero length field (the sentinel — an end-of-block marker, never a
//! tombstone) or by running out of room for another record. Name
//! comparison is byte-exact; nothing here knows about encodings.
//!
//! All three mutations keep the directory's size field (the sum of its
//! real entries' length fields) in lockstep with the physical records, and
//! they commit the size only after the record write, so an I/O failure
//! leaves at worst an entry the size field does not account for yet —
//! never the reverse.

use cfs_alloc::NextPointerCache;
use cfs_block::{BlockStore, ByteDevice};
use cfs_error::{CfsError, Result};
use cfs_extent::ExtentCursor;
use cfs_ondisk::{DirEntry, DirRecord, dir_entry_name, dir_extent_header, parse_dir_record};
use cfs_types::{
    BlockNumber, DIR_ENTRY_FIXED_LEN, DIR_EXTENT_HEADER_LEN, NEXT_POINTER_OFFSET, ParseError,
};
use tracing::debug;

/// A directory entry located by [`find`], carrying enough position context
/// for [`remove`] to close the gap and collapse an emptied extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedEntry {
    /// Block holding the record.
    pub block: BlockNumber,
    /// Record offset within that block.
    pub offset: u32,
    /// Total record length (fixed part + name).
    pub len: u16,
    /// The named entity's head block.
    pub ino: BlockNumber,
    /// Chain predecessor of `block` (`None` when the record sits in the
    /// directory's own head block).
    pub prev: Option<BlockNumber>,
}

fn corrupt(block: BlockNumber, err: &ParseError) -> CfsError {
    CfsError::Corruption {
        block: block.0,
        detail: err.to_string(),
    }
}

/// Search `dir`'s chain for a byte-exact `name` match.
pub fn find<D: ByteDevice>(
    store: &BlockStore<D>,
    cache: &mut NextPointerCache,
    dir: BlockNumber,
    name: &[u8],
) -> Result<Option<LocatedEntry>> {
    let mut cursor = ExtentCursor::at_head(dir);
    let mut buf = store.read_block(cursor.block())?;

    loop {
        if cursor.at_block_boundary(DIR_ENTRY_FIXED_LEN) {
            if !cursor.advance(store, cache, DIR_EXTENT_HEADER_LEN)? {
                return Ok(None);
            }
            buf = store.read_block(cursor.block())?;
            continue;
        }

        let record = parse_dir_record(
            buf.as_slice(),
            cursor.offset() as usize,
            NEXT_POINTER_OFFSET as usize,
        )
        .map_err(|e| corrupt(cursor.block(), &e))?;

        match record {
            DirRecord::EndOfBlock => {
                if !cursor.advance(store, cache, DIR_EXTENT_HEADER_LEN)? {
                    return Ok(None);
                }
                buf = store.read_block(cursor.block())?;
            }
            DirRecord::Entry { len, ino } => {
                let entry_name = dir_entry_name(buf.as_slice(), cursor.offset() as usize, len)
                    .map_err(|e| corrupt(cursor.block(), &e))?;
                if entry_name == name {
                    return Ok(Some(LocatedEntry {
                        block: cursor.block(),
                        offset: cursor.offset(),
                        len,
                        ino,
                        prev: cursor.prev(),
                    }));
                }
                cursor.bump(u32::from(len));
            }
        }
    }
}

/// Walk every real entry of `dir`, invoking `visit(name, ino)` for each.
pub fn for_each_entry<D: ByteDevice>(
    store: &BlockStore<D>,
    cache: &mut NextPointerCache,
    dir: BlockNumber,
    mut visit: impl FnMut(&[u8], BlockNumber),
) -> Result<()> {
    let mut cursor = ExtentCursor::at_head(dir);
    let mut buf = store.read_block(cursor.block())?;

    loop {
        if cursor.at_block_boundary(DIR_ENTRY_FIXED_LEN) {
            if !cursor.advance(store, cache, DIR_EXTENT_HEADER_LEN)? {
                return Ok(());
            }
            buf = store.read_block(cursor.block())?;
            continue;
        }

        let record = parse_dir_record(
            buf.as_slice(),
            cursor.offset() as usize,
            NEXT_POINTER_OFFSET as usize,
        )
        .map_err(|e| corrupt(cursor.block(), &e))?;

        match record {
            DirRecord::EndOfBlock => {
                if !cursor.advance(store, cache, DIR_EXTENT_HEADER_LEN)? {
                    return Ok(());
                }
                buf = store.read_block(cursor.block())?;
            }
            DirRecord::Entry { len, ino } => {
                let entry_name = dir_entry_name(buf.as_slice(), cursor.offset() as usize, len)
                    .map_err(|e| corrupt(cursor.block(), &e))?;
                visit(entry_name, ino);
                cursor.bump(u32::from(len));
            }
        }
    }
}

/// Insert `name -> ino` into `dir`'s chain.
///
/// Scans for a sentinel slot with room before the trailing next-pointer;
/// when no extent has room, a fresh zero-filled extension extent is
/// allocated and linked as the chain's new tail with the record at its
/// payload start. Parent `size` (and `blocks` on growth) are persisted in
/// the same operation, after the record write.
///
/// Duplicate names are not checked here; callers that need create
/// semantics run [`find`] first.
pub fn insert<D: ByteDevice>(
    store: &BlockStore<D>,
    cache: &mut NextPointerCache,
    dir: BlockNumber,
    name: &[u8],
    ino: BlockNumber,
) -> Result<()> {
    if name.is_empty() {
        return Err(CfsError::InvalidName);
    }
    if !DirEntry::fits_block(name.len()) {
        return Err(CfsError::NameTooLong);
    }
    let entry = DirEntry {
        ino,
        name: name.to_vec(),
    };
    let rec_len = DirEntry::record_len(name.len());

    let mut cursor = ExtentCursor::at_head(dir);
    let mut buf = store.read_block(cursor.block())?;

    loop {
        if cursor.at_block_boundary(DIR_ENTRY_FIXED_LEN) {
            if !cursor.advance(store, cache, DIR_EXTENT_HEADER_LEN)? {
                return append_extent(store, cache, dir, cursor.block(), &entry);
            }
            buf = store.read_block(cursor.block())?;
            continue;
        }

        let record = parse_dir_record(
            buf.as_slice(),
            cursor.offset() as usize,
            NEXT_POINTER_OFFSET as usize,
        )
        .map_err(|e| corrupt(cursor.block(), &e))?;

        match record {
            DirRecord::EndOfBlock => {
                if cursor.remaining() as usize >= rec_len {
                    entry
                        .write_to_bytes(buf.as_mut_slice(), cursor.offset() as usize)
                        .map_err(|e| corrupt(cursor.block(), &e))?;
                    store.write_block(cursor.block(), buf.as_slice())?;
                    cfs_inode::update_header(store, dir, |h| h.size += rec_len as u64)?;
                    debug!(
                        dir = dir.0,
                        block = cursor.block().0,
                        offset = cursor.offset(),
                        "inserted directory entry"
                    );
                    return Ok(());
                }
                if !cursor.advance(store, cache, DIR_EXTENT_HEADER_LEN)? {
                    return append_extent(store, cache, dir, cursor.block(), &entry);
                }
                buf = store.read_block(cursor.block())?;
            }
            DirRecord::Entry { len, .. } => cursor.bump(u32::from(len)),
        }
    }
}

/// Grow the chain by one extension extent holding `entry` at its start.
fn append_extent<D: ByteDevice>(
    store: &BlockStore<D>,
    cache: &mut NextPointerCache,
    dir: BlockNumber,
    tail: BlockNumber,
    entry: &DirEntry,
) -> Result<()> {
    let rec_len = DirEntry::record_len(entry.name.len());
    let extent = cfs_alloc::allocate(store, cache, &dir_extent_header(), true)?;
    cache.set_next(store, tail, extent, true)?;

    let mut record = vec![0_u8; rec_len];
    entry
        .write_to_bytes(&mut record, 0)
        .map_err(|e| corrupt(extent, &e))?;
    store.write_at(extent, DIR_EXTENT_HEADER_LEN, &record)?;

    cfs_inode::update_header(store, dir, |h| {
        h.size += rec_len as u64;
        h.blocks += 1;
    })?;
    debug!(
        dir = dir.0,
        extent = extent.0,
        tail = tail.0,
        "grew directory by one extent"
    );
    Ok(())
}

/// Remove a located entry from `dir`.
///
/// The in-block bytes after the record are shifted left by its length up
/// to the next-pointer and the vacated tail is zeroed, keeping the
/// all-zero region between the last entry and the pointer intact. When the
/// record was the sole occupant of an extension extent (first payload
/// offset, block empty after the shift), the extent is unlinked from the
/// chain and returned to the free stack. A directory's own head block is
/// never collapsed.
pub fn remove<D: ByteDevice>(
    store: &BlockStore<D>,
    cache: &mut NextPointerCache,
    dir: BlockNumber,
    entry: &LocatedEntry,
) -> Result<()> {
    let mut buf = store.read_block(entry.block)?;
    let start = entry.offset as usize;
    let len = usize::from(entry.len);
    let end = NEXT_POINTER_OFFSET as usize;

    buf.as_mut_slice().copy_within(start + len..end, start);
    buf.as_mut_slice()[end - len..end].fill(0);
    store.write_block(entry.block, buf.as_slice())?;

    let collapse = entry.block != dir
        && entry.offset == DIR_EXTENT_HEADER_LEN
        && matches!(
            parse_dir_record(
                buf.as_slice(),
                DIR_EXTENT_HEADER_LEN as usize,
                NEXT_POINTER_OFFSET as usize,
            )
            .map_err(|e| corrupt(entry.block, &e))?,
            DirRecord::EndOfBlock
        );

    if collapse {
        let prev = entry.prev.ok_or_else(|| CfsError::Corruption {
            block: entry.block.0,
            detail: "extension extent has no chain predecessor".to_owned(),
        })?;
        let next = cache.get_next(store, entry.block)?;
        cache.set_next(store, prev, next, true)?;
        cfs_alloc::release(store, cache, entry.block)?;
        debug!(
            dir = dir.0,
            extent = entry.block.0,
            "collapsed emptied directory extent"
        );
    }

    cfs_inode::update_header(store, dir, |h| {
        h.size = h.size.saturating_sub(len as u64);
        if collapse {
            h.blocks = h.blocks.saturating_sub(1);
        }
    })?;
    debug!(
        dir = dir.0,
        block = entry.block.0,
        offset = entry.offset,
        "removed directory entry"
    );
    Ok(())
}
