#![forbid(unsafe_code)]
//! Core types and on-disk layout constants for ChainFS.
//!
//! Everything in this crate is dependency-light by design: newtypes, the
//! fixed block geometry, little-endian field codecs, and the parse-layer
//! error type. Higher layers (block I/O, allocation, directories) build on
//! these without pulling each other in.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ── Block geometry ──────────────────────────────────────────────────────────

/// Fixed block size of a ChainFS volume.
pub const BLOCK_SIZE: u32 = 4096;

/// Width of the trailing chain successor field.
pub const NEXT_POINTER_LEN: u32 = 4;

/// Byte offset of the chain successor field within any chained block.
pub const NEXT_POINTER_OFFSET: u32 = BLOCK_SIZE - NEXT_POINTER_LEN;

/// Size of the inode header record at the start of an entity's head block.
pub const INODE_HEADER_LEN: u32 = 64;

/// Header of a directory extension extent: the 4-byte tag alone.
pub const DIR_EXTENT_HEADER_LEN: u32 = 4;

/// Header of a file extension extent: tag plus owner back-pointer.
pub const FILE_EXTENT_HEADER_LEN: u32 = 8;

/// Byte offset of the root directory block number in the superblock.
pub const SUPERBLOCK_ROOT_OFFSET: u32 = BLOCK_SIZE - 8;

/// Byte offset of the free-list head in the superblock. This is the
/// superblock's own next-pointer slot: the free stack is threaded through
/// the same trailing field every chained block uses.
pub const SUPERBLOCK_FREE_HEAD_OFFSET: u32 = NEXT_POINTER_OFFSET;

/// Fixed part of a directory entry record: length (2) + inode number (4).
pub const DIR_ENTRY_FIXED_LEN: u32 = 6;

/// Largest directory entry record a single block may carry.
pub const MAX_DIR_ENTRY_LEN: u32 = BLOCK_SIZE - 16;

/// Directory payload bytes in an entity's head block (after the inode
/// header, before the next-pointer).
pub const HEAD_PAYLOAD_LEN: u32 = NEXT_POINTER_OFFSET - INODE_HEADER_LEN;

/// Payload bytes in a directory extension extent.
pub const DIR_EXTENT_PAYLOAD_LEN: u32 = NEXT_POINTER_OFFSET - DIR_EXTENT_HEADER_LEN;

/// Payload bytes in a file extension extent.
pub const FILE_EXTENT_PAYLOAD_LEN: u32 = NEXT_POINTER_OFFSET - FILE_EXTENT_HEADER_LEN;

// ── Block number ────────────────────────────────────────────────────────────

/// Block number on a ChainFS volume.
///
/// Block numbers are 32-bit on disk, and a block number doubles as the
/// identity of the entity whose chain starts there ("inode number" = block
/// number). `BlockNumber::NIL` (block 0 is the superblock and never part of
/// a chain) is the "no successor" value terminating every chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u32);

impl BlockNumber {
    /// End-of-chain marker (and the superblock's own number).
    pub const NIL: Self = Self(0);

    /// The superblock occupies block 0.
    pub const SUPERBLOCK: Self = Self(0);

    /// Whether this is the end-of-chain marker.
    #[must_use]
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Byte offset of this block's start on the device.
    #[must_use]
    pub fn to_byte_offset(self) -> u64 {
        u64::from(self.0) * u64::from(BLOCK_SIZE)
    }

    /// Index usable for cache vectors.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── POSIX file mode constants ───────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Named pipe (FIFO).
pub const S_IFIFO: u16 = 0o010_000;
/// Character device.
pub const S_IFCHR: u16 = 0o020_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Block device.
pub const S_IFBLK: u16 = 0o060_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;
/// Socket.
pub const S_IFSOCK: u16 = 0o140_000;

// ── Parse-layer errors ──────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid block tag: expected {expected:#x}, got {actual:#x}")]
    InvalidTag { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

// ── Little-endian field codecs ──────────────────────────────────────────────

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
fn ensure_slice_mut(data: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&mut data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, 2)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, 4)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

#[inline]
pub fn write_le_u64(data: &mut [u8], offset: usize, value: u64) -> Result<(), ParseError> {
    ensure_slice_mut(data, offset, 8)?.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}
