#![forbid(unsafe_code)]
//! On-disk record codecs for ChainFS.
//!
//! Every structure the format defines is read and written through explicit
//! fixed-offset functions here: the 64-byte inode header, the
//! variable-length directory entry record, the per-extent block headers,
//! and the two superblock slots. The codecs operate on byte slices and
//! return `ParseError`; they never touch the device.
//!
//! Field layout of the inode header (all little-endian):
//!
//! | Field | Offset | Size |
//! |---|---|---|
//! | type code | 0 | 4 |
//! | mode | 4 | 2 |
//! | link count | 6 | 2 |
//! | uid | 8 | 4 |
//! | gid | 12 | 4 |
//! | rdev | 16 | 4 |
//! | flags | 20 | 4 |
//! | atime (s, ns) | 24, 28 | 4, 4 |
//! | mtime (s, ns) | 32, 36 | 4, 4 |
//! | ctime (s, ns) | 40, 44 | 4, 4 |
//! | size | 48 | 8 |
//! | allocated blocks | 56 | 8 |

use cfs_types::{
    BlockNumber, DIR_ENTRY_FIXED_LEN, INODE_HEADER_LEN, MAX_DIR_ENTRY_LEN, ParseError, S_IFBLK,
    S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK, ensure_slice, read_le_u16,
    read_le_u32, read_le_u64, write_le_u16, write_le_u32, write_le_u64,
};
use serde::{Deserialize, Serialize};

// ── Block tags ──────────────────────────────────────────────────────────────

/// Type code of the superblock (block 0 only).
pub const TAG_SUPERBLOCK: u32 = 0;
/// Type code of an entity's head block (the inode header lives here).
pub const TAG_INODE: u32 = 1;
/// Type code of a directory extension extent.
pub const TAG_DIR_EXTENT: u32 = 2;
/// Type code of a file extension extent.
pub const TAG_FILE_EXTENT: u32 = 3;
/// Type code stamped into a block on the free stack.
pub const TAG_FREE: u32 = 4;

/// Check the leading tag of a block image.
pub fn expect_tag(bytes: &[u8], expected: u32) -> Result<(), ParseError> {
    let actual = read_le_u32(bytes, 0)?;
    if actual != expected {
        return Err(ParseError::InvalidTag { expected, actual });
    }
    Ok(())
}

/// Header bytes of a directory extension extent.
#[must_use]
pub fn dir_extent_header() -> [u8; 4] {
    TAG_DIR_EXTENT.to_le_bytes()
}

/// Header bytes of a file extension extent, carrying the owning inode's
/// block number as a back-pointer.
#[must_use]
pub fn file_extent_header(owner: BlockNumber) -> [u8; 8] {
    let mut header = [0_u8; 8];
    header[..4].copy_from_slice(&TAG_FILE_EXTENT.to_le_bytes());
    header[4..].copy_from_slice(&owner.0.to_le_bytes());
    header
}

/// Header bytes stamped into a released block.
#[must_use]
pub fn free_block_header() -> [u8; 4] {
    TAG_FREE.to_le_bytes()
}

/// Read the owner back-pointer from a file extension extent image.
pub fn file_extent_owner(bytes: &[u8]) -> Result<BlockNumber, ParseError> {
    expect_tag(bytes, TAG_FILE_EXTENT)?;
    Ok(BlockNumber(read_le_u32(bytes, 4)?))
}

// ── File kind ───────────────────────────────────────────────────────────────

/// Entity kind, derived from the `S_IFMT` bits of the mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileKind {
    /// Decode from a mode value.
    pub fn from_mode(mode: u16) -> Result<Self, ParseError> {
        match mode & S_IFMT {
            S_IFREG => Ok(Self::Regular),
            S_IFDIR => Ok(Self::Directory),
            S_IFLNK => Ok(Self::Symlink),
            S_IFCHR => Ok(Self::CharDevice),
            S_IFBLK => Ok(Self::BlockDevice),
            S_IFIFO => Ok(Self::Fifo),
            S_IFSOCK => Ok(Self::Socket),
            _ => Err(ParseError::InvalidField {
                field: "mode",
                reason: "unknown file type bits",
            }),
        }
    }

    /// The `S_IFMT` bits for this kind.
    #[must_use]
    pub fn type_bits(self) -> u16 {
        match self {
            Self::Regular => S_IFREG,
            Self::Directory => S_IFDIR,
            Self::Symlink => S_IFLNK,
            Self::CharDevice => S_IFCHR,
            Self::BlockDevice => S_IFBLK,
            Self::Fifo => S_IFIFO,
            Self::Socket => S_IFSOCK,
        }
    }
}

// ── Inode header ────────────────────────────────────────────────────────────

/// Decoded inode header.
///
/// Timestamps are (seconds, nanoseconds) pairs. `size` is the logical byte
/// size (for directories: the sum of the length fields of all real
/// entries); `blocks` counts allocated blocks in the entity's chain,
/// including the head block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeHeader {
    pub mode: u16,
    pub links: u16,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub flags: u32,
    pub atime: (u32, u32),
    pub mtime: (u32, u32),
    pub ctime: (u32, u32),
    pub size: u64,
    pub blocks: u64,
}

impl InodeHeader {
    /// A fresh header for a newly created entity.
    #[must_use]
    pub fn new(kind: FileKind, perm: u16, uid: u32, gid: u32, now: (u32, u32)) -> Self {
        Self {
            mode: kind.type_bits() | (perm & 0o7777),
            links: 1,
            uid,
            gid,
            rdev: 0,
            flags: 0,
            atime: now,
            mtime: now,
            ctime: now,
            size: 0,
            blocks: 1,
        }
    }

    /// Entity kind from the mode bits.
    pub fn kind(&self) -> Result<FileKind, ParseError> {
        FileKind::from_mode(self.mode)
    }

    /// Parse an inode header from the first 64 bytes of a head block image.
    ///
    /// The leading type code must be `TAG_INODE`.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, INODE_HEADER_LEN as usize)?;
        expect_tag(bytes, TAG_INODE)?;
        Ok(Self {
            mode: read_le_u16(bytes, 4)?,
            links: read_le_u16(bytes, 6)?,
            uid: read_le_u32(bytes, 8)?,
            gid: read_le_u32(bytes, 12)?,
            rdev: read_le_u32(bytes, 16)?,
            flags: read_le_u32(bytes, 20)?,
            atime: (read_le_u32(bytes, 24)?, read_le_u32(bytes, 28)?),
            mtime: (read_le_u32(bytes, 32)?, read_le_u32(bytes, 36)?),
            ctime: (read_le_u32(bytes, 40)?, read_le_u32(bytes, 44)?),
            size: read_le_u64(bytes, 48)?,
            blocks: read_le_u64(bytes, 56)?,
        })
    }

    /// Serialize into the first 64 bytes of `bytes`.
    pub fn write_to_bytes(&self, bytes: &mut [u8]) -> Result<(), ParseError> {
        if bytes.len() < INODE_HEADER_LEN as usize {
            return Err(ParseError::InsufficientData {
                needed: INODE_HEADER_LEN as usize,
                offset: 0,
                actual: bytes.len(),
            });
        }
        write_le_u32(bytes, 0, TAG_INODE)?;
        write_le_u16(bytes, 4, self.mode)?;
        write_le_u16(bytes, 6, self.links)?;
        write_le_u32(bytes, 8, self.uid)?;
        write_le_u32(bytes, 12, self.gid)?;
        write_le_u32(bytes, 16, self.rdev)?;
        write_le_u32(bytes, 20, self.flags)?;
        write_le_u32(bytes, 24, self.atime.0)?;
        write_le_u32(bytes, 28, self.atime.1)?;
        write_le_u32(bytes, 32, self.mtime.0)?;
        write_le_u32(bytes, 36, self.mtime.1)?;
        write_le_u32(bytes, 40, self.ctime.0)?;
        write_le_u32(bytes, 44, self.ctime.1)?;
        write_le_u64(bytes, 48, self.size)?;
        write_le_u64(bytes, 56, self.blocks)?;
        Ok(())
    }

    /// Serialize into a fresh 64-byte array (block header form).
    #[must_use]
    pub fn to_header_bytes(&self) -> [u8; INODE_HEADER_LEN as usize] {
        let mut bytes = [0_u8; INODE_HEADER_LEN as usize];
        // Infallible: the buffer is exactly INODE_HEADER_LEN.
        let _ = self.write_to_bytes(&mut bytes);
        bytes
    }
}

// ── Directory entry records ─────────────────────────────────────────────────

/// One decoded directory record: `length(2) | inode(4) | name(length - 6)`.
///
/// The length field covers the whole record including itself. A length of
/// zero is the end-of-block sentinel, not a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: BlockNumber,
    pub name: Vec<u8>,
}

impl DirEntry {
    /// Total record length for a name of `name_len` bytes.
    #[must_use]
    pub fn record_len(name_len: usize) -> usize {
        DIR_ENTRY_FIXED_LEN as usize + name_len
    }

    /// Whether a record of this name length fits any block at all.
    #[must_use]
    pub fn fits_block(name_len: usize) -> bool {
        Self::record_len(name_len) <= MAX_DIR_ENTRY_LEN as usize
    }

    /// Encode this record at `offset` in `buf`.
    pub fn write_to_bytes(&self, buf: &mut [u8], offset: usize) -> Result<(), ParseError> {
        let rec_len = Self::record_len(self.name.len());
        let len_u16 = u16::try_from(rec_len).map_err(|_| ParseError::IntegerConversion {
            field: "dir_entry_len",
        })?;
        ensure_slice(buf, offset, rec_len)?;
        write_le_u16(buf, offset, len_u16)?;
        write_le_u32(buf, offset + 2, self.ino.0)?;
        buf[offset + DIR_ENTRY_FIXED_LEN as usize..offset + rec_len].copy_from_slice(&self.name);
        Ok(())
    }
}

/// Outcome of decoding one record position in a directory extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirRecord {
    /// A real entry of the given total record length.
    Entry { len: u16, ino: BlockNumber },
    /// The zero-length sentinel: no more real entries in this block.
    EndOfBlock,
}

/// Decode the record at `offset` in a block image.
///
/// `limit` is the first byte the record must not reach into (the
/// next-pointer offset). The name bytes are NOT copied; use
/// [`dir_entry_name`] to borrow them.
pub fn parse_dir_record(buf: &[u8], offset: usize, limit: usize) -> Result<DirRecord, ParseError> {
    let len = read_le_u16(buf, offset)?;
    if len == 0 {
        return Ok(DirRecord::EndOfBlock);
    }
    if usize::from(len) < DIR_ENTRY_FIXED_LEN as usize {
        return Err(ParseError::InvalidField {
            field: "dir_entry_len",
            reason: "shorter than the fixed record part",
        });
    }
    let end = offset + usize::from(len);
    if end > limit {
        return Err(ParseError::InvalidField {
            field: "dir_entry_len",
            reason: "record overruns the block payload",
        });
    }
    let ino = BlockNumber(read_le_u32(buf, offset + 2)?);
    Ok(DirRecord::Entry { len, ino })
}

/// Borrow the name bytes of the record at `offset` with total length `len`.
pub fn dir_entry_name(buf: &[u8], offset: usize, len: u16) -> Result<&[u8], ParseError> {
    ensure_slice(
        buf,
        offset + DIR_ENTRY_FIXED_LEN as usize,
        usize::from(len) - DIR_ENTRY_FIXED_LEN as usize,
    )
}

// ── Superblock ──────────────────────────────────────────────────────────────

/// Read the root directory block number from a superblock image.
pub fn superblock_root(bytes: &[u8]) -> Result<BlockNumber, ParseError> {
    Ok(BlockNumber(read_le_u32(
        bytes,
        cfs_types::SUPERBLOCK_ROOT_OFFSET as usize,
    )?))
}

/// Read the free-list head from a superblock image.
pub fn superblock_free_head(bytes: &[u8]) -> Result<BlockNumber, ParseError> {
    Ok(BlockNumber(read_le_u32(
        bytes,
        cfs_types::SUPERBLOCK_FREE_HEAD_OFFSET as usize,
    )?))
}
