#![forbid(unsafe_code)]
//! Storage handle abstraction and block-addressed I/O.
//!
//! The engine performs positioned reads and writes against one already-open
//! storage handle. [`ByteDevice`] is that handle's seam; [`BlockStore`]
//! layers block-number addressing on top, with whole-block transfers for
//! read-modify-write paths and narrow in-block field access for the small
//! fixed-offset updates (next-pointers, inode fields, superblock slots) the
//! format lives on.

use cfs_error::{CfsError, Result};
use cfs_types::{BLOCK_SIZE, BlockNumber};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Owned block buffer.
///
/// Invariant: length == `BLOCK_SIZE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            bytes: vec![0_u8; BLOCK_SIZE as usize],
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Byte-addressed device with pread/pwrite semantics.
pub trait ByteDevice {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` to `offset`.
    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// File-backed device using `pread`/`pwrite` style I/O.
///
/// Built on `std::os::unix::fs::FileExt`, so no shared seek position is
/// involved and a short read or write surfaces as an error instead of
/// silently truncating the transfer.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
    writable: bool,
}

impl FileByteDevice {
    /// Open `path` read-write, falling back to read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path.as_ref())
                    .map(|file| (file, false))
            })?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
            writable,
        })
    }

    /// Wrap an already-open file handle, as handed over by the host.
    pub fn from_file(file: File, writable: bool) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
            writable,
        })
    }

    #[must_use]
    pub fn writable(&self) -> bool {
        self.writable
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(CfsError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "device opened read-only",
            )));
        }
        check_range(offset, buf.len(), self.len)?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

fn check_range(offset: u64, len: usize, device_len: u64) -> Result<()> {
    let len = u64::try_from(len)
        .map_err(|_| CfsError::Parse("transfer length overflows u64".to_owned()))?;
    let end = offset
        .checked_add(len)
        .ok_or_else(|| CfsError::Parse("transfer range overflows u64".to_owned()))?;
    if end > device_len {
        return Err(CfsError::Parse(format!(
            "transfer out of bounds: offset={offset} len={len} device_len={device_len}"
        )));
    }
    Ok(())
}

/// In-memory device.
///
/// Used as the fixture for every chain-level test in the workspace, and
/// usable by hosts that want an ephemeral volume.
#[derive(Debug)]
pub struct MemoryByteDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemoryByteDevice {
    /// A zero-filled device holding `blocks` blocks.
    #[must_use]
    pub fn with_blocks(blocks: u32) -> Self {
        Self {
            bytes: Mutex::new(vec![0_u8; blocks as usize * BLOCK_SIZE as usize]),
        }
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.lock().len()).unwrap_or(0)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        check_range(offset, buf.len(), bytes.len() as u64)?;
        let offset =
            usize::try_from(offset).map_err(|_| CfsError::Parse("offset overflow".into()))?;
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        check_range(offset, buf.len(), bytes.len() as u64)?;
        let offset =
            usize::try_from(offset).map_err(|_| CfsError::Parse("offset overflow".into()))?;
        bytes[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Block-addressed view over a [`ByteDevice`].
///
/// All addressing is `block number x BLOCK_SIZE + in-block offset`, with
/// every transfer bounds-checked against both the block payload and the
/// device length.
#[derive(Debug)]
pub struct BlockStore<D: ByteDevice> {
    dev: D,
    block_count: u32,
}

impl<D: ByteDevice> BlockStore<D> {
    /// Wrap a device. The device length must be a whole number of blocks.
    pub fn new(dev: D) -> Result<Self> {
        let len = dev.len_bytes();
        let remainder = len % u64::from(BLOCK_SIZE);
        if remainder != 0 {
            return Err(CfsError::Parse(format!(
                "device length is not block-aligned: len_bytes={len} remainder={remainder}"
            )));
        }
        let block_count = u32::try_from(len / u64::from(BLOCK_SIZE))
            .map_err(|_| CfsError::Parse("device exceeds 32-bit block addressing".to_owned()))?;
        Ok(Self { dev, block_count })
    }

    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.dev
    }

    fn check_block(&self, block: BlockNumber) -> Result<()> {
        if block.0 >= self.block_count {
            return Err(CfsError::Corruption {
                block: block.0,
                detail: format!("block out of range (block_count={})", self.block_count),
            });
        }
        Ok(())
    }

    /// Read a whole block.
    pub fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        self.check_block(block)?;
        let mut buf = BlockBuf::zeroed();
        self.dev
            .read_exact_at(block.to_byte_offset(), buf.as_mut_slice())?;
        Ok(buf)
    }

    /// Write a whole block. `data.len()` MUST equal `BLOCK_SIZE`.
    pub fn write_block(&self, block: BlockNumber, data: &[u8]) -> Result<()> {
        self.check_block(block)?;
        if data.len() != BLOCK_SIZE as usize {
            return Err(CfsError::Parse(format!(
                "write_block data size mismatch: got={} expected={BLOCK_SIZE}",
                data.len()
            )));
        }
        self.dev.write_all_at(block.to_byte_offset(), data)
    }

    /// Read `buf.len()` bytes starting at `offset` within `block`.
    pub fn read_at(&self, block: BlockNumber, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.check_block(block)?;
        check_in_block(block, offset, buf.len())?;
        self.dev
            .read_exact_at(block.to_byte_offset() + u64::from(offset), buf)
    }

    /// Write `buf` starting at `offset` within `block`.
    pub fn write_at(&self, block: BlockNumber, offset: u32, buf: &[u8]) -> Result<()> {
        self.check_block(block)?;
        check_in_block(block, offset, buf.len())?;
        self.dev
            .write_all_at(block.to_byte_offset() + u64::from(offset), buf)
    }

    /// Flush pending writes to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.dev.sync()
    }
}

fn check_in_block(block: BlockNumber, offset: u32, len: usize) -> Result<()> {
    let end = u64::from(offset) + len as u64;
    if end > u64::from(BLOCK_SIZE) {
        return Err(CfsError::Corruption {
            block: block.0,
            detail: format!("in-block range out of bounds: offset={offset} len={len}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_device_round_trips() {
        let dev = MemoryByteDevice::with_blocks(4);
        dev.write_all_at(100, b"hello").expect("write");
        let mut buf = [0_u8; 5];
        dev.read_exact_at(100, &mut buf).expect("read");
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn memory_device_rejects_out_of_bounds() {
        let dev = MemoryByteDevice::with_blocks(1);
        let mut buf = [0_u8; 8];
        assert!(dev.read_exact_at(4090, &mut buf).is_err());
        assert!(dev.write_all_at(4096, b"x").is_err());
    }

    #[test]
    fn block_store_round_trips_whole_blocks() {
        let store = BlockStore::new(MemoryByteDevice::with_blocks(4)).expect("store");
        let mut buf = BlockBuf::zeroed();
        buf.as_mut_slice().fill(7);
        store.write_block(BlockNumber(2), buf.as_slice()).expect("write");
        let read = store.read_block(BlockNumber(2)).expect("read");
        assert_eq!(read.as_slice(), buf.as_slice());
    }

    #[test]
    fn block_store_field_access() {
        let store = BlockStore::new(MemoryByteDevice::with_blocks(2)).expect("store");
        store
            .write_at(BlockNumber(1), 4092, &42_u32.to_le_bytes())
            .expect("write");
        let mut next = [0_u8; 4];
        store.read_at(BlockNumber(1), 4092, &mut next).expect("read");
        assert_eq!(u32::from_le_bytes(next), 42);
    }

    #[test]
    fn block_store_rejects_unaligned_device() {
        let dev = MemoryByteDevice {
            bytes: Mutex::new(vec![0_u8; 5000]),
        };
        assert!(BlockStore::new(dev).is_err());
    }

    #[test]
    fn block_store_rejects_out_of_range_block() {
        let store = BlockStore::new(MemoryByteDevice::with_blocks(2)).expect("store");
        assert!(store.read_block(BlockNumber(2)).is_err());
        let err = store.read_block(BlockNumber(9)).unwrap_err();
        assert!(matches!(err, CfsError::Corruption { block: 9, .. }));
    }

    #[test]
    fn block_store_rejects_range_spilling_past_next_pointer_slot() {
        let store = BlockStore::new(MemoryByteDevice::with_blocks(2)).expect("store");
        let mut buf = [0_u8; 8];
        assert!(store.read_at(BlockNumber(0), 4092, &mut buf).is_err());
    }

    #[test]
    fn file_device_round_trips() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(&vec![0_u8; 8192]).expect("fill");
        tmp.flush().expect("flush");

        let dev = FileByteDevice::open(tmp.path()).expect("open");
        assert!(dev.writable());
        assert_eq!(dev.len_bytes(), 8192);

        dev.write_all_at(4096, b"chain").expect("write");
        let mut buf = [0_u8; 5];
        dev.read_exact_at(4096, &mut buf).expect("read");
        assert_eq!(&buf, b"chain");
        dev.sync().expect("sync");
    }
}
