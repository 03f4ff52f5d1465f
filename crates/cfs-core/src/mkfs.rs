//! Volume formatter.
//!
//! Lays down the superblock, an empty root directory, and the initial free
//! stack on a blank device. The engine never calls this; hosts provisioning
//! fresh volumes and the test suites do. Sharing the codecs with the engine
//! keeps the formatter and the reader from drifting apart.

use cfs_block::{BlockBuf, BlockStore, ByteDevice};
use cfs_error::{CfsError, Result};
use cfs_ondisk::{FileKind, InodeHeader, free_block_header};
use cfs_types::{BlockNumber, NEXT_POINTER_OFFSET, SUPERBLOCK_ROOT_OFFSET, write_le_u32};
use tracing::info;

/// Head block of the root directory on a freshly formatted volume.
pub const ROOT_BLOCK: BlockNumber = BlockNumber(1);

/// Format the volume backing `store`.
///
/// Block 0 becomes the superblock (root slot -> block 1, free head ->
/// block 2), block 1 the empty root directory owned by `uid`/`gid`, and
/// blocks 2.. are threaded onto the free stack in ascending order. Every
/// block is rewritten in full, so stale content cannot survive a format.
///
/// Returns the root directory's block number.
pub fn format_volume<D: ByteDevice>(store: &BlockStore<D>, uid: u32, gid: u32) -> Result<BlockNumber> {
    let blocks = store.block_count();
    if blocks < 2 {
        return Err(CfsError::NoSpace);
    }

    // Superblock: root pointer plus the free-list head in its trailing slot.
    let mut superblock = BlockBuf::zeroed();
    let free_head = if blocks > 2 { 2 } else { 0 };
    write_le_u32(
        superblock.as_mut_slice(),
        SUPERBLOCK_ROOT_OFFSET as usize,
        ROOT_BLOCK.0,
    )
    .map_err(|e| CfsError::Parse(e.to_string()))?;
    write_le_u32(
        superblock.as_mut_slice(),
        NEXT_POINTER_OFFSET as usize,
        free_head,
    )
    .map_err(|e| CfsError::Parse(e.to_string()))?;
    store.write_block(BlockNumber::SUPERBLOCK, superblock.as_slice())?;

    // Root directory: inode header over an all-zero payload (the zero
    // sentinel makes it empty), next-pointer zero.
    let header = InodeHeader::new(
        FileKind::Directory,
        0o755,
        uid,
        gid,
        cfs_inode::now_timestamp(),
    );
    let mut root = BlockBuf::zeroed();
    header
        .write_to_bytes(root.as_mut_slice())
        .map_err(|e| CfsError::Parse(e.to_string()))?;
    store.write_block(ROOT_BLOCK, root.as_slice())?;

    // Free stack: each remaining block links to its successor.
    for block in 2..blocks {
        let mut buf = BlockBuf::zeroed();
        buf.as_mut_slice()[..4].copy_from_slice(&free_block_header());
        let next = if block + 1 < blocks { block + 1 } else { 0 };
        write_le_u32(buf.as_mut_slice(), NEXT_POINTER_OFFSET as usize, next)
            .map_err(|e| CfsError::Parse(e.to_string()))?;
        store.write_block(BlockNumber(block), buf.as_slice())?;
    }

    info!(blocks, free = blocks.saturating_sub(2), "formatted volume");
    Ok(ROOT_BLOCK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfs_block::MemoryByteDevice;
    use cfs_ondisk::{TAG_FREE, superblock_free_head, superblock_root};
    use cfs_types::read_le_u32;

    #[test]
    fn format_lays_out_superblock_root_and_free_stack() {
        let store = BlockStore::new(MemoryByteDevice::with_blocks(5)).expect("store");
        let root = format_volume(&store, 7, 8).expect("format");
        assert_eq!(root, ROOT_BLOCK);

        let sb = store.read_block(BlockNumber::SUPERBLOCK).expect("sb");
        assert_eq!(superblock_root(sb.as_slice()).unwrap(), ROOT_BLOCK);
        assert_eq!(superblock_free_head(sb.as_slice()).unwrap(), BlockNumber(2));

        let header = cfs_inode::read_header(&store, root).expect("root header");
        assert_eq!(header.kind().unwrap(), FileKind::Directory);
        assert_eq!(header.size, 0);
        assert_eq!((header.uid, header.gid), (7, 8));

        // 2 -> 3 -> 4 -> end, each tagged free.
        for (block, next) in [(2_u32, 3_u32), (3, 4), (4, 0)] {
            let buf = store.read_block(BlockNumber(block)).expect("read");
            assert_eq!(read_le_u32(buf.as_slice(), 0).unwrap(), TAG_FREE);
            assert_eq!(
                read_le_u32(buf.as_slice(), NEXT_POINTER_OFFSET as usize).unwrap(),
                next
            );
        }
    }

    #[test]
    fn two_block_volume_has_an_empty_free_stack() {
        let store = BlockStore::new(MemoryByteDevice::with_blocks(2)).expect("store");
        format_volume(&store, 0, 0).expect("format");
        let sb = store.read_block(BlockNumber::SUPERBLOCK).expect("sb");
        assert_eq!(
            superblock_free_head(sb.as_slice()).unwrap(),
            BlockNumber::NIL
        );
    }

    #[test]
    fn undersized_volume_is_rejected() {
        let store = BlockStore::new(MemoryByteDevice::with_blocks(1)).expect("store");
        assert!(matches!(
            format_volume(&store, 0, 0).unwrap_err(),
            CfsError::NoSpace
        ));
    }
}
