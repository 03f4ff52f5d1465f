#![forbid(unsafe_code)]
//! ChainFS engine façade.
//!
//! [`Engine`] bundles the storage handle, the next-pointer cache, and the
//! superblock fields into one context and exposes the narrow operation
//! table ([`FsOps`]) the external filesystem bridge consumes. A raw block
//! number stands in for an inode reference throughout; the bridge maps
//! kernel-style calls onto these operations and owns everything this crate
//! does not: mounting, permission checks, argument parsing, dispatch.
//!
//! The engine performs no locking. It assumes one serialized caller;
//! interleaving two structural mutations without external mutual exclusion
//! can corrupt the free list or an extent chain irrecoverably.

pub mod mkfs;

use cfs_alloc::NextPointerCache;
use cfs_block::{BlockStore, ByteDevice};
use cfs_error::{CfsError, Result};
use cfs_ondisk::{FileKind, InodeHeader};
use cfs_types::{
    BlockNumber, ParseError, S_IFMT, SUPERBLOCK_ROOT_OFFSET, read_le_u32,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Convert a parse failure on live metadata into a triageable error.
pub(crate) fn parse_to_cfs(block: BlockNumber, err: &ParseError) -> CfsError {
    CfsError::Corruption {
        block: block.0,
        detail: err.to_string(),
    }
}

/// Decoded attributes of one entity, as handed to the bridge host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeAttr {
    /// Entity identity: its head block number.
    pub ino: BlockNumber,
    pub kind: FileKind,
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

impl InodeAttr {
    fn from_header(ino: BlockNumber, header: &InodeHeader) -> Result<Self> {
        let kind = header.kind().map_err(|e| parse_to_cfs(ino, &e))?;
        Ok(Self {
            ino,
            kind,
            mode: header.mode,
            links: header.links,
            uid: header.uid,
            gid: header.gid,
            rdev: header.rdev,
            flags: header.flags,
            atime: header.atime,
            mtime: header.mtime,
            ctime: header.ctime,
            size: header.size,
            blocks: header.blocks,
        })
    }
}

/// The operation table consumed by the filesystem bridge.
///
/// Entity identity is a raw block number everywhere. Callers bind the
/// storage handle at construction time ([`Engine::new`]), then run
/// [`FsOps::initialize`] before the first operation and
/// [`FsOps::shutdown`] after the last.
pub trait FsOps {
    /// Read the superblock and seed the next-pointer cache.
    fn initialize(&mut self) -> Result<()>;

    /// Flush the storage handle.
    fn shutdown(&mut self) -> Result<()>;

    /// Head block of the root directory.
    fn root_block_number(&self) -> BlockNumber;

    fn get_attributes(&mut self, node: BlockNumber) -> Result<InodeAttr>;

    /// Validate that `node` decodes as an entity head.
    fn open(&mut self, node: BlockNumber) -> Result<()>;

    /// Invoke `visit(name, inode_number)` for every entry of `dir`.
    fn list_directory(
        &mut self,
        dir: BlockNumber,
        visit: &mut dyn FnMut(&[u8], BlockNumber),
    ) -> Result<()>;

    fn read(&mut self, node: BlockNumber, offset: u64, dest: &mut [u8]) -> Result<usize>;

    fn write(&mut self, node: BlockNumber, offset: u64, src: &[u8]) -> Result<usize>;

    fn read_link(&mut self, node: BlockNumber) -> Result<Vec<u8>>;

    fn set_mode(&mut self, node: BlockNumber, mode: u16) -> Result<()>;

    fn set_owner(&mut self, node: BlockNumber, uid: u32, gid: u32) -> Result<()>;

    fn set_times(&mut self, node: BlockNumber, atime: (u32, u32), mtime: (u32, u32))
    -> Result<()>;

    fn set_size(&mut self, node: BlockNumber, size: u64) -> Result<()>;

    fn make_directory(
        &mut self,
        parent: BlockNumber,
        name: &[u8],
        mode: u16,
        uid: u32,
        gid: u32,
    ) -> Result<BlockNumber>;

    fn remove_directory(&mut self, parent: BlockNumber, name: &[u8]) -> Result<()>;

    fn make_node(
        &mut self,
        parent: BlockNumber,
        name: &[u8],
        mode: u16,
        rdev: u32,
        uid: u32,
        gid: u32,
    ) -> Result<BlockNumber>;

    fn make_symlink(
        &mut self,
        parent: BlockNumber,
        name: &[u8],
        target: &[u8],
        uid: u32,
        gid: u32,
    ) -> Result<BlockNumber>;

    fn make_hard_link(
        &mut self,
        parent: BlockNumber,
        name: &[u8],
        target: BlockNumber,
    ) -> Result<()>;

    fn remove_entry(&mut self, parent: BlockNumber, name: &[u8]) -> Result<()>;

    fn rename_entry(
        &mut self,
        parent: BlockNumber,
        name: &[u8],
        new_parent: BlockNumber,
        new_name: &[u8],
    ) -> Result<()>;
}

/// The engine: one storage handle, one cache, one superblock view.
#[derive(Debug)]
pub struct Engine<D: ByteDevice> {
    store: BlockStore<D>,
    cache: NextPointerCache,
    root: BlockNumber,
}

impl<D: ByteDevice> Engine<D> {
    /// Bind an already-open storage handle.
    pub fn new(device: D) -> Result<Self> {
        let store = BlockStore::new(device)?;
        let cache = NextPointerCache::with_capacity(store.block_count());
        Ok(Self {
            store,
            cache,
            root: BlockNumber::NIL,
        })
    }

    /// The underlying block store.
    #[must_use]
    pub fn store(&self) -> &BlockStore<D> {
        &self.store
    }

    /// Resolve `name` in `dir` to its head block.
    ///
    /// Convenience for hosts and tests; the bridge's own dispatch usually
    /// resolves names through [`FsOps::list_directory`].
    pub fn lookup(&mut self, dir: BlockNumber, name: &[u8]) -> Result<BlockNumber> {
        self.require_dir(dir)?;
        match cfs_dir::find(&self.store, &mut self.cache, dir, name)? {
            Some(entry) => Ok(entry.ino),
            None => Err(CfsError::NotFound(
                String::from_utf8_lossy(name).into_owned(),
            )),
        }
    }

    fn read_header(&self, node: BlockNumber) -> Result<InodeHeader> {
        cfs_inode::read_header(&self.store, node)
    }

    fn require_dir(&self, node: BlockNumber) -> Result<InodeHeader> {
        let header = self.read_header(node)?;
        match header.kind().map_err(|e| parse_to_cfs(node, &e))? {
            FileKind::Directory => Ok(header),
            _ => Err(CfsError::NotDirectory),
        }
    }

    fn require_not_dir(&self, node: BlockNumber) -> Result<InodeHeader> {
        let header = self.read_header(node)?;
        match header.kind().map_err(|e| parse_to_cfs(node, &e))? {
            FileKind::Directory => Err(CfsError::IsDirectory),
            _ => Ok(header),
        }
    }

    /// Stamp a directory's modify/change times after a mutation.
    fn touch_dir(&mut self, dir: BlockNumber) -> Result<()> {
        let now = cfs_inode::now_timestamp();
        cfs_inode::update_header(&self.store, dir, |h| {
            h.mtime = now;
            h.ctime = now;
        })?;
        Ok(())
    }

    /// Common path of the three create operations: allocate the head block
    /// with its inode header, then make it visible under `name`.
    ///
    /// On insertion failure the freshly allocated chain is reclaimed, so a
    /// failed create leaks nothing.
    fn create_entity(
        &mut self,
        parent: BlockNumber,
        name: &[u8],
        header: &InodeHeader,
    ) -> Result<BlockNumber> {
        self.require_dir(parent)?;
        if name.is_empty() {
            return Err(CfsError::InvalidName);
        }
        if !cfs_ondisk::DirEntry::fits_block(name.len()) {
            return Err(CfsError::NameTooLong);
        }
        if cfs_dir::find(&self.store, &mut self.cache, parent, name)?.is_some() {
            return Err(CfsError::Exists);
        }

        let node = cfs_alloc::allocate(
            &self.store,
            &mut self.cache,
            &header.to_header_bytes(),
            true,
        )?;
        if let Err(err) = cfs_dir::insert(&self.store, &mut self.cache, parent, name, node) {
            let _ = cfs_inode::drop_link_and_maybe_reclaim(&self.store, &mut self.cache, node);
            return Err(err);
        }
        self.touch_dir(parent)?;
        Ok(node)
    }
}

impl<D: ByteDevice> FsOps for Engine<D> {
    fn initialize(&mut self) -> Result<()> {
        let mut root_bytes = [0_u8; 4];
        self.store
            .read_at(BlockNumber::SUPERBLOCK, SUPERBLOCK_ROOT_OFFSET, &mut root_bytes)?;
        self.root = BlockNumber(
            read_le_u32(&root_bytes, 0).map_err(|e| parse_to_cfs(BlockNumber::SUPERBLOCK, &e))?,
        );
        match self.require_dir(self.root) {
            Ok(_) => {}
            Err(CfsError::NotDirectory) => {
                return Err(CfsError::Corruption {
                    block: self.root.0,
                    detail: "superblock root slot does not reference a directory".to_owned(),
                });
            }
            Err(other) => return Err(other),
        }

        // Warm the free-list head; the superblock's next-pointer slot is it.
        let free_head = self
            .cache
            .get_next(&self.store, BlockNumber::SUPERBLOCK)?;
        info!(
            root = self.root.0,
            free_head = free_head.0,
            blocks = self.store.block_count(),
            "engine initialized"
        );
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.store.sync()?;
        info!("engine shut down");
        Ok(())
    }

    fn root_block_number(&self) -> BlockNumber {
        self.root
    }

    fn get_attributes(&mut self, node: BlockNumber) -> Result<InodeAttr> {
        let header = self.read_header(node)?;
        InodeAttr::from_header(node, &header)
    }

    fn open(&mut self, node: BlockNumber) -> Result<()> {
        let _ = self.read_header(node)?;
        Ok(())
    }

    fn list_directory(
        &mut self,
        dir: BlockNumber,
        visit: &mut dyn FnMut(&[u8], BlockNumber),
    ) -> Result<()> {
        self.require_dir(dir)?;
        cfs_dir::for_each_entry(&self.store, &mut self.cache, dir, visit)
    }

    fn read(&mut self, node: BlockNumber, offset: u64, dest: &mut [u8]) -> Result<usize> {
        self.require_not_dir(node)?;
        cfs_file::read(&self.store, &mut self.cache, node, offset, dest)
    }

    fn write(&mut self, node: BlockNumber, offset: u64, src: &[u8]) -> Result<usize> {
        self.require_not_dir(node)?;
        let written = cfs_file::write(&self.store, &mut self.cache, node, offset, src)?;
        let now = cfs_inode::now_timestamp();
        cfs_inode::update_header(&self.store, node, |h| {
            h.mtime = now;
            h.ctime = now;
        })?;
        Ok(written)
    }

    fn read_link(&mut self, node: BlockNumber) -> Result<Vec<u8>> {
        let header = self.read_header(node)?;
        if header.kind().map_err(|e| parse_to_cfs(node, &e))? != FileKind::Symlink {
            return Err(CfsError::NotSymlink);
        }
        let len = usize::try_from(header.size).map_err(|_| CfsError::Corruption {
            block: node.0,
            detail: "symlink target length does not fit in memory".to_owned(),
        })?;
        let mut target = vec![0_u8; len];
        let read = cfs_file::read(&self.store, &mut self.cache, node, 0, &mut target)?;
        target.truncate(read);
        Ok(target)
    }

    fn set_mode(&mut self, node: BlockNumber, mode: u16) -> Result<()> {
        let now = cfs_inode::now_timestamp();
        cfs_inode::update_header(&self.store, node, |h| {
            // Type bits are immutable; only the permission bits move.
            h.mode = (h.mode & S_IFMT) | (mode & !S_IFMT);
            h.ctime = now;
        })?;
        Ok(())
    }

    fn set_owner(&mut self, node: BlockNumber, uid: u32, gid: u32) -> Result<()> {
        let now = cfs_inode::now_timestamp();
        cfs_inode::update_header(&self.store, node, |h| {
            h.uid = uid;
            h.gid = gid;
            h.ctime = now;
        })?;
        Ok(())
    }

    fn set_times(
        &mut self,
        node: BlockNumber,
        atime: (u32, u32),
        mtime: (u32, u32),
    ) -> Result<()> {
        let now = cfs_inode::now_timestamp();
        cfs_inode::update_header(&self.store, node, |h| {
            h.atime = atime;
            h.mtime = mtime;
            h.ctime = now;
        })?;
        Ok(())
    }

    fn set_size(&mut self, node: BlockNumber, size: u64) -> Result<()> {
        self.require_not_dir(node)?;
        cfs_file::truncate(&self.store, node, size)?;
        let now = cfs_inode::now_timestamp();
        cfs_inode::update_header(&self.store, node, |h| {
            h.mtime = now;
            h.ctime = now;
        })?;
        Ok(())
    }

    fn make_directory(
        &mut self,
        parent: BlockNumber,
        name: &[u8],
        mode: u16,
        uid: u32,
        gid: u32,
    ) -> Result<BlockNumber> {
        let header = InodeHeader::new(
            FileKind::Directory,
            mode,
            uid,
            gid,
            cfs_inode::now_timestamp(),
        );
        let node = self.create_entity(parent, name, &header)?;
        debug!(parent = parent.0, node = node.0, "made directory");
        Ok(node)
    }

    fn remove_directory(&mut self, parent: BlockNumber, name: &[u8]) -> Result<()> {
        self.require_dir(parent)?;
        let entry = cfs_dir::find(&self.store, &mut self.cache, parent, name)?
            .ok_or_else(|| CfsError::NotFound(String::from_utf8_lossy(name).into_owned()))?;
        let child = self.require_dir(entry.ino)?;
        if child.size != 0 {
            return Err(CfsError::NotEmpty);
        }

        cfs_dir::remove(&self.store, &mut self.cache, parent, &entry)?;
        cfs_inode::drop_link_and_maybe_reclaim(&self.store, &mut self.cache, entry.ino)?;
        self.touch_dir(parent)?;
        debug!(parent = parent.0, node = entry.ino.0, "removed directory");
        Ok(())
    }

    fn make_node(
        &mut self,
        parent: BlockNumber,
        name: &[u8],
        mode: u16,
        rdev: u32,
        uid: u32,
        gid: u32,
    ) -> Result<BlockNumber> {
        // Hosts commonly pass bare permission bits for plain files.
        let kind = if mode & S_IFMT == 0 {
            FileKind::Regular
        } else {
            FileKind::from_mode(mode)
                .map_err(|_| CfsError::Parse("unknown file type bits in mode".to_owned()))?
        };
        if kind == FileKind::Directory {
            return Err(CfsError::IsDirectory);
        }
        let mut header =
            InodeHeader::new(kind, mode, uid, gid, cfs_inode::now_timestamp());
        header.rdev = rdev;
        let node = self.create_entity(parent, name, &header)?;
        debug!(parent = parent.0, node = node.0, ?kind, "made node");
        Ok(node)
    }

    fn make_symlink(
        &mut self,
        parent: BlockNumber,
        name: &[u8],
        target: &[u8],
        uid: u32,
        gid: u32,
    ) -> Result<BlockNumber> {
        self.require_dir(parent)?;
        if name.is_empty() {
            return Err(CfsError::InvalidName);
        }
        if !cfs_ondisk::DirEntry::fits_block(name.len()) {
            return Err(CfsError::NameTooLong);
        }
        if cfs_dir::find(&self.store, &mut self.cache, parent, name)?.is_some() {
            return Err(CfsError::Exists);
        }

        let header = InodeHeader::new(
            FileKind::Symlink,
            0o777,
            uid,
            gid,
            cfs_inode::now_timestamp(),
        );
        let node = cfs_alloc::allocate(
            &self.store,
            &mut self.cache,
            &header.to_header_bytes(),
            true,
        )?;

        // Target payload first, then the entry that makes it reachable.
        let write_then_insert = cfs_file::write(&self.store, &mut self.cache, node, 0, target)
            .and_then(|_| cfs_dir::insert(&self.store, &mut self.cache, parent, name, node));
        if let Err(err) = write_then_insert {
            let _ = cfs_inode::drop_link_and_maybe_reclaim(&self.store, &mut self.cache, node);
            return Err(err);
        }
        self.touch_dir(parent)?;
        debug!(parent = parent.0, node = node.0, "made symlink");
        Ok(node)
    }

    fn make_hard_link(
        &mut self,
        parent: BlockNumber,
        name: &[u8],
        target: BlockNumber,
    ) -> Result<()> {
        self.require_dir(parent)?;
        self.require_not_dir(target)?;
        if cfs_dir::find(&self.store, &mut self.cache, parent, name)?.is_some() {
            return Err(CfsError::Exists);
        }

        // Count first, entry second: a referencing entry must never exist
        // with an understated link count.
        cfs_inode::bump_link(&self.store, target)?;
        if let Err(err) = cfs_dir::insert(&self.store, &mut self.cache, parent, name, target) {
            let _ = cfs_inode::update_header(&self.store, target, |h| {
                h.links = h.links.saturating_sub(1);
            });
            return Err(err);
        }
        let now = cfs_inode::now_timestamp();
        cfs_inode::update_header(&self.store, target, |h| h.ctime = now)?;
        self.touch_dir(parent)?;
        debug!(parent = parent.0, target = target.0, "made hard link");
        Ok(())
    }

    fn remove_entry(&mut self, parent: BlockNumber, name: &[u8]) -> Result<()> {
        self.require_dir(parent)?;
        let entry = cfs_dir::find(&self.store, &mut self.cache, parent, name)?
            .ok_or_else(|| CfsError::NotFound(String::from_utf8_lossy(name).into_owned()))?;
        self.require_not_dir(entry.ino)?;

        cfs_dir::remove(&self.store, &mut self.cache, parent, &entry)?;
        let links =
            cfs_inode::drop_link_and_maybe_reclaim(&self.store, &mut self.cache, entry.ino)?;
        if links > 0 {
            let now = cfs_inode::now_timestamp();
            cfs_inode::update_header(&self.store, entry.ino, |h| h.ctime = now)?;
        }
        self.touch_dir(parent)?;
        debug!(
            parent = parent.0,
            node = entry.ino.0,
            links,
            "removed entry"
        );
        Ok(())
    }

    fn rename_entry(
        &mut self,
        parent: BlockNumber,
        name: &[u8],
        new_parent: BlockNumber,
        new_name: &[u8],
    ) -> Result<()> {
        self.require_dir(parent)?;
        self.require_dir(new_parent)?;
        if new_name.is_empty() {
            return Err(CfsError::InvalidName);
        }
        if !cfs_ondisk::DirEntry::fits_block(new_name.len()) {
            return Err(CfsError::NameTooLong);
        }
        if parent == new_parent && name == new_name {
            return Ok(());
        }

        let source = cfs_dir::find(&self.store, &mut self.cache, parent, name)?
            .ok_or_else(|| CfsError::NotFound(String::from_utf8_lossy(name).into_owned()))?;
        let source_kind = self
            .read_header(source.ino)?
            .kind()
            .map_err(|e| parse_to_cfs(source.ino, &e))?;

        if let Some(dest) = cfs_dir::find(&self.store, &mut self.cache, new_parent, new_name)? {
            // Both names already reference the same entity: nothing to do.
            if dest.ino == source.ino {
                return Ok(());
            }
            let dest_header = self.read_header(dest.ino)?;
            let dest_kind = dest_header.kind().map_err(|e| parse_to_cfs(dest.ino, &e))?;
            if dest_kind == FileKind::Directory {
                if source_kind != FileKind::Directory {
                    return Err(CfsError::IsDirectory);
                }
                if dest_header.size != 0 {
                    return Err(CfsError::NotEmpty);
                }
            } else if source_kind == FileKind::Directory {
                return Err(CfsError::NotDirectory);
            }
            cfs_dir::remove(&self.store, &mut self.cache, new_parent, &dest)?;
            cfs_inode::drop_link_and_maybe_reclaim(&self.store, &mut self.cache, dest.ino)?;
        }

        cfs_dir::insert(&self.store, &mut self.cache, new_parent, new_name, source.ino)?;

        // Re-locate the source record: the replacement removal above may
        // have shifted offsets in a shared block.
        let source = cfs_dir::find(&self.store, &mut self.cache, parent, name)?
            .ok_or_else(|| CfsError::NotFound(String::from_utf8_lossy(name).into_owned()))?;
        cfs_dir::remove(&self.store, &mut self.cache, parent, &source)?;

        let now = cfs_inode::now_timestamp();
        cfs_inode::update_header(&self.store, source.ino, |h| h.ctime = now)?;
        self.touch_dir(parent)?;
        if new_parent != parent {
            self.touch_dir(new_parent)?;
        }
        debug!(
            parent = parent.0,
            new_parent = new_parent.0,
            node = source.ino.0,
            "renamed entry"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfs_block::MemoryByteDevice;
    use cfs_types::S_IFREG;

    fn engine_with_blocks(blocks: u32) -> Engine<MemoryByteDevice> {
        let mut engine =
            Engine::new(MemoryByteDevice::with_blocks(blocks)).expect("engine");
        mkfs::format_volume(engine.store(), 0, 0).expect("format");
        engine.initialize().expect("initialize");
        engine
    }

    #[test]
    fn initialize_reads_root_from_superblock() {
        let engine = engine_with_blocks(16);
        assert_eq!(engine.root_block_number(), BlockNumber(1));
    }

    #[test]
    fn root_attributes_are_an_empty_directory() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let attr = engine.get_attributes(root).expect("attr");
        assert_eq!(attr.kind, FileKind::Directory);
        assert_eq!(attr.ino, root);
        assert_eq!(attr.size, 0);
        assert_eq!(attr.blocks, 1);
        assert_eq!(attr.links, 1);
    }

    #[test]
    fn open_rejects_non_inode_blocks() {
        let mut engine = engine_with_blocks(16);
        // Block 2 sits on the free stack.
        let err = engine.open(BlockNumber(2)).unwrap_err();
        assert!(matches!(err, CfsError::Corruption { block: 2, .. }));
        engine.open(engine.root_block_number()).expect("root opens");
    }

    #[test]
    fn make_node_and_lookup() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let file = engine
            .make_node(root, b"a.txt", 0o644, 0, 1000, 1000)
            .expect("mknod");

        assert_eq!(engine.lookup(root, b"a.txt").expect("lookup"), file);
        let attr = engine.get_attributes(file).expect("attr");
        assert_eq!(attr.kind, FileKind::Regular);
        assert_eq!(attr.mode & !S_IFMT, 0o644);
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn duplicate_create_is_exists() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        engine
            .make_node(root, b"a", 0o644, 0, 0, 0)
            .expect("mknod");
        let err = engine.make_node(root, b"a", 0o644, 0, 0, 0).unwrap_err();
        assert!(matches!(err, CfsError::Exists));
        let err = engine.make_directory(root, b"a", 0o755, 0, 0).unwrap_err();
        assert!(matches!(err, CfsError::Exists));
    }

    #[test]
    fn failed_create_consumes_no_space() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        engine.make_node(root, b"a", 0o644, 0, 0, 0).expect("mknod");

        // The duplicate check runs before the allocation, so the free head
        // must be identical across the failing create.
        let free_before = engine
            .cache
            .get_next(&engine.store, BlockNumber::SUPERBLOCK)
            .expect("head");
        let _ = engine.make_node(root, b"a", 0o644, 0, 0, 0).unwrap_err();
        let free_after = engine
            .cache
            .get_next(&engine.store, BlockNumber::SUPERBLOCK)
            .expect("head");
        assert_eq!(free_before, free_after);
    }

    #[test]
    fn set_mode_preserves_type_bits() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let file = engine
            .make_node(root, b"f", 0o644, 0, 0, 0)
            .expect("mknod");

        engine.set_mode(file, 0o600).expect("chmod");
        let attr = engine.get_attributes(file).expect("attr");
        assert_eq!(attr.mode, S_IFREG | 0o600);
        assert_eq!(attr.kind, FileKind::Regular);
    }

    #[test]
    fn set_owner_and_times() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let file = engine
            .make_node(root, b"f", 0o644, 0, 0, 0)
            .expect("mknod");

        engine.set_owner(file, 42, 43).expect("chown");
        engine
            .set_times(file, (111, 1), (222, 2))
            .expect("utimens");

        let attr = engine.get_attributes(file).expect("attr");
        assert_eq!((attr.uid, attr.gid), (42, 43));
        assert_eq!(attr.atime, (111, 1));
        assert_eq!(attr.mtime, (222, 2));
    }

    #[test]
    fn directory_checks_on_wrong_kinds() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let file = engine
            .make_node(root, b"f", 0o644, 0, 0, 0)
            .expect("mknod");

        assert!(matches!(
            engine.list_directory(file, &mut |_, _| {}).unwrap_err(),
            CfsError::NotDirectory
        ));
        assert!(matches!(
            engine.make_node(file, b"x", 0o644, 0, 0, 0).unwrap_err(),
            CfsError::NotDirectory
        ));
        assert!(matches!(
            engine.read(root, 0, &mut [0_u8; 4]).unwrap_err(),
            CfsError::IsDirectory
        ));
        assert!(matches!(
            engine.write(root, 0, b"x").unwrap_err(),
            CfsError::IsDirectory
        ));
        assert!(matches!(
            engine.set_size(root, 0).unwrap_err(),
            CfsError::IsDirectory
        ));
    }

    #[test]
    fn symlink_round_trip() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let link = engine
            .make_symlink(root, b"ln", b"../target/path", 0, 0)
            .expect("symlink");

        let attr = engine.get_attributes(link).expect("attr");
        assert_eq!(attr.kind, FileKind::Symlink);
        assert_eq!(attr.size, 14);
        assert_eq!(engine.read_link(link).expect("readlink"), b"../target/path");

        let file = engine
            .make_node(root, b"f", 0o644, 0, 0, 0)
            .expect("mknod");
        assert!(matches!(
            engine.read_link(file).unwrap_err(),
            CfsError::NotSymlink
        ));
    }

    #[test]
    fn hard_link_shares_the_inode() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let file = engine
            .make_node(root, b"orig", 0o644, 0, 0, 0)
            .expect("mknod");
        engine
            .make_hard_link(root, b"alias", file)
            .expect("link");

        assert_eq!(engine.lookup(root, b"alias").expect("lookup"), file);
        assert_eq!(engine.get_attributes(file).expect("attr").links, 2);

        engine.write(file, 0, b"shared").expect("write");
        let alias = engine.lookup(root, b"alias").expect("lookup");
        let mut buf = [0_u8; 6];
        engine.read(alias, 0, &mut buf).expect("read");
        assert_eq!(&buf, b"shared");

        // Removing one name keeps the entity alive under the other.
        engine.remove_entry(root, b"orig").expect("unlink");
        assert_eq!(engine.get_attributes(file).expect("attr").links, 1);
        assert_eq!(engine.lookup(root, b"alias").expect("lookup"), file);
    }

    #[test]
    fn hard_link_to_directory_is_rejected() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let dir = engine
            .make_directory(root, b"d", 0o755, 0, 0)
            .expect("mkdir");
        let err = engine.make_hard_link(root, b"d2", dir).unwrap_err();
        assert!(matches!(err, CfsError::IsDirectory));
    }

    #[test]
    fn remove_entry_rejects_directories() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        engine
            .make_directory(root, b"d", 0o755, 0, 0)
            .expect("mkdir");
        let err = engine.remove_entry(root, b"d").unwrap_err();
        assert!(matches!(err, CfsError::IsDirectory));
    }

    #[test]
    fn remove_directory_requires_empty() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let dir = engine
            .make_directory(root, b"d", 0o755, 0, 0)
            .expect("mkdir");
        engine
            .make_node(dir, b"child", 0o644, 0, 0, 0)
            .expect("mknod");

        let err = engine.remove_directory(root, b"d").unwrap_err();
        assert!(matches!(err, CfsError::NotEmpty));

        engine.remove_entry(dir, b"child").expect("unlink");
        engine.remove_directory(root, b"d").expect("rmdir");
        assert!(matches!(
            engine.lookup(root, b"d").unwrap_err(),
            CfsError::NotFound(_)
        ));
    }

    #[test]
    fn remove_directory_on_file_is_not_directory() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        engine
            .make_node(root, b"f", 0o644, 0, 0, 0)
            .expect("mknod");
        let err = engine.remove_directory(root, b"f").unwrap_err();
        assert!(matches!(err, CfsError::NotDirectory));
    }

    #[test]
    fn rename_within_a_directory() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let file = engine
            .make_node(root, b"old", 0o644, 0, 0, 0)
            .expect("mknod");
        engine.write(file, 0, b"payload").expect("write");

        engine
            .rename_entry(root, b"old", root, b"new")
            .expect("rename");

        assert!(matches!(
            engine.lookup(root, b"old").unwrap_err(),
            CfsError::NotFound(_)
        ));
        assert_eq!(engine.lookup(root, b"new").expect("lookup"), file);

        let mut buf = [0_u8; 7];
        engine.read(file, 0, &mut buf).expect("read");
        assert_eq!(&buf, b"payload");
        // Directory size reflects exactly the one surviving entry.
        let attr = engine.get_attributes(root).expect("attr");
        assert_eq!(attr.size, (b"new".len() + 6) as u64);
    }

    #[test]
    fn rename_across_directories() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let src_dir = engine
            .make_directory(root, b"src", 0o755, 0, 0)
            .expect("mkdir");
        let dst_dir = engine
            .make_directory(root, b"dst", 0o755, 0, 0)
            .expect("mkdir");
        let file = engine
            .make_node(src_dir, b"f", 0o644, 0, 0, 0)
            .expect("mknod");

        engine
            .rename_entry(src_dir, b"f", dst_dir, b"g")
            .expect("rename");

        assert!(matches!(
            engine.lookup(src_dir, b"f").unwrap_err(),
            CfsError::NotFound(_)
        ));
        assert_eq!(engine.lookup(dst_dir, b"g").expect("lookup"), file);
        assert_eq!(engine.get_attributes(src_dir).expect("attr").size, 0);
    }

    #[test]
    fn rename_replaces_an_existing_file() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let keep = engine
            .make_node(root, b"keep", 0o644, 0, 0, 0)
            .expect("mknod");
        let gone = engine
            .make_node(root, b"gone", 0o644, 0, 0, 0)
            .expect("mknod");

        engine
            .rename_entry(root, b"keep", root, b"gone")
            .expect("rename");

        assert_eq!(engine.lookup(root, b"gone").expect("lookup"), keep);
        // The displaced entity was reclaimed: its block no longer decodes
        // as an inode.
        let err = engine.get_attributes(gone).unwrap_err();
        assert!(matches!(err, CfsError::Corruption { .. }));
    }

    #[test]
    fn rename_onto_non_empty_directory_fails() {
        let mut engine = engine_with_blocks(32);
        let root = engine.root_block_number();
        engine
            .make_directory(root, b"a", 0o755, 0, 0)
            .expect("mkdir");
        let b = engine
            .make_directory(root, b"b", 0o755, 0, 0)
            .expect("mkdir");
        engine
            .make_node(b, b"child", 0o644, 0, 0, 0)
            .expect("mknod");

        let err = engine.rename_entry(root, b"a", root, b"b").unwrap_err();
        assert!(matches!(err, CfsError::NotEmpty));

        engine.remove_entry(b, b"child").expect("unlink");
        engine
            .rename_entry(root, b"a", root, b"b")
            .expect("rename over empty dir");
    }

    #[test]
    fn rename_to_same_name_is_a_no_op() {
        let mut engine = engine_with_blocks(16);
        let root = engine.root_block_number();
        let file = engine
            .make_node(root, b"f", 0o644, 0, 0, 0)
            .expect("mknod");
        engine.rename_entry(root, b"f", root, b"f").expect("rename");
        assert_eq!(engine.lookup(root, b"f").expect("lookup"), file);
    }
}
