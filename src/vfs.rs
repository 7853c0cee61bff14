//! The VFS object layer: superblock, operation vtable, and the type
//! registry a concrete file system registers itself under.
//!
//! Every polymorphism in the core is dispatched through [`FsOps`], a
//! Rust trait standing in for the classic operation-table record of
//! function pointers: a capability interface whose required methods are
//! the vtable itself.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use arrayvec::ArrayVec;

use crate::error::VfsResult;
use crate::inode::{InodeInner, InodeType};
use crate::path::FileName;

/// Maximum number of sub-mounts under one superblock.
pub const MAXMNT: usize = 8;

/// An in-flight atomic group of block writes, mirroring xv6's `begin_op`/
/// `end_op` bracket. Dropping the guard is the `end_op` call; the log
/// itself (crash-recovery grouping) is out of this crate's scope, so this
/// guard's only job is to require callers that can free disk blocks
/// (`Itable::put`) to be inside one.
pub struct FsTransaction<'s> {
    sb: &'s SuperBlock,
}

impl<'s> FsTransaction<'s> {
    pub(crate) fn new(sb: &'s SuperBlock) -> Self {
        sb.log_depth.fetch_add(1, Ordering::AcqRel);
        Self { sb }
    }
}

impl Drop for FsTransaction<'_> {
    fn drop(&mut self) {
        self.sb.log_depth.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The per-file-system operation vtable.
///
/// A concrete file system supplies the disk-format-specific primitives;
/// the syscall-facing `create`/`link`/`unlink`/`open`/`close` operations
/// are built in terms of the primitives below — `dirlookup`/`isdirempty`/
/// directory writes/inode alloc. This crate registers exactly one
/// implementor, [`crate::xv6fs::Xv6Fs`]; multi-device concurrent mounting
/// is not exercised, but nothing here assumes there is only one.
pub trait FsOps: Send + Sync {
    /// Reads and validates the on-disk superblock for `dev` (xv6fs) or
    /// otherwise prepares the backing store. Panics on a bad magic number,
    /// an invariant violation rather than a recoverable error.
    fn init(&self, dev: u32) -> VfsResult<()>;

    /// The root directory's on-disk inode number for this file-system type.
    fn root_inum(&self) -> u32;

    /// Allocates a fresh on-disk inode of type `typ`, returning its number.
    fn alloc_inode(&self, dev: u32, typ: InodeType, tx: &FsTransaction<'_>) -> VfsResult<u32>;

    /// Loads `(dev, inum)`'s on-disk inode into an in-memory [`InodeInner`].
    /// Invoked the first time an inode is locked.
    fn update_lock(&self, dev: u32, inum: u32) -> VfsResult<InodeInner>;

    /// Writes a modified in-memory inode back to disk (`iupdate`).
    fn write_inode(&self, dev: u32, inum: u32, inner: &InodeInner, tx: &FsTransaction<'_>) -> VfsResult<()>;

    /// Releases any in-memory FS-private state for `(dev, inum)`. This
    /// crate keeps no such state outside `InodeInner` itself, so the
    /// default implementation is a no-op; it exists so a future FS with
    /// real private state has somewhere to hook in.
    fn release_inode(&self, _dev: u32, _inum: u32) {}

    /// Marks `(dev, inum)` free on disk.
    fn free_inode(&self, dev: u32, inum: u32, tx: &FsTransaction<'_>) -> VfsResult<()>;

    /// Frees every data block reachable from `inner` and zeroes its size.
    fn trunc(&self, dev: u32, inner: &mut InodeInner, tx: &FsTransaction<'_>) -> VfsResult<()>;

    /// Reads up to `buf.len()` bytes starting at `off`, returning the
    /// number of bytes actually delivered.
    fn read(&self, dev: u32, inner: &InodeInner, off: u32, buf: &mut [u8]) -> VfsResult<usize>;

    /// Writes `buf` at `off`, growing `inner.size` if needed. Returns the
    /// number of bytes actually written.
    fn write(
        &self,
        dev: u32,
        inner: &mut InodeInner,
        off: u32,
        buf: &[u8],
        tx: &FsTransaction<'_>,
    ) -> VfsResult<usize>;

    /// Scans directory `dir`'s contents for `name`, returning
    /// `(inum, byte offset of the entry)` on a match.
    fn dirlookup(&self, dev: u32, dir: &InodeInner, name: &FileName) -> VfsResult<(u32, u32)>;

    /// Writes a new `(name, inum)` entry into directory `dir`. Fails if
    /// `name` already exists.
    fn dirlink(
        &self,
        dev: u32,
        dir: &mut InodeInner,
        name: &FileName,
        inum: u32,
        tx: &FsTransaction<'_>,
    ) -> VfsResult<()>;

    /// Zeroes every entry named `name` in directory `dir`.
    fn dirunlink(&self, dev: u32, dir: &mut InodeInner, name: &FileName, tx: &FsTransaction<'_>) -> VfsResult<()>;

    /// True iff `dir` contains only `.` and `..`.
    fn isdirempty(&self, dev: u32, dir: &InodeInner) -> bool;
}

/// A mounted file system.
pub struct SuperBlock {
    pub ops: Arc<dyn FsOps>,
    pub dev: u32,
    /// Null at the root superblock.
    pub parent: Option<Arc<SuperBlock>>,
    /// Bounded child-mount list; unused until multi-mount is supported,
    /// but part of the data model regardless.
    pub children: Mutex<ArrayVec<Arc<SuperBlock>, MAXMNT>>,
    pub device_path: String,
    log_depth: AtomicU32,
}

impl SuperBlock {
    pub fn new_root(ops: Arc<dyn FsOps>, dev: u32, device_path: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            ops,
            dev,
            parent: None,
            children: Mutex::new(ArrayVec::new()),
            device_path: device_path.into(),
            log_depth: AtomicU32::new(0),
        })
    }

    /// Called for each FS syscall that may write to disk.
    pub fn begin_transaction(&self) -> FsTransaction<'_> {
        FsTransaction::new(self)
    }

    /// True while at least one `FsTransaction` for this superblock is
    /// live; `Itable::put` asserts this before it may free disk blocks.
    pub(crate) fn in_transaction(&self) -> bool {
        self.log_depth.load(Ordering::Acquire) > 0
    }
}

/// Registry mapping a type name (e.g. `"xv6fs"`) to a vtable.
#[derive(Default)]
pub struct FilesystemTypeRegistry {
    types: Mutex<Vec<(&'static str, Arc<dyn FsOps>)>>,
}

impl FilesystemTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &'static str, ops: Arc<dyn FsOps>) {
        self.types.lock().unwrap().push((name, ops));
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn FsOps>> {
        self.types
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, ops)| ops.clone())
    }

    /// Registers `name`, calls `ops.init(dev)`, and returns the mounted
    /// root superblock.
    pub fn mount(
        &self,
        name: &'static str,
        ops: Arc<dyn FsOps>,
        dev: u32,
        device_path: impl Into<String>,
    ) -> VfsResult<Arc<SuperBlock>> {
        ops.init(dev)?;
        self.register(name, ops.clone());
        Ok(SuperBlock::new_root(ops, dev, device_path))
    }
}
