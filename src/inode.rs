//! The in-memory inode table: cached inodes, their two-phase lock
//! discipline (allocated vs. locked-and-valid), and lifetime management.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arrayvec::ArrayVec;

use crate::error::{VfsError, VfsResult};
use crate::lock::{Sleeplock, SleeplockGuard, Spinlock};
use crate::param::NINODE;
use crate::stat::Stat;
use crate::vfs::{FsTransaction, SuperBlock};
use crate::xv6fs::NDIRECT;

/// A file's type, as recorded in both the on-disk inode and the in-memory
/// copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InodeType {
    Free,
    File,
    Dir,
    Device,
}

/// The part of an inode that is only meaningful once loaded from disk,
/// protected by the owning [`Inode`]'s sleep-lock.
#[derive(Clone, Copy)]
pub struct InodeInner {
    pub valid: bool,
    pub typ: InodeType,
    pub nlink: i16,
    pub size: u32,
    /// Direct block numbers, plus one singly-indirect block number.
    pub addrs: [u32; NDIRECT + 1],
    /// Device major/minor, meaningful only when `typ == InodeType::Device`.
    pub major: u16,
    pub minor: u16,
}

impl InodeInner {
    fn empty() -> Self {
        Self {
            valid: false,
            typ: InodeType::Free,
            nlink: 0,
            size: 0,
            addrs: [0; NDIRECT + 1],
            major: 0,
            minor: 0,
        }
    }
}

/// A cached inode: the VFS-visible identity (`dev`, `inum`) and open count,
/// plus the lazily-loaded [`InodeInner`] behind a sleep-lock.
pub struct Inode {
    pub sb: Arc<SuperBlock>,
    pub dev: u32,
    pub inum: u32,
    refcount: AtomicU32,
    inner: Sleeplock<InodeInner>,
}

impl Inode {
    /// Acquires the per-inode sleep-lock, loading its contents from disk
    /// via the owning file system's vtable on first lock.
    pub fn lock(&self) -> VfsResult<InodeGuard<'_>> {
        let mut guard = self.inner.lock();
        if !guard.valid {
            let loaded = self.sb.ops.update_lock(self.dev, self.inum)?;
            *guard = loaded;
            guard.valid = true;
            if guard.typ == InodeType::Free {
                return Err(VfsError::NotFound);
            }
        }
        Ok(InodeGuard { ip: self, guard })
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }
}

/// A held sleep-lock on an [`Inode`], giving exclusive access to its
/// [`InodeInner`].
pub struct InodeGuard<'a> {
    pub ip: &'a Inode,
    guard: SleeplockGuard<'a, InodeInner>,
}

impl<'a> InodeGuard<'a> {
    pub fn inner(&self) -> &InodeInner {
        &self.guard
    }

    pub fn inner_mut(&mut self) -> &mut InodeInner {
        &mut self.guard
    }

    /// Flushes the in-memory inode back to disk; call whenever a field
    /// the on-disk inode mirrors changes.
    pub fn update(&self, tx: &FsTransaction<'_>) -> VfsResult<()> {
        self.ip.sb.ops.write_inode(self.ip.dev, self.ip.inum, &self.guard, tx)
    }

    /// Returns the `stat(2)`-shaped view of this inode.
    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.ip.dev as i32,
            ino: self.ip.inum,
            typ: match self.guard.typ {
                InodeType::Dir => crate::stat::T_DIR,
                InodeType::File => crate::stat::T_FILE,
                InodeType::Device => crate::stat::T_DEVICE,
                InodeType::Free => 0,
            },
            nlink: self.guard.nlink,
            size: self.guard.size as usize,
        }
    }

    /// Frees every data block owned by this inode and resets its size to
    /// zero.
    pub fn truncate(&mut self, tx: &FsTransaction<'_>) -> VfsResult<()> {
        self.ip.sb.ops.trunc(self.ip.dev, &mut self.guard, tx)
    }

    pub fn read(&self, off: u32, buf: &mut [u8]) -> VfsResult<usize> {
        self.ip.sb.ops.read(self.ip.dev, &self.guard, off, buf)
    }

    pub fn write(&mut self, off: u32, buf: &[u8], tx: &FsTransaction<'_>) -> VfsResult<usize> {
        self.ip.sb.ops.write(self.ip.dev, &mut self.guard, off, buf, tx)
    }
}

struct Slot {
    dev: u32,
    inum: u32,
    occupied: bool,
    ip: Option<Arc<Inode>>,
}

/// The fixed-capacity cache of in-memory inodes. One [`Inode`] exists per
/// distinct `(dev, inum)` resident in the table; `idup`/`iget` share it
/// rather than creating a second copy, which is what makes a lock on the
/// `Inode` a lock on the file.
///
/// A branded-lifetime arena with pinned, generation-counted slots can get
/// the same fixed-capacity, no-second-copy sharing without any reference
/// counting at all; this table takes the simpler route of a plain
/// `Spinlock`-guarded slot array plus `Arc`, at the cost of an extra word
/// of refcounting per inode.
pub struct Itable {
    sb: Arc<SuperBlock>,
    slots: Spinlock<ArrayVec<Slot, NINODE>>,
}

impl Itable {
    pub fn new(sb: Arc<SuperBlock>) -> Self {
        let mut slots = ArrayVec::new();
        for _ in 0..NINODE {
            slots.push(Slot {
                dev: 0,
                inum: 0,
                occupied: false,
                ip: None,
            });
        }
        Self {
            sb,
            slots: Spinlock::new(slots),
        }
    }

    /// Finds `(dev, inum)` in the table, or claims a free slot for it.
    /// Does not touch disk; the returned inode is unlocked and may still
    /// need `lock()` to populate its contents.
    pub fn get(&self, dev: u32, inum: u32) -> VfsResult<Arc<Inode>> {
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.iter().find(|s| s.occupied && s.dev == dev && s.inum == inum) {
            let ip = slot.ip.as_ref().unwrap();
            ip.refcount.fetch_add(1, Ordering::AcqRel);
            return Ok(ip.clone());
        }

        let free = slots
            .iter_mut()
            .find(|s| !s.occupied || s.ip.as_ref().map_or(true, |ip| ip.refcount() == 0))
            .ok_or_else(|| {
                log::error!("itable: all {} slots in use, cannot cache dev {} inum {}", NINODE, dev, inum);
                VfsError::InodeTableFull
            })?;

        let ip = Arc::new(Inode {
            sb: self.sb.clone(),
            dev,
            inum,
            refcount: AtomicU32::new(1),
            inner: Sleeplock::new(InodeInner::empty()),
        });
        free.dev = dev;
        free.inum = inum;
        free.occupied = true;
        free.ip = Some(ip.clone());
        Ok(ip)
    }

    /// Allocates a new on-disk inode of type `typ` and returns its cached,
    /// unlocked in-memory handle.
    pub fn alloc(&self, typ: InodeType, tx: &FsTransaction<'_>) -> VfsResult<Arc<Inode>> {
        let inum = self.sb.ops.alloc_inode(self.sb.dev, typ, tx)?;
        self.get(self.sb.dev, inum)
    }

    /// Adds one reference to an already-resident inode; used when a second
    /// owner (e.g. a new file descriptor) starts pointing at an inode
    /// already held elsewhere.
    pub fn dup(&self, ip: &Arc<Inode>) -> Arc<Inode> {
        ip.refcount.fetch_add(1, Ordering::AcqRel);
        ip.clone()
    }

    /// Drops one reference to `ip`. If this was the last reference and the
    /// file has no remaining directory links, the inode is truncated and
    /// freed on disk.
    ///
    /// Must be called with a transaction open when the drop may free disk
    /// blocks; this is asserted, not returned as an error, because it is a
    /// caller bug, not a runtime condition.
    pub fn put(&self, ip: Arc<Inode>) -> VfsResult<()> {
        if ip.refcount.load(Ordering::Acquire) == 1 {
            let mut guard = ip.lock()?;
            if guard.inner().valid && guard.inner().nlink == 0 {
                assert!(
                    ip.sb.in_transaction(),
                    "freeing an inode's blocks requires an open transaction"
                );
                let tx = ip.sb.begin_transaction();
                guard.truncate(&tx)?;
                guard.inner_mut().typ = InodeType::Free;
                guard.update(&tx)?;
                ip.sb.ops.free_inode(ip.dev, ip.inum, &tx)?;
                guard.inner_mut().valid = false;
            }
            drop(guard);
        }

        if ip.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.iter_mut().find(|s| s.occupied && s.dev == ip.dev && s.inum == ip.inum) {
                if slot.ip.as_ref().map_or(false, |cached| Arc::ptr_eq(cached, &ip)) {
                    ip.sb.ops.release_inode(ip.dev, ip.inum);
                    slot.occupied = false;
                    slot.ip = None;
                }
            }
        }
        Ok(())
    }

    /// Unlocks `guard` and immediately calls [`Itable::put`] on the inode
    /// it guarded; a very common pairing.
    pub fn unlock_put(&self, guard: InodeGuard<'_>, ip: Arc<Inode>) -> VfsResult<()> {
        drop(guard);
        self.put(ip)
    }

    pub fn root(&self) -> VfsResult<Arc<Inode>> {
        self.get(self.sb.dev, self.sb.ops.root_inum())
    }
}
