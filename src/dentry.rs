//! A small name-lookup cache sitting in front of the directory scans that
//! [`crate::vfs::FsOps::dirlookup`] performs.
//!
//! xv6 itself re-scans a directory's entries on every lookup; this module
//! adds a fixed-capacity pool of `(parent, name) -> inode`, each slot
//! independently claimable and freeable, with no ordering guarantees
//! beyond "recently placed entries tend to survive a scan for a free
//! slot" (a FIFO approximation of LRU, not a real one). Unlike a plain
//! `inum` cache, a filled slot holds an actual logical reference on the
//! target inode (taken via [`Itable::dup`]) for as long as the slot stays
//! occupied, so a cache hit hands the caller a reference acquired from the
//! file system exactly as a fresh `dirlookup` + `iget` would — the caller
//! still owns it and must eventually `put` it.

use std::iter::FromIterator;
use std::sync::Arc;

use arrayvec::ArrayVec;

use crate::inode::{Inode, Itable};
use crate::lock::Spinlock;
use crate::param::NDENTRY;
use crate::xv6fs::DIRSIZ;

struct Dentry {
    dev: u32,
    parent_inum: u32,
    name: ArrayVec<u8, DIRSIZ>,
    ip: Option<Arc<Inode>>,
    used: bool,
}

impl Dentry {
    fn blank() -> Self {
        Self {
            dev: 0,
            parent_inum: 0,
            name: ArrayVec::new(),
            ip: None,
            used: false,
        }
    }

    fn matches(&self, dev: u32, parent_inum: u32, name: &[u8]) -> bool {
        self.used && self.dev == dev && self.parent_inum == parent_inum && self.name.as_slice() == name
    }
}

/// Bounded cache of `(dev, parent inode, name) -> inode` entries, each one
/// holding a logical reference on its target inode while occupied.
pub struct DentryCache {
    slots: Spinlock<ArrayVec<Dentry, NDENTRY>>,
}

impl DentryCache {
    pub fn new() -> Self {
        let mut slots = ArrayVec::new();
        for _ in 0..NDENTRY {
            slots.push(Dentry::blank());
        }
        Self { slots: Spinlock::new(slots) }
    }

    /// Looks up `(dev, parent_inum, name)` and, on a hit, returns a fresh
    /// reference to the cached inode (an `idup` on the slot's held
    /// reference) for the caller to eventually `put`.
    pub fn lookup(&self, itable: &Itable, dev: u32, parent_inum: u32, name: &[u8]) -> Option<Arc<Inode>> {
        let slots = self.slots.lock();
        slots
            .iter()
            .find(|d| d.matches(dev, parent_inum, name))
            .map(|d| itable.dup(d.ip.as_ref().expect("occupied dentry slot always holds an inode")))
    }

    /// Claims a free (or, failing that, the first occupied) slot, dupes
    /// `ip`'s reference into it, and returns the previous occupant's
    /// reference, if any, for the caller to release.
    ///
    /// Releasing the evicted reference (which may run `iput` down to a
    /// disk free) is the caller's job, not this method's: the cache's own
    /// spinlock must stay a short, non-sleeping critical section, and
    /// `Itable::put` can block and write to disk.
    fn dgetblank(&self, dev: u32, parent_inum: u32, name: &[u8], ip: &Arc<Inode>, itable: &Itable) -> Option<Arc<Inode>> {
        let mut slots = self.slots.lock();
        let idx = slots.iter().position(|d| !d.used).unwrap_or(0);
        let slot = &mut slots[idx];
        let evicted = slot.ip.take();
        slot.dev = dev;
        slot.parent_inum = parent_inum;
        slot.name = ArrayVec::from_iter(name.iter().copied());
        slot.ip = Some(itable.dup(ip));
        slot.used = true;
        evicted
    }

    /// Inserts `(dev, parent_inum, name) -> ip`, taking its own reference
    /// on `ip` via `itable.dup`. Called after a `dirlookup` hit, mirroring
    /// the invariant that a cached dentry carries a reference acquired
    /// from the file system.
    pub fn insert(&self, itable: &Itable, dev: u32, parent_inum: u32, name: &[u8], ip: &Arc<Inode>) {
        if name.len() > DIRSIZ {
            return;
        }
        if let Some(evicted) = self.dgetblank(dev, parent_inum, name, ip, itable) {
            let _ = itable.put(evicted);
        }
    }

    /// Drops any cached entry for `(dev, parent_inum, name)`, releasing
    /// the reference it held (`dfree`); called before `link`/`unlink`/
    /// `rename` change what a name resolves to.
    pub fn invalidate(&self, itable: &Itable, dev: u32, parent_inum: u32, name: &[u8]) {
        let freed = {
            let mut slots = self.slots.lock();
            slots.iter_mut().find(|d| d.matches(dev, parent_inum, name)).and_then(|slot| {
                slot.used = false;
                slot.ip.take()
            })
        };
        if let Some(ip) = freed {
            let _ = itable.put(ip);
        }
    }
}

impl Default for DentryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ROOTDEV;
    use crate::testutil::{mkfs, MemBlockDevice};
    use crate::vfs::FilesystemTypeRegistry;
    use crate::xv6fs::Xv6Fs;

    fn fixture() -> Itable {
        let disk = Arc::new(MemBlockDevice::new(64));
        mkfs(disk.as_ref(), ROOTDEV, 64, 20).unwrap();
        let ops = Arc::new(Xv6Fs::new(disk));
        let registry = FilesystemTypeRegistry::new();
        let sb = registry.mount("xv6fs", ops, ROOTDEV, "mem0").unwrap();
        Itable::new(sb)
    }

    #[test]
    fn insert_then_lookup_hits_and_dupes_a_reference() {
        let itable = fixture();
        let cache = DentryCache::new();
        let root = itable.root().unwrap();
        let before = root.refcount();

        cache.insert(&itable, root.dev, 999, b"foo", &root);
        assert_eq!(root.refcount(), before + 1, "insert must dup its own reference");

        let hit = cache.lookup(&itable, root.dev, 999, b"foo").unwrap();
        assert_eq!(hit.inum, root.inum);
        assert_eq!(root.refcount(), before + 2, "lookup hands the caller a fresh reference");
        itable.put(hit).unwrap();

        assert!(cache.lookup(&itable, root.dev, 999, b"bar").is_none());
        itable.put(root).unwrap();
    }

    #[test]
    fn invalidate_clears_entry_and_releases_its_reference() {
        let itable = fixture();
        let cache = DentryCache::new();
        let root = itable.root().unwrap();
        let before = root.refcount();

        cache.insert(&itable, root.dev, 999, b"foo", &root);
        assert_eq!(root.refcount(), before + 1);

        cache.invalidate(&itable, root.dev, 999, b"foo");
        assert_eq!(root.refcount(), before, "invalidate must release the held reference");
        assert!(cache.lookup(&itable, root.dev, 999, b"foo").is_none());

        itable.put(root).unwrap();
    }

    #[test]
    fn inserting_over_an_occupied_slot_releases_the_evicted_reference() {
        let itable = fixture();
        let cache = DentryCache::new();
        let root = itable.root().unwrap();

        // NDENTRY is small; fill every slot with the same target so the
        // next insert is guaranteed to evict rather than claim a blank one.
        for i in 0..NDENTRY {
            cache.insert(&itable, root.dev, i as u32, b"x", &root);
        }
        let before = root.refcount();
        cache.insert(&itable, root.dev, NDENTRY as u32, b"y", &root);
        assert_eq!(root.refcount(), before, "eviction must release exactly what the new insert added");

        itable.put(root).unwrap();
    }
}
