//! The file-descriptor layer: an open file as `read`/`write`/`stat` see
//! it, dispatching to an inode, a device, or a pipe.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{VfsError, VfsResult};
use crate::inode::{Inode, InodeType, Itable};
use crate::param::{NDEV, NFILE};
use crate::pipe::Pipe;
use crate::stat::Stat;
use crate::vfs::SuperBlock;

/// A device's read/write entry points, indexed by major number. Device 0
/// is reserved and always absent, matching xv6's convention that major
/// number 0 never names a real device.
pub trait DeviceOps: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> VfsResult<usize>;
    fn write(&self, buf: &[u8]) -> VfsResult<usize>;
}

/// The fixed-size major-number-indexed device table.
pub struct DeviceSwitch {
    devices: [Option<Arc<dyn DeviceOps>>; NDEV],
}

impl DeviceSwitch {
    pub fn new() -> Self {
        Self { devices: Default::default() }
    }

    pub fn register(&mut self, major: u16, ops: Arc<dyn DeviceOps>) {
        assert_ne!(major, 0, "major number 0 is reserved");
        self.devices[major as usize] = Some(ops);
    }

    pub fn get(&self, major: u16) -> VfsResult<Arc<dyn DeviceOps>> {
        self.devices
            .get(major as usize)
            .and_then(|d| d.clone())
            .ok_or(VfsError::InvalidArgument)
    }
}

impl Default for DeviceSwitch {
    fn default() -> Self {
        Self::new()
    }
}

enum Kind {
    Inode { ip: Arc<Inode>, sb: Arc<SuperBlock>, itable: Arc<Itable> },
    Device { ip: Arc<Inode>, major: u16, devsw: Arc<DeviceSwitch>, sb: Arc<SuperBlock>, itable: Arc<Itable> },
    Pipe { pipe: Arc<Pipe>, writable_end: bool },
}

/// An open file: shared between every descriptor/dup pointing at the same
/// open instance, each contributing to `readable`/`writable` and a shared
/// byte offset for inode-backed files.
pub struct File {
    kind: Kind,
    readable: bool,
    writable: bool,
    offset: AtomicU32,
}

impl File {
    /// Wraps an inode reference already `idup`-ed for this file; dropping
    /// the returned `File` releases it via `itable`.
    pub fn new_inode(ip: Arc<Inode>, sb: Arc<SuperBlock>, itable: Arc<Itable>, readable: bool, writable: bool) -> Self {
        Self {
            kind: Kind::Inode { ip, sb, itable },
            readable,
            writable,
            offset: AtomicU32::new(0),
        }
    }

    pub fn new_device(
        ip: Arc<Inode>,
        major: u16,
        devsw: Arc<DeviceSwitch>,
        itable: Arc<Itable>,
        sb: Arc<SuperBlock>,
        readable: bool,
        writable: bool,
    ) -> Self {
        Self {
            kind: Kind::Device { ip, major, devsw, sb, itable },
            readable,
            writable,
            offset: AtomicU32::new(0),
        }
    }

    pub fn new_pipe(pipe: Arc<Pipe>, writable_end: bool) -> Self {
        Self {
            readable: !writable_end,
            writable: writable_end,
            kind: Kind::Pipe { pipe, writable_end },
            offset: AtomicU32::new(0),
        }
    }

    /// Reads into `buf`, advancing this file's shared offset for
    /// inode-backed files.
    pub fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        if !self.readable {
            return Err(VfsError::PermissionDenied);
        }
        match &self.kind {
            Kind::Inode { ip, .. } => {
                let guard = ip.lock()?;
                let off = self.offset.load(Ordering::Acquire);
                let n = guard.read(off, buf)?;
                self.offset.fetch_add(n as u32, Ordering::AcqRel);
                Ok(n)
            }
            Kind::Device { major, devsw, .. } => devsw.get(*major)?.read(buf),
            Kind::Pipe { pipe, .. } => pipe.read(buf),
        }
    }

    /// Writes `buf`, splitting into chunks no larger than
    /// [`crate::param::MAXOPBLOCKS`] blocks' worth of data so each chunk
    /// fits in one transaction.
    pub fn write(&self, buf: &[u8]) -> VfsResult<usize> {
        if !self.writable {
            return Err(VfsError::PermissionDenied);
        }
        match &self.kind {
            Kind::Inode { ip, sb, .. } => {
                let max = (crate::param::MAXOPBLOCKS - 1) * crate::param::BSIZE / 2;
                let mut done = 0;
                while done < buf.len() {
                    let take = (buf.len() - done).min(max.max(1));
                    let tx = sb.begin_transaction();
                    let mut guard = ip.lock()?;
                    let off = self.offset.load(Ordering::Acquire);
                    let n = guard.write(off, &buf[done..done + take], &tx)?;
                    guard.update(&tx)?;
                    drop(guard);
                    self.offset.fetch_add(n as u32, Ordering::AcqRel);
                    done += n;
                    if n < take {
                        return Err(VfsError::ShortWrite);
                    }
                }
                Ok(done)
            }
            Kind::Device { major, devsw, .. } => devsw.get(*major)?.write(buf),
            Kind::Pipe { pipe, .. } => pipe.write(buf),
        }
    }

    pub fn stat(&self) -> VfsResult<Stat> {
        match &self.kind {
            Kind::Inode { ip, .. } => Ok(ip.lock()?.stat()),
            Kind::Device { ip, .. } => Ok(ip.lock()?.stat()),
            Kind::Pipe { .. } => Err(VfsError::InvalidArgument),
        }
    }

    pub fn is_dir(&self) -> bool {
        match &self.kind {
            Kind::Inode { ip, .. } => ip.lock().map(|g| g.inner().typ == InodeType::Dir).unwrap_or(false),
            _ => false,
        }
    }
}

impl Drop for File {
    /// Releases whatever this file held. For a pipe end this closes it
    /// outright; for an inode or device, this is `fileclose`'s job in
    /// spec terms: release the logical reference `open` took via
    /// `itable.dup`, inside a fresh transaction since the last reference
    /// going away may free the inode's disk blocks.
    fn drop(&mut self) {
        match &self.kind {
            Kind::Pipe { pipe, writable_end } => {
                if *writable_end {
                    pipe.close_write();
                } else {
                    pipe.close_read();
                }
            }
            Kind::Inode { ip, sb, itable } | Kind::Device { ip, sb, itable, .. } => {
                let _tx = sb.begin_transaction();
                if let Err(e) = itable.put(ip.clone()) {
                    log::error!("file: failed to release inode dev {} inum {} on close: {}", ip.dev, ip.inum, e);
                }
            }
        }
    }
}

/// Fixed-capacity system-wide open file table.
pub struct Ftable {
    slots: std::sync::Mutex<Vec<Option<Arc<File>>>>,
}

impl Ftable {
    pub fn new() -> Self {
        Self { slots: std::sync::Mutex::new((0..NFILE).map(|_| None).collect()) }
    }

    /// Installs `file` into a free slot, returning a shared handle.
    pub fn alloc(&self, file: File) -> VfsResult<Arc<File>> {
        let mut slots = self.slots.lock().unwrap();
        let idx = slots.iter().position(Option::is_none).ok_or(VfsError::FileTableFull)?;
        let arc = Arc::new(file);
        slots[idx] = Some(arc.clone());
        Ok(arc)
    }

    /// Adds a reference to an already-open file; since [`File`] is always
    /// held behind `Arc`, this is `Arc::clone`.
    pub fn dup(file: &Arc<File>) -> Arc<File> {
        file.clone()
    }
}

impl Default for Ftable {
    fn default() -> Self {
        Self::new()
    }
}
