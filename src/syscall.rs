//! Syscall-facing argument marshalling: translates `open`/`read`/`write`/
//! `close`/`link`/`unlink`/`mkdir`/`mknod`/`chdir`/`pipe`-shaped calls
//! into the `(cwd, fd table)` + VFS operations below them.

use std::sync::Arc;

use crate::dentry::DentryCache;
use crate::error::{VfsError, VfsResult};
use crate::fcntl::OpenFlags;
use crate::file::{DeviceSwitch, File, Ftable};
use crate::inode::{Inode, InodeType, Itable};
use crate::path::Path;
use crate::pipe::Pipe;
use crate::process::ProcessContext;
use crate::stat::Stat;

/// The set of system-wide tables a `Vfs` instance bundles together; every
/// syscall below takes one of these plus the calling process's context.
pub struct Vfs {
    pub itable: Arc<Itable>,
    pub dentries: DentryCache,
    pub ftable: Ftable,
    pub devsw: Arc<DeviceSwitch>,
}

impl Vfs {
    pub fn new(itable: Itable, devsw: Arc<DeviceSwitch>) -> Self {
        Self {
            itable: Arc::new(itable),
            dentries: DentryCache::new(),
            ftable: Ftable::new(),
            devsw,
        }
    }

    fn namei(&self, proc: &dyn ProcessContext, path: &Path) -> VfsResult<Arc<Inode>> {
        crate::namex::namei(&self.itable, &self.dentries, proc.cwd(), path)
    }

    fn nameiparent<'p>(&self, proc: &dyn ProcessContext, path: &'p Path) -> VfsResult<(Arc<Inode>, &'p crate::path::FileName)> {
        crate::namex::nameiparent(&self.itable, &self.dentries, proc.cwd(), path)
    }

    /// Creates a new inode named by the final element of `path` (a file,
    /// directory, or device node), linking it into its parent directory
    /// and, for directories, wiring up `.`/`..`.
    pub fn create(
        &self,
        proc: &dyn ProcessContext,
        sb: &Arc<crate::vfs::SuperBlock>,
        path: &Path,
        typ: InodeType,
        major: u16,
        minor: u16,
    ) -> VfsResult<Arc<Inode>> {
        let (dp, name) = self.nameiparent(proc, path)?;

        let already_exists = {
            let guard = dp.lock()?;
            let r = sb.ops.dirlookup(dp.dev, guard.inner(), name);
            drop(guard);
            r.is_ok()
        };
        if already_exists {
            self.itable.put(dp)?;
            return Err(VfsError::Exists);
        }

        let tx = sb.begin_transaction();
        let ip = self.itable.alloc(typ, &tx)?;
        let mut guard = ip.lock()?;
        guard.inner_mut().nlink = 1;
        guard.inner_mut().major = major;
        guard.inner_mut().minor = minor;
        guard.update(&tx)?;

        if typ == InodeType::Dir {
            let mut dp_guard = dp.lock()?;
            let self_name = crate::path::FileName::from_bytes(b".");
            let parent_name = crate::path::FileName::from_bytes(b"..");
            if let Err(e) = sb
                .ops
                .dirlink(ip.dev, guard.inner_mut(), self_name, ip.inum, &tx)
                .and_then(|_| sb.ops.dirlink(ip.dev, guard.inner_mut(), parent_name, dp.inum, &tx))
            {
                guard.inner_mut().nlink = 0;
                drop(dp_guard);
                drop(guard);
                self.itable.put(ip)?;
                self.itable.put(dp)?;
                return Err(e);
            }
            dp_guard.inner_mut().nlink += 1;
            if let Err(e) = dp_guard.update(&tx) {
                guard.inner_mut().nlink = 0;
                drop(dp_guard);
                drop(guard);
                self.itable.put(ip)?;
                self.itable.put(dp)?;
                return Err(e);
            }
            drop(dp_guard);
        }

        let mut dp_guard = dp.lock()?;
        if let Err(e) = sb.ops.dirlink(dp.dev, dp_guard.inner_mut(), name, ip.inum, &tx) {
            if typ == InodeType::Dir {
                guard.inner_mut().nlink = 0;
            }
            drop(dp_guard);
            drop(guard);
            self.itable.put(ip)?;
            self.itable.put(dp)?;
            return Err(e);
        }
        self.dentries.invalidate(&self.itable, dp.dev, dp.inum, name.as_bytes());
        drop(dp_guard);
        drop(guard);
        self.itable.put(dp)?;
        Ok(ip)
    }

    /// Resolves or creates `path`'s inode and builds an open [`File`] for
    /// it.
    pub fn open(
        &self,
        proc: &dyn ProcessContext,
        sb: &Arc<crate::vfs::SuperBlock>,
        path: &Path,
        flags: OpenFlags,
    ) -> VfsResult<Arc<File>> {
        let ip = if flags.contains(OpenFlags::O_CREATE) {
            self.create(proc, sb, path, InodeType::File, 0, 0)?
        } else {
            self.namei(proc, path)?
        };

        let lock_target = ip.clone();
        let guard = lock_target.lock()?;
        if guard.inner().typ == InodeType::Dir && flags != OpenFlags::O_RDONLY {
            self.itable.unlock_put(guard, ip)?;
            return Err(VfsError::IsADirectory);
        }

        if flags.contains(OpenFlags::O_TRUNC) && guard.inner().typ == InodeType::File {
            let mut guard = guard;
            let tx = sb.begin_transaction();
            guard.truncate(&tx)?;
            guard.update(&tx)?;
            drop(guard);
        } else {
            drop(guard);
        }

        let guard = ip.lock()?;
        let held = self.itable.dup(&ip);
        let file = if guard.inner().typ == InodeType::Device {
            let major = guard.inner().major;
            drop(guard);
            File::new_device(held, major, self.devsw.clone(), self.itable.clone(), sb.clone(), flags.readable(), flags.writable())
        } else {
            drop(guard);
            File::new_inode(held, sb.clone(), self.itable.clone(), flags.readable(), flags.writable())
        };
        self.itable.put(ip)?;
        self.ftable.alloc(file)
    }

    pub fn read(&self, proc: &dyn ProcessContext, fd: i32, buf: &mut [u8]) -> VfsResult<usize> {
        proc.fd(fd)?.read(buf)
    }

    pub fn write(&self, proc: &dyn ProcessContext, fd: i32, buf: &[u8]) -> VfsResult<usize> {
        proc.fd(fd)?.write(buf)
    }

    pub fn close(&self, proc: &mut dyn ProcessContext, fd: i32) -> VfsResult<()> {
        proc.fd_take(fd)?;
        Ok(())
    }

    pub fn dup(&self, proc: &mut dyn ProcessContext, fd: i32) -> VfsResult<i32> {
        let file = proc.fd(fd)?;
        proc.fdalloc(Ftable::dup(&file))
    }

    pub fn fstat(&self, proc: &dyn ProcessContext, fd: i32) -> VfsResult<Stat> {
        proc.fd(fd)?.stat()
    }

    pub fn link(
        &self,
        proc: &dyn ProcessContext,
        sb: &Arc<crate::vfs::SuperBlock>,
        old: &Path,
        new: &Path,
    ) -> VfsResult<()> {
        let ip = self.namei(proc, old)?;
        let lock_target = ip.clone();
        let mut guard = lock_target.lock()?;
        if guard.inner().typ == InodeType::Dir {
            self.itable.unlock_put(guard, ip)?;
            return Err(VfsError::IsADirectory);
        }
        guard.inner_mut().nlink += 1;
        let tx = sb.begin_transaction();
        guard.update(&tx)?;
        drop(guard);

        let (dp, name) = match self.nameiparent(proc, new) {
            Ok(v) => v,
            Err(e) => {
                let mut guard = ip.lock()?;
                guard.inner_mut().nlink -= 1;
                guard.update(&tx)?;
                drop(guard);
                self.itable.put(ip)?;
                return Err(e);
            }
        };

        let mut dp_guard = dp.lock()?;
        let result = sb.ops.dirlink(dp.dev, dp_guard.inner_mut(), name, ip.inum, &tx);
        drop(dp_guard);
        self.itable.put(dp.clone())?;

        if let Err(e) = result {
            let mut guard = ip.lock()?;
            guard.inner_mut().nlink -= 1;
            guard.update(&tx)?;
            drop(guard);
            self.itable.put(ip)?;
            return Err(e);
        }
        self.dentries.invalidate(&self.itable, dp.dev, dp.inum, name.as_bytes());
        self.itable.put(ip)?;
        Ok(())
    }

    pub fn unlink(&self, proc: &dyn ProcessContext, sb: &Arc<crate::vfs::SuperBlock>, path: &Path) -> VfsResult<()> {
        let (dp, name) = self.nameiparent(proc, path)?;

        if name.as_bytes() == b"." || name.as_bytes() == b".." {
            log::debug!("unlink: refusing to remove . or ..");
            self.itable.put(dp)?;
            return Err(VfsError::InvalidArgument);
        }

        let dp_lock_target = dp.clone();
        let dp_guard = dp_lock_target.lock()?;
        let (inum, _off) = match sb.ops.dirlookup(dp.dev, dp_guard.inner(), name) {
            Ok(v) => v,
            Err(e) => {
                self.itable.unlock_put(dp_guard, dp)?;
                return Err(e);
            }
        };
        drop(dp_guard);

        let ip = self.itable.get(dp.dev, inum)?;
        let mut guard = ip.lock()?;
        if guard.inner().typ == InodeType::Dir && !sb.ops.isdirempty(ip.dev, guard.inner()) {
            log::debug!("unlink: dev {} inum {} is a non-empty directory", ip.dev, ip.inum);
            drop(guard);
            self.itable.put(ip)?;
            self.itable.put(dp)?;
            return Err(VfsError::NotEmpty);
        }

        let tx = sb.begin_transaction();
        let mut dp_guard = dp.lock()?;
        sb.ops.dirunlink(dp.dev, dp_guard.inner_mut(), name, &tx)?;
        self.dentries.invalidate(&self.itable, dp.dev, dp.inum, name.as_bytes());
        if guard.inner().typ == InodeType::Dir {
            dp_guard.inner_mut().nlink -= 1;
            dp_guard.update(&tx)?;
        }
        drop(dp_guard);

        guard.inner_mut().nlink -= 1;
        guard.update(&tx)?;
        drop(guard);

        self.itable.put(ip)?;
        self.itable.put(dp)?;
        Ok(())
    }

    pub fn mkdir(&self, proc: &dyn ProcessContext, sb: &Arc<crate::vfs::SuperBlock>, path: &Path) -> VfsResult<()> {
        let ip = self.create(proc, sb, path, InodeType::Dir, 0, 0)?;
        self.itable.put(ip)
    }

    pub fn mknod(
        &self,
        proc: &dyn ProcessContext,
        sb: &Arc<crate::vfs::SuperBlock>,
        path: &Path,
        major: u16,
        minor: u16,
    ) -> VfsResult<()> {
        let ip = self.create(proc, sb, path, InodeType::Device, major, minor)?;
        self.itable.put(ip)
    }

    pub fn chdir(&self, proc: &mut dyn ProcessContext, path: &Path) -> VfsResult<()> {
        let ip = self.namei(proc, path)?;
        let lock_target = ip.clone();
        let guard = lock_target.lock()?;
        if guard.inner().typ != InodeType::Dir {
            self.itable.unlock_put(guard, ip)?;
            return Err(VfsError::NotADirectory);
        }
        drop(guard);
        let old = proc.cwd();
        proc.set_cwd(ip);
        self.itable.put(old)
    }

    /// Creates a pipe and installs its two ends as fresh descriptors.
    pub fn pipe(&self, proc: &mut dyn ProcessContext) -> VfsResult<(i32, i32)> {
        let pipe = Arc::new(Pipe::new());
        let read_file = self.ftable.alloc(File::new_pipe(pipe.clone(), false))?;
        let write_file = self.ftable.alloc(File::new_pipe(pipe, true))?;
        let rfd = proc.fdalloc(read_file)?;
        let wfd = match proc.fdalloc(write_file) {
            Ok(fd) => fd,
            Err(e) => {
                proc.fd_take(rfd)?;
                return Err(e);
            }
        };
        Ok((rfd, wfd))
    }
}
