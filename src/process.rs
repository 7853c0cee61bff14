//! The process-context contract: everything the syscall layer needs from
//! "the calling process" without this crate owning a process table,
//! scheduler, or address space of its own.

use std::sync::Arc;

use crate::error::{VfsError, VfsResult};
use crate::file::File;
use crate::inode::Inode;
use crate::param::NOFILE;

/// What the syscall layer (`crate::syscall`) needs from its caller: a
/// current-working-directory inode and a per-process file descriptor
/// table. A kernel embedding this crate implements this trait once per
/// process struct; `crate::testutil::TestProcess` is the in-crate test
/// double.
pub trait ProcessContext {
    fn cwd(&self) -> Arc<Inode>;
    fn set_cwd(&mut self, ip: Arc<Inode>);

    /// Finds the lowest-numbered free descriptor, installs `file`, and
    /// returns the descriptor number.
    fn fdalloc(&mut self, file: Arc<File>) -> VfsResult<i32>;

    fn fd(&self, fd: i32) -> VfsResult<Arc<File>>;

    /// Removes and returns the file at `fd`, leaving the slot free for
    /// reuse (used by `close` and by `dup`'s error paths).
    fn fd_take(&mut self, fd: i32) -> VfsResult<Arc<File>>;
}

/// A straightforward fixed-size file descriptor table, reusable by any
/// `ProcessContext` implementation (including `testutil::TestProcess`).
pub struct FdTable {
    slots: [Option<Arc<File>>; NOFILE],
}

impl FdTable {
    pub fn new() -> Self {
        Self { slots: Default::default() }
    }

    pub fn alloc(&mut self, file: Arc<File>) -> VfsResult<i32> {
        let slot = self.slots.iter().position(Option::is_none).ok_or(VfsError::BadFd)?;
        self.slots[slot] = Some(file);
        Ok(slot as i32)
    }

    pub fn get(&self, fd: i32) -> VfsResult<Arc<File>> {
        self.slots
            .get(fd as usize)
            .and_then(|s| s.clone())
            .ok_or(VfsError::BadFd)
    }

    pub fn take(&mut self, fd: i32) -> VfsResult<Arc<File>> {
        let slot = self.slots.get_mut(fd as usize).ok_or(VfsError::BadFd)?;
        slot.take().ok_or(VfsError::BadFd)
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
