//! Recoverable-error taxonomy surfaced up to the syscall boundary.
//!
//! Invariant violations — freeing an already-free block, unlocking an
//! inode this task does not hold, exhausting the inode table on a path
//! that promises it cannot happen, `bmap` out of range, a bad superblock
//! magic — are `panic!`/`assert!`, not `VfsError`: they indicate
//! corruption or a core bug, and continuing risks on-disk damage.

use thiserror::Error;

/// A recoverable failure surfaced up to the syscall boundary as `-1`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("name already exists")]
    Exists,
    #[error("no space left on device")]
    NoSpace,
    #[error("no free inode")]
    NoInodes,
    #[error("in-memory inode table is full")]
    InodeTableFull,
    #[error("in-memory dentry pool is full")]
    DentryTableFull,
    #[error("open file table is full")]
    FileTableFull,
    #[error("bad file descriptor")]
    BadFd,
    #[error("permission denied")]
    PermissionDenied,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("short write")]
    ShortWrite,
    #[error("I/O error")]
    Io,
}

pub type VfsResult<T> = Result<T, VfsError>;
