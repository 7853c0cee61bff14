//! Tunable constants for the VFS core and its xv6-style backing store.
//!
//! This is the crate's single source of truth for capacities and on-disk
//! geometry.

/// Maximum number of active in-memory inodes (the `itable` capacity).
pub const NINODE: usize = 50;

/// Maximum number of cached directory entries (the `dtable` capacity).
pub const NDENTRY: usize = 50;

/// Open files per system (the `ftable` capacity).
pub const NFILE: usize = 100;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Maximum major device number.
pub const NDEV: usize = 10;

/// Device number of the file system root disk.
pub const ROOTDEV: u32 = 1;

/// Block size in bytes.
pub const BSIZE: usize = 512;

/// Max number of distinct blocks any single FS op writes; bounds how large a
/// `filewrite` chunk can be so it fits inside one transaction.
pub const MAXOPBLOCKS: usize = 10;

/// Maximum file path length, including the terminating element name.
pub const MAXPATH: usize = 128;
