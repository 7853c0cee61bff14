//! The block device contract this core sits on top of.
//!
//! This crate treats the buffer cache (`bread`/`bwrite`/`brelse`/`bpin`/
//! `bunpin`) as an external collaborator: callers of [`BlockDevice`] get a
//! plain owned buffer back rather than a pinned, cache-resident one, since
//! a real cache's LRU/pin policy belongs one layer below this core, not in
//! it. Every block is exactly [`crate::param::BSIZE`] bytes.

use crate::error::VfsResult;
use crate::param::BSIZE;

/// A single disk block's contents.
pub type BlockData = [u8; BSIZE];

/// Indexed random-access block storage, addressed by `(dev, block number)`.
pub trait BlockDevice: Send + Sync {
    /// Reads block `bno` of device `dev` into a freshly owned buffer.
    fn read_block(&self, dev: u32, bno: u32) -> VfsResult<BlockData>;

    /// Durably writes `data` to block `bno` of device `dev`.
    fn write_block(&self, dev: u32, bno: u32, data: &BlockData) -> VfsResult<()>;
}

/// Zeroes block `bno` of `dev`.
pub fn bzero(disk: &dyn BlockDevice, dev: u32, bno: u32) -> VfsResult<()> {
    disk.write_block(dev, bno, &[0u8; BSIZE])
}
