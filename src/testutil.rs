//! In-memory test doubles: a `BlockDevice` backed by a `Vec`, a small
//! formatter that lays out a fresh xv6-style image, and a minimal
//! `ProcessContext` for driving the integration tests without a real
//! disk or scheduler.

use std::sync::{Arc, Mutex};

use zerocopy::AsBytes;

use crate::block::{BlockData, BlockDevice};
use crate::error::{VfsError, VfsResult};
use crate::file::File;
use crate::inode::Inode;
use crate::param::BSIZE;
use crate::process::{FdTable, ProcessContext};
use crate::xv6fs::{DiskSuperblock, Dirent, BPB, DIRSIZ, FSMAGIC, IPB, ROOTINO};

/// A whole-disk image kept in memory, addressed the same way a real block
/// device would be.
pub struct MemBlockDevice {
    blocks: Mutex<Vec<BlockData>>,
}

impl MemBlockDevice {
    pub fn new(nblocks: usize) -> Self {
        Self { blocks: Mutex::new(vec![[0u8; BSIZE]; nblocks]) }
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_block(&self, _dev: u32, bno: u32) -> VfsResult<BlockData> {
        self.blocks
            .lock()
            .unwrap()
            .get(bno as usize)
            .copied()
            .ok_or(VfsError::Io)
    }

    fn write_block(&self, _dev: u32, bno: u32, data: &BlockData) -> VfsResult<()> {
        let mut blocks = self.blocks.lock().unwrap();
        let block = blocks.get_mut(bno as usize).ok_or(VfsError::Io)?;
        *block = *data;
        Ok(())
    }
}

/// Formats a fresh image: superblock, zeroed bitmap and inode blocks, and
/// a root directory inode containing `.` and `..`. Layout mirrors xv6's
/// `mkfs`: block 0 is the (unused, in this crate) boot block, block 1 is
/// the superblock, followed by the inode blocks, then the bitmap, then
/// data blocks.
pub fn mkfs(disk: &dyn BlockDevice, dev: u32, nblocks: u32, ninodes: u32) -> VfsResult<()> {
    let ninodeblocks = (ninodes as usize + IPB - 1) / IPB;
    let nbitmap = (nblocks as usize + BPB - 1) / BPB;
    let inodestart = 2u32;
    let bmapstart = inodestart + ninodeblocks as u32;
    let first_data_block = bmapstart + nbitmap as u32;

    let sb = DiskSuperblock {
        magic: FSMAGIC,
        size: nblocks,
        nblocks: nblocks - first_data_block,
        ninodes,
        nlog: 0,
        logstart: 0,
        inodestart,
        bmapstart,
    };
    let mut sb_block = [0u8; BSIZE];
    sb_block[..std::mem::size_of::<DiskSuperblock>()].copy_from_slice(sb.as_bytes());
    disk.write_block(dev, 1, &sb_block)?;

    for b in inodestart..first_data_block {
        disk.write_block(dev, b, &[0u8; BSIZE])?;
    }

    // Mark every block before `first_data_block` used in the bitmap.
    for bno in 0..first_data_block {
        mark_used(disk, dev, &sb, bno)?;
    }

    // Root directory inode.
    let root_data_block = first_data_block;
    mark_used(disk, dev, &sb, root_data_block)?;

    let mut dirblock = [0u8; BSIZE];
    let mut dot = Dirent { inum: ROOTINO as u16, name: [0; DIRSIZ] };
    dot.name[0] = b'.';
    let mut dotdot = Dirent { inum: ROOTINO as u16, name: [0; DIRSIZ] };
    dotdot.name[0] = b'.';
    dotdot.name[1] = b'.';
    dirblock[..Dirent::SIZE].copy_from_slice(dot.as_bytes());
    dirblock[Dirent::SIZE..2 * Dirent::SIZE].copy_from_slice(dotdot.as_bytes());
    disk.write_block(dev, root_data_block, &dirblock)?;

    let root_dinode = crate::xv6fs::Dinode {
        typ: 1,
        major: 0,
        minor: 0,
        nlink: 1,
        size: (2 * Dirent::SIZE) as u32,
        addrs: {
            let mut a = [0u32; crate::xv6fs::NDIRECT + 1];
            a[0] = root_data_block;
            a
        },
    };
    let mut block = disk.read_block(dev, sb.iblock(ROOTINO))?;
    let idx = (ROOTINO as usize % IPB) * std::mem::size_of::<crate::xv6fs::Dinode>();
    block[idx..idx + std::mem::size_of::<crate::xv6fs::Dinode>()].copy_from_slice(root_dinode.as_bytes());
    disk.write_block(dev, sb.iblock(ROOTINO), &block)?;

    Ok(())
}

fn mark_used(disk: &dyn BlockDevice, dev: u32, sb: &DiskSuperblock, bno: u32) -> VfsResult<()> {
    let mut bitmap = disk.read_block(dev, sb.bblock(bno))?;
    let bi = (bno % BPB as u32) as usize;
    bitmap[bi / 8] |= 1 << (bi % 8);
    disk.write_block(dev, sb.bblock(bno), &bitmap)
}

/// A single-threaded `ProcessContext` double: one current directory plus
/// a plain `FdTable`.
pub struct TestProcess {
    cwd: Arc<Inode>,
    fds: FdTable,
}

impl TestProcess {
    pub fn new(cwd: Arc<Inode>) -> Self {
        Self { cwd, fds: FdTable::new() }
    }
}

impl ProcessContext for TestProcess {
    fn cwd(&self) -> Arc<Inode> {
        self.cwd.clone()
    }

    fn set_cwd(&mut self, ip: Arc<Inode>) {
        self.cwd = ip;
    }

    fn fdalloc(&mut self, file: Arc<File>) -> VfsResult<i32> {
        self.fds.alloc(file)
    }

    fn fd(&self, fd: i32) -> VfsResult<Arc<File>> {
        self.fds.get(fd)
    }

    fn fd_take(&mut self, fd: i32) -> VfsResult<Arc<File>> {
        self.fds.take(fd)
    }
}
