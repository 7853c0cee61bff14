//! The concrete on-disk file system: layout constants, the superblock
//! format, packed on-disk inode/directory-entry records, and the
//! [`Xv6Fs`] vtable implementation, matching xv6's on-disk layout
//! bit-for-bit.

use std::convert::TryInto;
use std::sync::Arc;

use zerocopy::{AsBytes, FromBytes};

use crate::block::{bzero, BlockData, BlockDevice};
use crate::error::{VfsError, VfsResult};
use crate::inode::{InodeInner, InodeType};
use crate::lock::Spinlock;
use crate::param::BSIZE;
use crate::path::FileName;
use crate::vfs::{FsOps, FsTransaction};

/// Longest byte length of one path element, including the slot's trailing
/// padding. A name of exactly this length is stored unterminated.
pub const DIRSIZ: usize = 14;

/// Direct block pointers held inline in an inode.
pub const NDIRECT: usize = 12;
/// Block pointers reachable through the inode's one indirect block.
pub const NINDIRECT: usize = BSIZE / 4;
/// Largest file size expressible by direct + singly-indirect addressing.
pub const MAXFILE: usize = NDIRECT + NINDIRECT;
/// Packed `Dinode` records per block.
pub const IPB: usize = BSIZE / std::mem::size_of::<Dinode>();
/// Bits of the free-block bitmap addressed by one bitmap block.
pub const BPB: usize = BSIZE * 8;
/// On-disk superblock magic number; any other value means the image was
/// never formatted or is corrupt; an invariant violation, not a
/// recoverable error.
pub const FSMAGIC: u32 = 0x1020_3040;
/// The inode number of the root directory, fixed at format time.
pub const ROOTINO: u32 = 1;

#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct DiskSuperblock {
    pub magic: u32,
    pub size: u32,
    pub nblocks: u32,
    pub ninodes: u32,
    pub nlog: u32,
    pub logstart: u32,
    pub inodestart: u32,
    pub bmapstart: u32,
}

impl DiskSuperblock {
    /// Block number holding inode `inum`.
    pub fn iblock(&self, inum: u32) -> u32 {
        self.inodestart + inum / IPB as u32
    }

    /// Bitmap block covering data block `bno`.
    pub fn bblock(&self, bno: u32) -> u32 {
        self.bmapstart + bno / BPB as u32
    }
}

/// The packed on-disk inode record.
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct Dinode {
    pub typ: u16,
    pub major: u16,
    pub minor: u16,
    pub nlink: i16,
    pub size: u32,
    pub addrs: [u32; NDIRECT + 1],
}

fn dinode_type(typ: u16) -> InodeType {
    match typ {
        1 => InodeType::Dir,
        2 => InodeType::File,
        3 => InodeType::Device,
        _ => InodeType::Free,
    }
}

fn type_to_dinode(typ: InodeType) -> u16 {
    match typ {
        InodeType::Dir => 1,
        InodeType::File => 2,
        InodeType::Device => 3,
        InodeType::Free => 0,
    }
}

/// A packed linear-directory entry.
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct Dirent {
    pub inum: u16,
    pub name: [u8; DIRSIZ],
}

impl Dirent {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    fn name_matches(&self, name: &FileName) -> bool {
        let bytes = name.as_bytes();
        if bytes.len() < DIRSIZ {
            self.name[..bytes.len()] == *bytes && self.name[bytes.len()] == 0
        } else {
            self.name[..DIRSIZ] == *bytes
        }
    }

    fn set_name(&mut self, name: &FileName) {
        self.name = [0u8; DIRSIZ];
        let bytes = name.as_bytes();
        self.name[..bytes.len()].copy_from_slice(bytes);
    }
}

/// The xv6-derived on-disk file system: direct+indirect block addressing,
/// a free-block bitmap, and fixed-size linear directories.
pub struct Xv6Fs {
    disk: Arc<dyn BlockDevice>,
    sb: Spinlock<Option<DiskSuperblock>>,
}

impl Xv6Fs {
    pub fn new(disk: Arc<dyn BlockDevice>) -> Self {
        Self {
            disk,
            sb: Spinlock::new(None),
        }
    }

    fn superblock(&self) -> DiskSuperblock {
        self.sb.lock().expect("Xv6Fs::init must run before use")
    }

    fn read_block(&self, dev: u32, bno: u32) -> VfsResult<BlockData> {
        self.disk.read_block(dev, bno)
    }

    fn write_block(&self, dev: u32, bno: u32, data: &BlockData) -> VfsResult<()> {
        self.disk.write_block(dev, bno, data)
    }

    fn read_dinode(&self, dev: u32, inum: u32) -> VfsResult<Dinode> {
        let sb = self.superblock();
        let block = self.read_block(dev, sb.iblock(inum))?;
        let idx = (inum as usize % IPB) * std::mem::size_of::<Dinode>();
        Ok(*zerocopy::LayoutVerified::<_, Dinode>::new(&block[idx..idx + std::mem::size_of::<Dinode>()]).unwrap())
    }

    fn write_dinode(&self, dev: u32, inum: u32, dip: &Dinode) -> VfsResult<()> {
        let sb = self.superblock();
        let mut block = self.read_block(dev, sb.iblock(inum))?;
        let idx = (inum as usize % IPB) * std::mem::size_of::<Dinode>();
        block[idx..idx + std::mem::size_of::<Dinode>()].copy_from_slice(dip.as_bytes());
        self.write_block(dev, sb.iblock(inum), &block)
    }

    /// Finds and marks used the first free block on `dev`.
    fn balloc(&self, dev: u32, tx: &FsTransaction<'_>) -> VfsResult<u32> {
        let _ = tx;
        let sb = self.superblock();
        for base in (0..sb.size).step_by(BPB) {
            let mut bitmap = self.read_block(dev, sb.bblock(base))?;
            for bi in 0..BPB.min((sb.size - base) as usize) {
                let byte = bi / 8;
                let mask = 1u8 << (bi % 8);
                if bitmap[byte] & mask == 0 {
                    bitmap[byte] |= mask;
                    self.write_block(dev, sb.bblock(base), &bitmap)?;
                    let bno = base + bi as u32;
                    bzero(self.disk.as_ref(), dev, bno)?;
                    return Ok(bno);
                }
            }
        }
        log::warn!("xv6fs: dev {} out of free blocks", dev);
        Err(VfsError::NoSpace)
    }

    /// Marks data block `bno` free.
    fn bfree(&self, dev: u32, bno: u32, tx: &FsTransaction<'_>) -> VfsResult<()> {
        let _ = tx;
        let sb = self.superblock();
        let mut bitmap = self.read_block(dev, sb.bblock(bno))?;
        let bi = (bno % BPB as u32) as usize;
        let byte = bi / 8;
        let mask = 1u8 << (bi % 8);
        assert!(bitmap[byte] & mask != 0, "freeing a block that is already free");
        bitmap[byte] &= !mask;
        self.write_block(dev, sb.bblock(bno), &bitmap)
    }

    /// Resolves the `bn`th logical block of a file to a physical block
    /// number, allocating direct or indirect blocks on demand.
    fn bmap(&self, dev: u32, inner: &mut InodeInner, bn: usize, tx: &FsTransaction<'_>) -> VfsResult<u32> {
        if bn < NDIRECT {
            if inner.addrs[bn] == 0 {
                inner.addrs[bn] = self.balloc(dev, tx)?;
            }
            return Ok(inner.addrs[bn]);
        }

        let bn = bn - NDIRECT;
        assert!(bn < NINDIRECT, "bmap: logical block {} out of range", bn + NDIRECT);

        if inner.addrs[NDIRECT] == 0 {
            inner.addrs[NDIRECT] = self.balloc(dev, tx)?;
        }
        let indirect_bno = inner.addrs[NDIRECT];
        let mut block = self.read_block(dev, indirect_bno)?;
        let idx = bn * 4;
        let mut addr = u32::from_le_bytes(block[idx..idx + 4].try_into().unwrap());
        if addr == 0 {
            addr = self.balloc(dev, tx)?;
            block[idx..idx + 4].copy_from_slice(&addr.to_le_bytes());
            self.write_block(dev, indirect_bno, &block)?;
        }
        Ok(addr)
    }

    fn dirents<'i>(&self, dev: u32, dir: &'i InodeInner) -> DirentIter<'_, 'i> {
        DirentIter { fs: self, dev, dir, off: 0 }
    }
}

struct DirentIter<'fs, 'i> {
    fs: &'fs Xv6Fs,
    dev: u32,
    dir: &'i InodeInner,
    off: u32,
}

impl Iterator for DirentIter<'_, '_> {
    type Item = VfsResult<(u32, Dirent)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.off as usize + Dirent::SIZE > self.dir.size as usize {
            return None;
        }
        let mut buf = [0u8; Dirent::SIZE];
        match self.fs.read(self.dev, self.dir, self.off, &mut buf) {
            Ok(n) if n == Dirent::SIZE => {
                let de = *zerocopy::LayoutVerified::<_, Dirent>::new(&buf[..]).unwrap();
                let off = self.off;
                self.off += Dirent::SIZE as u32;
                Some(Ok((off, de)))
            }
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl FsOps for Xv6Fs {
    fn init(&self, dev: u32) -> VfsResult<()> {
        let block = self.read_block(dev, 1)?;
        let sb = *zerocopy::LayoutVerified::<_, DiskSuperblock>::new(&block[..std::mem::size_of::<DiskSuperblock>()]).unwrap();
        assert_eq!(sb.magic, FSMAGIC, "bad file system magic number");
        log::info!("xv6fs: mounted dev {} ({} blocks, {} inodes)", dev, sb.size, sb.ninodes);
        *self.sb.lock() = Some(sb);
        Ok(())
    }

    fn root_inum(&self) -> u32 {
        ROOTINO
    }

    fn alloc_inode(&self, dev: u32, typ: InodeType, tx: &FsTransaction<'_>) -> VfsResult<u32> {
        let _ = tx;
        let sb = self.superblock();
        for inum in 1..sb.ninodes {
            let dip = self.read_dinode(dev, inum)?;
            if dip.typ == 0 {
                let dip = Dinode {
                    typ: type_to_dinode(typ),
                    ..Dinode::default()
                };
                self.write_dinode(dev, inum, &dip)?;
                return Ok(inum);
            }
        }
        Err(VfsError::NoInodes)
    }

    fn update_lock(&self, dev: u32, inum: u32) -> VfsResult<InodeInner> {
        let dip = self.read_dinode(dev, inum)?;
        Ok(InodeInner {
            valid: true,
            typ: dinode_type(dip.typ),
            nlink: dip.nlink,
            size: dip.size,
            addrs: dip.addrs,
            major: dip.major,
            minor: dip.minor,
        })
    }

    fn write_inode(&self, dev: u32, inum: u32, inner: &InodeInner, tx: &FsTransaction<'_>) -> VfsResult<()> {
        let _ = tx;
        let dip = Dinode {
            typ: type_to_dinode(inner.typ),
            major: inner.major,
            minor: inner.minor,
            nlink: inner.nlink,
            size: inner.size,
            addrs: inner.addrs,
        };
        self.write_dinode(dev, inum, &dip)
    }

    fn free_inode(&self, dev: u32, inum: u32, tx: &FsTransaction<'_>) -> VfsResult<()> {
        self.write_dinode(dev, inum, &Dinode::default())?;
        let _ = tx;
        Ok(())
    }

    fn trunc(&self, dev: u32, inner: &mut InodeInner, tx: &FsTransaction<'_>) -> VfsResult<()> {
        for slot in 0..NDIRECT {
            if inner.addrs[slot] != 0 {
                self.bfree(dev, inner.addrs[slot], tx)?;
                inner.addrs[slot] = 0;
            }
        }
        if inner.addrs[NDIRECT] != 0 {
            let block = self.read_block(dev, inner.addrs[NDIRECT])?;
            for chunk in block.chunks_exact(4) {
                let addr = u32::from_le_bytes(chunk.try_into().unwrap());
                if addr != 0 {
                    self.bfree(dev, addr, tx)?;
                }
            }
            self.bfree(dev, inner.addrs[NDIRECT], tx)?;
            inner.addrs[NDIRECT] = 0;
        }
        inner.size = 0;
        Ok(())
    }

    fn read(&self, dev: u32, inner: &InodeInner, off: u32, buf: &mut [u8]) -> VfsResult<usize> {
        if off > inner.size {
            return Err(VfsError::InvalidArgument);
        }
        let n = (buf.len() as u32).min(inner.size - off) as usize;
        let mut done = 0;
        while done < n {
            let bn = (off as usize + done) / BSIZE;
            let boff = (off as usize + done) % BSIZE;
            let phys = self.bmap_readonly(dev, inner, bn)?;
            let take = (BSIZE - boff).min(n - done);
            if phys == 0 {
                buf[done..done + take].fill(0);
            } else {
                let block = self.read_block(dev, phys)?;
                buf[done..done + take].copy_from_slice(&block[boff..boff + take]);
            }
            done += take;
        }
        Ok(n)
    }

    fn write(
        &self,
        dev: u32,
        inner: &mut InodeInner,
        off: u32,
        buf: &[u8],
        tx: &FsTransaction<'_>,
    ) -> VfsResult<usize> {
        if off > inner.size {
            return Err(VfsError::InvalidArgument);
        }
        if off as usize + buf.len() > MAXFILE * BSIZE {
            return Err(VfsError::InvalidArgument);
        }
        let mut done = 0;
        while done < buf.len() {
            let bn = (off as usize + done) / BSIZE;
            let boff = (off as usize + done) % BSIZE;
            let phys = self.bmap(dev, inner, bn, tx)?;
            let mut block = self.read_block(dev, phys)?;
            let take = (BSIZE - boff).min(buf.len() - done);
            block[boff..boff + take].copy_from_slice(&buf[done..done + take]);
            self.write_block(dev, phys, &block)?;
            done += take;
        }
        if off as usize + done > inner.size as usize {
            inner.size = off + done as u32;
        }
        Ok(done)
    }

    fn dirlookup(&self, dev: u32, dir: &InodeInner, name: &FileName) -> VfsResult<(u32, u32)> {
        assert_eq!(dir.typ, InodeType::Dir, "dirlookup called on a non-directory");
        for entry in self.dirents(dev, dir) {
            let (off, de) = entry?;
            if de.inum != 0 && de.name_matches(name) {
                return Ok((de.inum as u32, off));
            }
        }
        Err(VfsError::NotFound)
    }

    fn dirlink(
        &self,
        dev: u32,
        dir: &mut InodeInner,
        name: &FileName,
        inum: u32,
        tx: &FsTransaction<'_>,
    ) -> VfsResult<()> {
        if self.dirlookup(dev, dir, name).is_ok() {
            return Err(VfsError::Exists);
        }

        let mut target_off = dir.size;
        for entry in self.dirents(dev, dir) {
            let (entry_off, de) = entry?;
            if de.inum == 0 {
                target_off = entry_off;
                break;
            }
        }

        let mut de = Dirent { inum: inum as u16, name: [0; DIRSIZ] };
        de.set_name(name);
        self.write(dev, dir, target_off, de.as_bytes(), tx)?;
        Ok(())
    }

    fn dirunlink(&self, dev: u32, dir: &mut InodeInner, name: &FileName, tx: &FsTransaction<'_>) -> VfsResult<()> {
        let mut matches = Vec::new();
        for entry in self.dirents(dev, dir) {
            let (off, de) = entry?;
            if de.inum != 0 && de.name_matches(name) {
                matches.push(off);
            }
        }
        if matches.is_empty() {
            return Err(VfsError::NotFound);
        }
        for off in matches {
            self.write(dev, dir, off, Dirent::default().as_bytes(), tx)?;
        }
        Ok(())
    }

    fn isdirempty(&self, dev: u32, dir: &InodeInner) -> bool {
        for entry in self.dirents(dev, dir) {
            let (_, de) = match entry {
                Ok(v) => v,
                Err(_) => return false,
            };
            if de.inum == 0 {
                continue;
            }
            if de.name.starts_with(b".") && (de.name[1] == 0 || (de.name[1] == b'.' && de.name[2] == 0)) {
                continue;
            }
            return false;
        }
        true
    }
}

impl Xv6Fs {
    /// Like [`Xv6Fs::bmap`] but never allocates; used by `read`, which
    /// takes `&InodeInner` rather than `&mut InodeInner`. A hole inside an
    /// already-written file reads back as zeros, matching a sparse read.
    fn bmap_readonly(&self, dev: u32, inner: &InodeInner, bn: usize) -> VfsResult<u32> {
        if bn < NDIRECT {
            return Ok(inner.addrs[bn]);
        }
        let bn = bn - NDIRECT;
        if inner.addrs[NDIRECT] == 0 {
            return Ok(0);
        }
        let block = self.read_block(dev, inner.addrs[NDIRECT])?;
        let idx = bn * 4;
        Ok(u32::from_le_bytes(block[idx..idx + 4].try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{mkfs, MemBlockDevice};

    fn fresh_fs(dev: u32) -> Xv6Fs {
        let disk = Arc::new(MemBlockDevice::new(64));
        mkfs(disk.as_ref(), dev, 64, 20).unwrap();
        let fs = Xv6Fs::new(disk);
        fs.init(dev).unwrap();
        fs
    }

    /// Exercises invariant 8 directly: a hole in the direct/indirect
    /// address array (an unset `addrs[bn]`) reads back as zero, and
    /// `bmap_readonly` — unlike `bmap` — never allocates to produce that
    /// zero, matching `read`'s contract of never mutating the file.
    #[test]
    fn sparse_address_slot_reads_as_zero_without_allocating() {
        let dev = 1;
        let fs = fresh_fs(dev);
        let inner = InodeInner {
            valid: true,
            typ: InodeType::File,
            nlink: 1,
            size: BSIZE as u32,
            addrs: [0; NDIRECT + 1],
            major: 0,
            minor: 0,
        };

        let sb = fs.superblock();
        let bitmap_before = fs.read_block(dev, sb.bblock(0)).unwrap();

        assert_eq!(fs.bmap_readonly(dev, &inner, 0).unwrap(), 0);
        assert_eq!(fs.bmap_readonly(dev, &inner, NDIRECT + 3).unwrap(), 0);

        let mut buf = [0xffu8; BSIZE];
        let n = fs.read(dev, &inner, 0, &mut buf).unwrap();
        assert_eq!(n, BSIZE);
        assert!(buf.iter().all(|&b| b == 0));

        let bitmap_after = fs.read_block(dev, sb.bblock(0)).unwrap();
        assert_eq!(bitmap_before, bitmap_after, "reading a hole must not allocate a block");
    }
}
