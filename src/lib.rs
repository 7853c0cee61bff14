//! A small xv6-style virtual file system core: an in-memory inode table
//! and dentry cache sitting in front of a pluggable on-disk file system
//! vtable, with path resolution and a syscall-facing file-descriptor
//! layer built on top.
//!
//! The crate does not own a scheduler, process table, or buffer cache —
//! see [`block::BlockDevice`] and [`process::ProcessContext`] for the
//! seams a host kernel fills in.

pub mod block;
pub mod dentry;
pub mod error;
pub mod fcntl;
pub mod file;
pub mod inode;
pub mod lock;
pub mod namex;
pub mod param;
pub mod path;
pub mod pipe;
pub mod process;
pub mod stat;
pub mod syscall;
pub mod vfs;
pub mod xv6fs;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::fcntl::OpenFlags;
    use crate::file::DeviceSwitch;
    use crate::inode::{InodeType, Itable};
    use crate::param::ROOTDEV;
    use crate::path::Path;
    use crate::syscall::Vfs;
    use crate::testutil::{mkfs, MemBlockDevice, TestProcess};
    use crate::vfs::FilesystemTypeRegistry;
    use crate::xv6fs::Xv6Fs;

    fn mount_fresh() -> (Arc<crate::vfs::SuperBlock>, Vfs) {
        let _ = env_logger::builder().is_test(true).try_init();
        let disk = Arc::new(MemBlockDevice::new(2048));
        mkfs(disk.as_ref(), ROOTDEV, 2048, 200).unwrap();
        let ops = Arc::new(Xv6Fs::new(disk));
        let registry = FilesystemTypeRegistry::new();
        let sb = registry.mount("xv6fs", ops, ROOTDEV, "mem0").unwrap();
        let itable = Itable::new(sb.clone());
        let vfs = Vfs::new(itable, Arc::new(DeviceSwitch::new()));
        (sb, vfs)
    }

    #[test]
    fn root_directory_resolves_and_is_a_directory() {
        let (_, vfs) = mount_fresh();
        let root = vfs.itable.root().unwrap();
        let guard = root.lock().unwrap();
        assert_eq!(guard.inner().typ, InodeType::Dir);
    }

    #[test]
    fn create_read_write_round_trip() {
        let (sb, vfs) = mount_fresh();
        let root = vfs.itable.root().unwrap();
        let mut proc = TestProcess::new(root);

        let fd = {
            let file = vfs.open(&proc, &sb, Path::new(b"hello"), OpenFlags::O_CREATE | OpenFlags::O_RDWR).unwrap();
            proc.fdalloc(file).unwrap()
        };
        let n = vfs.write(&proc, fd, b"hello, file").unwrap();
        assert_eq!(n, b"hello, file".len());

        vfs.close(&mut proc, fd).unwrap();

        let fd = {
            let file = vfs.open(&proc, &sb, Path::new(b"hello"), OpenFlags::O_RDONLY).unwrap();
            proc.fdalloc(file).unwrap()
        };
        let mut buf = [0u8; 32];
        let n = vfs.read(&proc, fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello, file");
    }

    #[test]
    fn mkdir_then_chdir_then_relative_create() {
        let (sb, vfs) = mount_fresh();
        let root = vfs.itable.root().unwrap();
        let mut proc = TestProcess::new(root);

        vfs.mkdir(&proc, &sb, Path::new(b"sub")).unwrap();
        vfs.chdir(&mut proc, Path::new(b"sub")).unwrap();

        let file = vfs.open(&proc, &sb, Path::new(b"leaf"), OpenFlags::O_CREATE | OpenFlags::O_RDWR).unwrap();
        let fd = proc.fdalloc(file).unwrap();
        vfs.write(&proc, fd, b"x").unwrap();
        vfs.close(&mut proc, fd).unwrap();

        vfs.chdir(&mut proc, Path::new(b"/")).unwrap();
        let file = vfs.open(&proc, &sb, Path::new(b"sub/leaf"), OpenFlags::O_RDONLY).unwrap();
        let fd = proc.fdalloc(file).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(vfs.read(&proc, fd, &mut buf).unwrap(), 1);
        assert_eq!(&buf, b"x");
    }

    #[test]
    fn unlink_removes_name_but_open_fd_still_reads() {
        let (sb, vfs) = mount_fresh();
        let root = vfs.itable.root().unwrap();
        let mut proc = TestProcess::new(root);

        let file = vfs.open(&proc, &sb, Path::new(b"doomed"), OpenFlags::O_CREATE | OpenFlags::O_RDWR).unwrap();
        let fd = proc.fdalloc(file).unwrap();
        vfs.write(&proc, fd, b"still here").unwrap();

        vfs.unlink(&proc, &sb, Path::new(b"doomed")).unwrap();
        assert!(vfs.open(&proc, &sb, Path::new(b"doomed"), OpenFlags::O_RDONLY).is_err());

        let mut buf = [0u8; 32];
        let n = proc.fd(fd).unwrap().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"still here");
    }

    #[test]
    fn rmdir_on_nonempty_directory_fails() {
        let (sb, vfs) = mount_fresh();
        let root = vfs.itable.root().unwrap();
        let proc = TestProcess::new(root);

        vfs.mkdir(&proc, &sb, Path::new(b"parent")).unwrap();
        vfs.mkdir(&proc, &sb, Path::new(b"parent/child")).unwrap();

        assert!(vfs.unlink(&proc, &sb, Path::new(b"parent")).is_err());
    }

    #[test]
    fn hard_link_keeps_data_reachable_after_original_unlinked() {
        let (sb, vfs) = mount_fresh();
        let root = vfs.itable.root().unwrap();
        let mut proc = TestProcess::new(root);

        let file = vfs.open(&proc, &sb, Path::new(b"a"), OpenFlags::O_CREATE | OpenFlags::O_RDWR).unwrap();
        let fd = proc.fdalloc(file).unwrap();
        vfs.write(&proc, fd, b"shared").unwrap();
        vfs.close(&mut proc, fd).unwrap();

        vfs.link(&proc, &sb, Path::new(b"a"), Path::new(b"b")).unwrap();
        vfs.unlink(&proc, &sb, Path::new(b"a")).unwrap();

        let file = vfs.open(&proc, &sb, Path::new(b"b"), OpenFlags::O_RDONLY).unwrap();
        let fd = proc.fdalloc(file).unwrap();
        let mut buf = [0u8; 8];
        let n = vfs.read(&proc, fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"shared");
    }

    #[test]
    fn pipe_write_and_read_across_descriptors() {
        let (_, vfs) = mount_fresh();
        let root = vfs.itable.root().unwrap();
        let mut proc = TestProcess::new(root);

        let (rfd, wfd) = vfs.pipe(&mut proc).unwrap();
        vfs.write(&proc, wfd, b"ping").unwrap();
        let mut buf = [0u8; 4];
        let n = vfs.read(&proc, rfd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn large_file_spanning_indirect_block_round_trips() {
        use crate::xv6fs::NDIRECT;
        use crate::param::BSIZE;

        let (sb, vfs) = mount_fresh();
        let root = vfs.itable.root().unwrap();
        let mut proc = TestProcess::new(root);

        let len = NDIRECT * BSIZE + 100;
        let pattern: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

        let file = vfs.open(&proc, &sb, Path::new(b"big"), OpenFlags::O_CREATE | OpenFlags::O_RDWR).unwrap();
        let fd = proc.fdalloc(file).unwrap();
        let n = vfs.write(&proc, fd, &pattern).unwrap();
        assert_eq!(n, len);
        vfs.close(&mut proc, fd).unwrap();

        let file = vfs.open(&proc, &sb, Path::new(b"big"), OpenFlags::O_RDONLY).unwrap();
        let fd = proc.fdalloc(file).unwrap();
        assert_eq!(vfs.fstat(&proc, fd).unwrap().size, len);
        let mut readback = vec![0u8; len];
        let mut got = 0;
        while got < len {
            let n = vfs.read(&proc, fd, &mut readback[got..]).unwrap();
            assert!(n > 0);
            got += n;
        }
        assert_eq!(readback, pattern);
    }

    #[test]
    fn truncate_on_o_trunc_resets_size() {
        let (sb, vfs) = mount_fresh();
        let root = vfs.itable.root().unwrap();
        let mut proc = TestProcess::new(root);

        let file = vfs.open(&proc, &sb, Path::new(b"shrinking"), OpenFlags::O_CREATE | OpenFlags::O_RDWR).unwrap();
        let fd = proc.fdalloc(file).unwrap();
        vfs.write(&proc, fd, &vec![7u8; 1000]).unwrap();
        vfs.close(&mut proc, fd).unwrap();

        let file = vfs.open(&proc, &sb, Path::new(b"shrinking"), OpenFlags::O_WRONLY | OpenFlags::O_TRUNC).unwrap();
        let fd = proc.fdalloc(file).unwrap();
        assert_eq!(vfs.fstat(&proc, fd).unwrap().size, 0);
    }

    #[test]
    fn write_in_pieces_matches_write_in_one_call() {
        let (sb, vfs) = mount_fresh();
        let root = vfs.itable.root().unwrap();
        let mut proc = TestProcess::new(root);

        let whole: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();

        let file = vfs.open(&proc, &sb, Path::new(b"whole"), OpenFlags::O_CREATE | OpenFlags::O_RDWR).unwrap();
        let fd = proc.fdalloc(file).unwrap();
        vfs.write(&proc, fd, &whole).unwrap();
        vfs.close(&mut proc, fd).unwrap();

        let file = vfs.open(&proc, &sb, Path::new(b"pieces"), OpenFlags::O_CREATE | OpenFlags::O_RDWR).unwrap();
        let fd = proc.fdalloc(file).unwrap();
        for chunk in whole.chunks(37) {
            vfs.write(&proc, fd, chunk).unwrap();
        }
        vfs.close(&mut proc, fd).unwrap();

        let read_all = |name: &Path| {
            let file = vfs.open(&proc, &sb, name, OpenFlags::O_RDONLY).unwrap();
            let fd = proc.fdalloc(file).unwrap();
            let mut buf = vec![0u8; whole.len()];
            let mut got = 0;
            while got < buf.len() {
                let n = vfs.read(&proc, fd, &mut buf[got..]).unwrap();
                assert!(n > 0);
                got += n;
            }
            buf
        };
        assert_eq!(read_all(Path::new(b"whole")), read_all(Path::new(b"pieces")));
    }

    #[test]
    fn write_past_eof_is_rejected() {
        let (sb, vfs) = mount_fresh();
        let root = vfs.itable.root().unwrap();
        let proc = TestProcess::new(root);

        let ip = vfs.create(&proc, &sb, Path::new(b"sparse"), InodeType::File, 0, 0).unwrap();
        let mut guard = ip.lock().unwrap();
        let tx = sb.begin_transaction();
        assert!(guard.write(2000, b"end", &tx).is_err(), "write must reject off > size, never fabricate a hole");
        drop(guard);
        vfs.itable.put(ip).unwrap();
    }
}
