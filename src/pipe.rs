//! A minimal blocking byte pipe. The full wait-channel/scheduler
//! integration xv6 uses is out of scope here; this is a self-contained
//! ring buffer a [`crate::file::File`] of type `Pipe` reads and writes
//! through.

use std::sync::{Condvar, Mutex};

use crate::error::{VfsError, VfsResult};

const PIPESIZE: usize = 512;

struct Inner {
    buf: [u8; PIPESIZE],
    nread: usize,
    nwrite: usize,
    read_open: bool,
    write_open: bool,
}

/// A shared pipe buffer; [`crate::file::File::Pipe`] variants hold a
/// cloned `Arc<Pipe>` plus a flag recording which end they are.
pub struct Pipe {
    state: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl Pipe {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Inner {
                buf: [0; PIPESIZE],
                nread: 0,
                nwrite: 0,
                read_open: true,
                write_open: true,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn close_read(&self) {
        let mut s = self.state.lock().unwrap();
        s.read_open = false;
        self.not_full.notify_all();
    }

    pub fn close_write(&self) {
        let mut s = self.state.lock().unwrap();
        s.write_open = false;
        self.not_empty.notify_all();
    }

    /// Blocks until at least one byte is available or the write end has
    /// closed, then copies as much as fits into `buf`.
    pub fn read(&self, buf: &mut [u8]) -> VfsResult<usize> {
        let mut s = self.state.lock().unwrap();
        while s.nread == s.nwrite && s.write_open {
            s = self.not_empty.wait(s).unwrap();
        }
        let mut n = 0;
        while n < buf.len() && s.nread < s.nwrite {
            buf[n] = s.buf[s.nread % PIPESIZE];
            s.nread += 1;
            n += 1;
        }
        self.not_full.notify_all();
        Ok(n)
    }

    /// Blocks until there is room, writing `buf` in full unless the read
    /// end has closed (`VfsError::Io`, mirroring a `SIGPIPE`-style error).
    pub fn write(&self, buf: &[u8]) -> VfsResult<usize> {
        let mut s = self.state.lock().unwrap();
        let mut n = 0;
        while n < buf.len() {
            if !s.read_open {
                return Err(VfsError::Io);
            }
            if s.nwrite - s.nread == PIPESIZE {
                self.not_empty.notify_all();
                s = self.not_full.wait(s).unwrap();
                continue;
            }
            s.buf[s.nwrite % PIPESIZE] = buf[n];
            s.nwrite += 1;
            n += 1;
        }
        self.not_empty.notify_all();
        Ok(n)
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn write_then_read_round_trips() {
        let pipe = Pipe::new();
        pipe.write(b"hello").unwrap();
        let mut buf = [0u8; 5];
        let n = pipe.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn read_blocks_until_writer_produces() {
        let pipe = Arc::new(Pipe::new());
        let writer = pipe.clone();
        let handle = thread::spawn(move || {
            writer.write(b"later").unwrap();
        });
        let mut buf = [0u8; 5];
        let n = pipe.read(&mut buf).unwrap();
        handle.join().unwrap();
        assert_eq!(&buf[..n], b"later");
    }

    #[test]
    fn write_after_read_end_closed_errors() {
        let pipe = Pipe::new();
        pipe.close_read();
        assert!(pipe.write(b"x").is_err());
    }
}
