//! `open` mode flags.

use bitflags::bitflags;

bitflags! {
    pub struct OpenFlags: i32 {
        const O_RDONLY = 0;
        const O_WRONLY = 0x1;
        const O_RDWR = 0x2;
        const O_CREATE = 0x200;
        const O_TRUNC = 0x400;
    }
}

impl OpenFlags {
    pub fn readable(self) -> bool {
        !self.intersects(OpenFlags::O_WRONLY)
    }

    pub fn writable(self) -> bool {
        self.intersects(OpenFlags::O_WRONLY | OpenFlags::O_RDWR)
    }
}
