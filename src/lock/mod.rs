//! The two lock tiers this crate's shared state is built on.
//!
//! [`Spinlock`] is the short, non-sleeping tier (protects the itable/dtable/
//! ftable allocation-and-refcount fields). [`Sleeplock`] is the per-inode
//! tier that may block the calling thread while I/O completes, and protects
//! every inode field other than `(dev, inum, ref)`.

mod sleeplock;
mod spinlock;

pub use sleeplock::{Sleeplock, SleeplockGuard};
pub use spinlock::{Spinlock, SpinlockGuard};
