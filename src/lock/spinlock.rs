//! Mutual-exclusion lock for short, non-blocking critical sections.
//!
//! Backed by `spin::Mutex`, already a teacher dependency. Spec.md §5 calls
//! for a lock that "disables preemption and forbids sleeping inside the
//! section"; on a host thread the closest honest analogue is a busy-wait
//! lock that is never held across anything that can block, which is the
//! discipline the itable/dtable/ftable implementations in this crate follow.

pub struct Spinlock<T> {
    inner: spin::Mutex<T>,
}

pub type SpinlockGuard<'s, T> = spin::MutexGuard<'s, T>;

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: spin::Mutex::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        self.inner.lock()
    }
}
