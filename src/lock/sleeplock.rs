//! Long-term, blocking lock for per-inode critical sections that may
//! perform disk I/O.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

enum State {
    Unlocked,
    Locked(ThreadId),
}

pub struct Sleeplock<T> {
    state: Mutex<State>,
    cond: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through a `SleeplockGuard`,
// which is only constructed while `state` holds this thread's id.
unsafe impl<T: Send> Send for Sleeplock<T> {}
unsafe impl<T: Send> Sync for Sleeplock<T> {}

impl<T> Sleeplock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            state: Mutex::new(State::Unlocked),
            cond: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquires the lock, suspending the calling thread while it is held
    /// elsewhere.
    pub fn lock(&self) -> SleeplockGuard<'_, T> {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();
        loop {
            match *state {
                State::Unlocked => {
                    *state = State::Locked(me);
                    break;
                }
                State::Locked(_) => {
                    state = self.cond.wait(state).unwrap();
                }
            }
        }
        SleeplockGuard { lock: self }
    }

    /// Returns whether the calling thread currently holds the lock.
    pub fn holding(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Locked(id) if id == thread::current().id())
    }

    /// Raw access to the protected data without acquiring the lock.
    ///
    /// # Safety
    ///
    /// The caller must already hold the lock (e.g. hold a `SleeplockGuard`
    /// for this instance) or have exclusive access by other means.
    pub unsafe fn get_mut_raw(&self) -> *mut T {
        self.data.get()
    }

    /// Access to the protected data when the caller has exclusive `&mut`
    /// access to the lock itself (no locking needed).
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: `&mut self` proves exclusive access.
        unsafe { &mut *self.data.get() }
    }
}

pub struct SleeplockGuard<'s, T> {
    lock: &'s Sleeplock<T>,
}

impl<T> Deref for SleeplockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this guard's existence proves the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleeplockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: this guard's existence proves the lock is held.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SleeplockGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap();
        assert!(
            matches!(*state, State::Locked(id) if id == thread::current().id()),
            "releasing a sleeplock this thread does not hold"
        );
        *state = State::Unlocked;
        self.lock.cond.notify_all();
    }
}
