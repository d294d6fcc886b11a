// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Host synchronization structs.
//!
//! Each struct owns the backend handle it was created with (`aux`). The
//! handle is released exactly once, when the struct is dropped.

use std::fmt;

use crate::backend::{RawMutex, RawRendez, RawRwLock};
use crate::install::backend;

/// Host mutex.
pub struct Mutex {
    aux: Box<dyn RawMutex>,
}

impl Mutex {
    /// Create a mutex with the installed backend.
    pub fn new() -> Self {
        Self {
            aux: backend().new_mutex(),
        }
    }

    pub async fn lock(&self) {
        self.aux.lock().await
    }

    /// Take the lock if it is free. Returns whether it was taken.
    pub fn canlock(&self) -> bool {
        self.aux.try_lock()
    }

    pub fn unlock(&self) {
        self.aux.unlock()
    }

    /// The backend handle, for binding a [`Rendez`].
    pub fn raw(&self) -> &dyn RawMutex {
        &*self.aux
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex").finish_non_exhaustive()
    }
}

/// Host reader/writer lock.
pub struct RwLock {
    aux: Box<dyn RawRwLock>,
}

impl RwLock {
    pub fn new() -> Self {
        Self {
            aux: backend().new_rwlock(),
        }
    }

    pub async fn rlock(&self) {
        self.aux.read_lock().await
    }

    pub fn canrlock(&self) -> bool {
        self.aux.try_read_lock()
    }

    pub async fn wlock(&self) {
        self.aux.write_lock().await
    }

    pub fn canwlock(&self) -> bool {
        self.aux.try_write_lock()
    }

    pub fn runlock(&self) {
        self.aux.unlock()
    }

    pub fn wunlock(&self) {
        self.aux.unlock()
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock").finish_non_exhaustive()
    }
}

/// Host rendezvous, bound to the mutex that guards its condition.
pub struct Rendez<'m> {
    mutex: &'m Mutex,
    aux: Box<dyn RawRendez>,
}

impl<'m> Rendez<'m> {
    pub fn new(mutex: &'m Mutex) -> Self {
        Self {
            mutex,
            aux: backend().new_rendez(),
        }
    }

    pub fn mutex(&self) -> &'m Mutex {
        self.mutex
    }

    /// Release the mutex, wait for a wake, re-acquire the mutex.
    ///
    /// The mutex must be held. Wakes may be spurious from the caller's
    /// point of view; re-check the condition in a loop.
    pub async fn sleep(&self) {
        self.aux.wait(self.mutex.raw()).await
    }

    pub fn wake(&self) -> bool {
        self.aux.signal()
    }

    pub fn wake_all(&self) -> usize {
        self.aux.broadcast()
    }
}

impl fmt::Debug for Rendez<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rendez").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, poll_ready};

    #[test]
    fn mutex_delegates_to_backend() {
        testing::install_stub();
        let m = Mutex::new();
        poll_ready(m.lock());
        assert!(!m.canlock());
        m.unlock();
        assert!(m.canlock());
        m.unlock();
    }

    #[test]
    fn rwlock_unlock_names_share_one_release() {
        testing::install_stub();
        let rw = RwLock::new();
        poll_ready(rw.rlock());
        assert!(!rw.canwlock());
        rw.runlock();
        poll_ready(rw.wlock());
        assert!(!rw.canrlock());
        rw.wunlock();
        assert!(rw.canrlock());
        rw.runlock();
    }

    #[test]
    fn rendez_without_waiters() {
        testing::install_stub();
        let m = Mutex::new();
        let r = Rendez::new(&m);
        assert!(std::ptr::eq(r.mutex(), &m));
        assert!(!r.wake());
        assert_eq!(r.wake_all(), 0);
    }
}
