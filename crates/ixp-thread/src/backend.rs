// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Backend traits.
//!
//! One trait per handle kind, each with the exact method set the host
//! calls. Operations that block return a [`BoxFuture`]: a backend suspends
//! the calling scheduling unit by returning `Pending`, never by blocking the
//! OS thread.

use std::future::Future;
use std::io;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::time::Duration;

use crate::errbuf::ErrBuf;

/// Type-erased future returned by blocking backend operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Mutual exclusion handle.
pub trait RawMutex {
    /// Suspend until the mutex is held by the caller.
    fn lock(&self) -> BoxFuture<'_, ()>;

    /// Take the mutex only if it is free right now.
    fn try_lock(&self) -> bool;

    /// Release the mutex. The caller must hold it.
    fn unlock(&self);
}

/// Reader/writer lock handle.
///
/// `unlock` releases whichever mode the caller holds; the host's
/// `runlock` and `wunlock` both end up here.
pub trait RawRwLock {
    fn read_lock(&self) -> BoxFuture<'_, ()>;
    fn try_read_lock(&self) -> bool;
    fn write_lock(&self) -> BoxFuture<'_, ()>;
    fn try_write_lock(&self) -> bool;
    fn unlock(&self);
}

/// Condition-variable handle, bound to a mutex at wait time.
pub trait RawRendez {
    /// Release `mutex`, suspend until signaled, then re-acquire `mutex`.
    ///
    /// The caller must hold `mutex`. Enqueueing and releasing happen
    /// without an intervening yield, so no signal can be lost between them.
    fn wait<'a>(&'a self, mutex: &'a dyn RawMutex) -> BoxFuture<'a, ()>;

    /// Wake the oldest waiter. Returns whether anyone was waiting.
    fn signal(&self) -> bool;

    /// Wake every current waiter. Returns how many were woken.
    fn broadcast(&self) -> usize;
}

/// Readiness a descriptor is waited on for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
    ReadWrite,
}

impl Interest {
    pub fn readable(self) -> bool {
        matches!(self, Interest::Readable | Interest::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Interest::Writable | Interest::ReadWrite)
    }
}

/// Readiness reported back by `select`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    /// Error or hang-up condition on the descriptor.
    pub error: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.readable || self.writable || self.error
    }
}

/// One entry of a `select` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollFd {
    pub fd: RawFd,
    pub interest: Interest,
    /// Filled in by `select`.
    pub ready: Readiness,
}

impl PollFd {
    pub fn new(fd: RawFd, interest: Interest) -> Self {
        Self {
            fd,
            interest,
            ready: Readiness::default(),
        }
    }
}

/// A complete concurrency backend.
///
/// Backends are installed once per process (see [`crate::install`]) and
/// must therefore be shareable; the handles they create belong to whoever
/// created them and need not be.
pub trait Backend: Send + Sync + 'static {
    /// Short name that identifies the backend at install time. Distinct
    /// backends must use distinct names: two values with the same name are
    /// treated as the same backend.
    fn name(&self) -> &'static str;

    fn new_mutex(&self) -> Box<dyn RawMutex>;
    fn new_rwlock(&self) -> Box<dyn RawRwLock>;
    fn new_rendez(&self) -> Box<dyn RawRendez>;

    /// Error buffer of the calling scheduling unit.
    fn errbuf(&self) -> ErrBuf;

    /// Read once from `fd`, yielding while it is not readable.
    fn read<'a>(&'a self, fd: RawFd, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>>;

    /// Write once to `fd`, yielding while it is not writable.
    fn write<'a>(&'a self, fd: RawFd, buf: &'a [u8]) -> BoxFuture<'a, io::Result<usize>>;

    /// Wait until at least one entry is ready or `timeout` passes.
    /// Returns the number of ready entries.
    fn select<'a>(
        &'a self,
        fds: &'a mut [PollFd],
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, io::Result<usize>>;
}
