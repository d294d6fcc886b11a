// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-unit stub backend for exercising the host layer.
//!
//! Futures complete on first poll; contention panics, since one unit can
//! never wait for another here.

use std::cell::Cell;
use std::future::{self, Future};
use std::io;
use std::os::unix::io::RawFd;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use crate::backend::{Backend, BoxFuture, PollFd, RawMutex, RawRendez, RawRwLock};
use crate::errbuf::ErrBuf;
use crate::install::install;

pub const STUB_NAME: &str = "stub";

pub struct StubBackend;
pub struct OtherBackend;

static STUB: StubBackend = StubBackend;

pub fn install_stub() {
    install(&STUB).expect("stub backend must be the only one installed");
}

struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

/// Poll `fut` once and require it to be ready.
pub fn poll_ready<F: Future>(fut: F) -> F::Output {
    let waker = Waker::from(Arc::new(NoopWaker));
    let mut cx = Context::from_waker(&waker);
    match pin!(fut).poll(&mut cx) {
        Poll::Ready(v) => v,
        Poll::Pending => panic!("stub backend future was not ready"),
    }
}

pub fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0i32; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    assert_eq!(ret, 0, "pipe2 failed");
    (fds[0], fds[1])
}

pub fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

thread_local! {
    static ERRBUF: ErrBuf = ErrBuf::new();
    static INTERRUPTED_WRITES: Cell<usize> = const { Cell::new(0) };
}

/// Make the next `n` stub writes on this thread fail with `EINTR`.
pub fn interrupt_next_writes(n: usize) {
    INTERRUPTED_WRITES.with(|c| c.set(n));
}

fn take_interrupt() -> bool {
    INTERRUPTED_WRITES.with(|c| {
        let left = c.get();
        if left > 0 {
            c.set(left - 1);
        }
        left > 0
    })
}

struct StubMutex(Cell<bool>);

impl RawMutex for StubMutex {
    fn lock(&self) -> BoxFuture<'_, ()> {
        assert!(self.try_lock(), "stub mutex contended");
        Box::pin(future::ready(()))
    }

    fn try_lock(&self) -> bool {
        !self.0.replace(true)
    }

    fn unlock(&self) {
        assert!(self.0.replace(false), "stub mutex not locked");
    }
}

#[derive(Default)]
struct StubRwLock {
    readers: Cell<usize>,
    writer: Cell<bool>,
}

impl RawRwLock for StubRwLock {
    fn read_lock(&self) -> BoxFuture<'_, ()> {
        assert!(self.try_read_lock(), "stub rwlock contended");
        Box::pin(future::ready(()))
    }

    fn try_read_lock(&self) -> bool {
        if self.writer.get() {
            return false;
        }
        self.readers.set(self.readers.get() + 1);
        true
    }

    fn write_lock(&self) -> BoxFuture<'_, ()> {
        assert!(self.try_write_lock(), "stub rwlock contended");
        Box::pin(future::ready(()))
    }

    fn try_write_lock(&self) -> bool {
        if self.writer.get() || self.readers.get() > 0 {
            return false;
        }
        self.writer.set(true);
        true
    }

    fn unlock(&self) {
        if self.readers.get() > 0 {
            self.readers.set(self.readers.get() - 1);
        } else {
            assert!(self.writer.replace(false), "stub rwlock not held");
        }
    }
}

struct StubRendez;

impl RawRendez for StubRendez {
    fn wait<'a>(&'a self, _mutex: &'a dyn RawMutex) -> BoxFuture<'a, ()> {
        panic!("a single unit cannot wait on a stub rendezvous")
    }

    fn signal(&self) -> bool {
        false
    }

    fn broadcast(&self) -> usize {
        0
    }
}

fn os_result(n: isize) -> io::Result<usize> {
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

impl Backend for StubBackend {
    fn name(&self) -> &'static str {
        STUB_NAME
    }

    fn new_mutex(&self) -> Box<dyn RawMutex> {
        Box::new(StubMutex(Cell::new(false)))
    }

    fn new_rwlock(&self) -> Box<dyn RawRwLock> {
        Box::new(StubRwLock::default())
    }

    fn new_rendez(&self) -> Box<dyn RawRendez> {
        Box::new(StubRendez)
    }

    fn errbuf(&self) -> ErrBuf {
        ERRBUF.with(|b| b.clone())
    }

    fn read<'a>(&'a self, fd: RawFd, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        Box::pin(future::ready(os_result(n)))
    }

    fn write<'a>(&'a self, fd: RawFd, buf: &'a [u8]) -> BoxFuture<'a, io::Result<usize>> {
        if take_interrupt() {
            return Box::pin(future::ready(Err(io::Error::from_raw_os_error(libc::EINTR))));
        }
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        Box::pin(future::ready(os_result(n)))
    }

    fn select<'a>(
        &'a self,
        _fds: &'a mut [PollFd],
        _timeout: Option<Duration>,
    ) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(future::ready(Ok(0)))
    }
}

impl Backend for OtherBackend {
    fn name(&self) -> &'static str {
        "other"
    }

    fn new_mutex(&self) -> Box<dyn RawMutex> {
        STUB.new_mutex()
    }

    fn new_rwlock(&self) -> Box<dyn RawRwLock> {
        STUB.new_rwlock()
    }

    fn new_rendez(&self) -> Box<dyn RawRendez> {
        STUB.new_rendez()
    }

    fn errbuf(&self) -> ErrBuf {
        STUB.errbuf()
    }

    fn read<'a>(&'a self, fd: RawFd, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        STUB.read(fd, buf)
    }

    fn write<'a>(&'a self, fd: RawFd, buf: &'a [u8]) -> BoxFuture<'a, io::Result<usize>> {
        STUB.write(fd, buf)
    }

    fn select<'a>(
        &'a self,
        fds: &'a mut [PollFd],
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, io::Result<usize>> {
        STUB.select(fds, timeout)
    }
}
