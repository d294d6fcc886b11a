// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The green thread backend.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use ixp_thread::{Backend, BoxFuture, ErrBuf, PollFd, RawMutex, RawRendez, RawRwLock};

use crate::error::Error;
use crate::sync::{GreenMutex, GreenRendez, GreenRwLock};
use crate::{errbuf, io as gio};

pub const NAME: &str = "green";

/// Backend whose scheduling units are the tasks of a [`crate::Runtime`].
///
/// Blocking operations suspend the calling task; they must be awaited from
/// inside `Runtime::block_on`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreenBackend;

pub static BACKEND: GreenBackend = GreenBackend;

impl Backend for GreenBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn new_mutex(&self) -> Box<dyn RawMutex> {
        Box::new(GreenMutex::new())
    }

    fn new_rwlock(&self) -> Box<dyn RawRwLock> {
        Box::new(GreenRwLock::new())
    }

    fn new_rendez(&self) -> Box<dyn RawRendez> {
        Box::new(GreenRendez::new())
    }

    fn errbuf(&self) -> ErrBuf {
        errbuf::errbuf()
    }

    fn read<'a>(&'a self, fd: RawFd, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(gio::read(fd, buf))
    }

    fn write<'a>(&'a self, fd: RawFd, buf: &'a [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(gio::write(fd, buf))
    }

    fn select<'a>(
        &'a self,
        fds: &'a mut [PollFd],
        timeout: Option<Duration>,
    ) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(gio::select(fds, timeout))
    }
}

/// Install the green backend as the process's thread backend.
///
/// Safe to call more than once; fails if another backend is active.
pub fn init() -> Result<(), Error> {
    ixp_thread::install(&BACKEND)?;
    tracing::debug!(backend = NAME, "thread backend ready");
    Ok(())
}
