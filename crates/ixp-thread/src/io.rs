// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Host entry points for yielding descriptor I/O.
//!
//! Thin forwarding to the installed backend. Failures are also recorded in
//! the calling unit's error buffer, as the host reports them through
//! `errstr`. `Interrupted` is the caller's cue to retry and is not recorded.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::backend::PollFd;
use crate::errbuf::werrstr;
use crate::install::backend;

fn note<T>(res: io::Result<T>) -> io::Result<T> {
    if let Err(ref e) = res {
        if e.kind() != io::ErrorKind::Interrupted {
            werrstr(e);
        }
    }
    res
}

/// Read once from `fd`. `Ok(0)` is end of file.
pub async fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    note(backend().read(fd, buf).await)
}

/// Write once to `fd`.
pub async fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    note(backend().write(fd, buf).await)
}

/// Write all of `buf`, retrying short and interrupted writes.
pub async fn write_all(fd: RawFd, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match write(fd, buf).await {
            Ok(0) => {
                let err = io::Error::new(io::ErrorKind::WriteZero, "write returned zero bytes");
                werrstr(&err);
                return Err(err);
            }
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Wait for readiness on any of `fds`. Returns the number ready.
pub async fn select(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    note(backend().select(fds, timeout).await)
}
