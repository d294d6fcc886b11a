// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Yielding descriptor I/O.
//!
//! A unit waits for readiness through the reactor, then performs the
//! syscall once. Readiness only promises that some progress is possible,
//! so `read` and `write` put the descriptor in non-blocking mode on first
//! use; a short or `EAGAIN` result then never stalls the thread. The mode
//! lives on the open file description and stays set afterwards.

use std::future::Future;
use std::io;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use ixp_thread::{Interest, PollFd, Readiness};

use crate::runtime::context;
use crate::runtime::reactor::{Reactor, TimerKey};
use crate::runtime::yield_now;

fn poll_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.readable() {
        events |= libc::POLLIN;
    }
    if interest.writable() {
        events |= libc::POLLOUT;
    }
    events
}

fn readiness(revents: libc::c_short) -> Readiness {
    Readiness {
        readable: revents & libc::POLLIN != 0,
        writable: revents & libc::POLLOUT != 0,
        error: revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0,
    }
}

/// Non-blocking readiness check of every entry. Fills `ready` and returns
/// how many entries are ready.
fn check_ready(fds: &mut [PollFd]) -> io::Result<usize> {
    let mut raw: Vec<libc::pollfd> = fds
        .iter()
        .map(|p| libc::pollfd {
            fd: p.fd,
            events: poll_events(p.interest),
            revents: 0,
        })
        .collect();

    let n = unsafe { libc::poll(raw.as_mut_ptr(), raw.len() as libc::nfds_t, 0) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }

    let mut count = 0;
    for (p, r) in fds.iter_mut().zip(&raw) {
        p.ready = readiness(r.revents);
        if p.ready.is_ready() {
            count += 1;
        }
    }
    Ok(count)
}

/// Future that completes once `fd` is ready for `interest`, or reports an
/// error or hang-up condition.
pub struct WaitFd {
    fd: RawFd,
    interest: Interest,
    registered: Option<(Arc<Reactor>, Waker)>,
}

impl WaitFd {
    fn deregister(&mut self) {
        if let Some((reactor, waker)) = self.registered.take() {
            reactor.deregister(self.fd, &waker);
        }
    }
}

impl Future for WaitFd {
    type Output = io::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut entry = [PollFd::new(self.fd, self.interest)];
        match check_ready(&mut entry) {
            Ok(0) => {}
            Ok(_) => {
                self.deregister();
                return Poll::Ready(Ok(()));
            }
            Err(err) => {
                self.deregister();
                return Poll::Ready(Err(err));
            }
        }

        let reactor = match self.registered.take() {
            Some((reactor, old)) => {
                if !old.will_wake(cx.waker()) {
                    reactor.deregister(self.fd, &old);
                }
                reactor
            }
            None => context::core().reactor().clone(),
        };
        if let Err(err) = reactor.register(self.fd, self.interest, cx.waker()) {
            self.deregister();
            return Poll::Ready(Err(err));
        }
        self.registered = Some((reactor, cx.waker().clone()));
        Poll::Pending
    }
}

impl Drop for WaitFd {
    fn drop(&mut self) {
        self.deregister();
    }
}

/// Suspend the calling unit until `fd` is ready for `interest`.
pub fn wait_fd(fd: RawFd, interest: Interest) -> WaitFd {
    WaitFd {
        fd,
        interest,
        registered: None,
    }
}

fn cvt(n: isize) -> io::Result<usize> {
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Wait for `interest` on `fd`, then run `op` once.
///
/// `WouldBlock` waits again. `Interrupted` yields once and is returned for
/// the caller to retry.
async fn transfer<F>(fd: RawFd, interest: Interest, mut op: F) -> io::Result<usize>
where
    F: FnMut() -> io::Result<usize>,
{
    set_nonblocking(fd)?;
    loop {
        wait_fd(fd, interest).await?;
        match op() {
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                yield_now().await;
                return Err(err);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Read once from `fd`, yielding while it is not readable.
///
/// `Ok(0)` is end of file. An interrupted read yields once and returns the
/// `Interrupted` error for the caller to retry.
pub async fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    transfer(fd, Interest::Readable, || {
        cvt(unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) })
    })
    .await
}

/// Write once to `fd`, yielding while it is not writable. May write less
/// than `buf`.
pub async fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    transfer(fd, Interest::Writable, || {
        cvt(unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) })
    })
    .await
}

/// Future behind [`select`].
pub struct Select<'a> {
    fds: &'a mut [PollFd],
    deadline: Option<Instant>,
    reactor: Option<Arc<Reactor>>,
    waker: Option<Waker>,
    timer: Option<TimerKey>,
}

impl Select<'_> {
    fn cleanup(&mut self) {
        let Some(reactor) = self.reactor.take() else {
            return;
        };
        if let Some(waker) = self.waker.take() {
            for p in self.fds.iter() {
                reactor.deregister(p.fd, &waker);
            }
        }
        if let Some(key) = self.timer.take() {
            reactor.cancel_timer(key);
        }
    }
}

impl Future for Select<'_> {
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match check_ready(this.fds) {
            Ok(0) => {}
            ready => {
                this.cleanup();
                return Poll::Ready(ready);
            }
        }
        if this.deadline.is_some_and(|d| Instant::now() >= d) {
            this.cleanup();
            return Poll::Ready(Ok(0));
        }

        let reactor = match this.reactor.take() {
            Some(reactor) => reactor,
            None => context::core().reactor().clone(),
        };
        if let Some(old) = this.waker.take() {
            if !old.will_wake(cx.waker()) {
                for p in this.fds.iter() {
                    reactor.deregister(p.fd, &old);
                }
            }
        }
        for p in this.fds.iter() {
            if let Err(err) = reactor.register(p.fd, p.interest, cx.waker()) {
                this.reactor = Some(reactor);
                this.waker = Some(cx.waker().clone());
                this.cleanup();
                return Poll::Ready(Err(err));
            }
        }
        if let Some(deadline) = this.deadline {
            let rearmed = match this.timer {
                Some(key) => reactor.update_timer(key, cx.waker()),
                None => false,
            };
            if !rearmed {
                this.timer = Some(reactor.add_timer(deadline, cx.waker()));
            }
        }
        this.reactor = Some(reactor);
        this.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Select<'_> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Wait until at least one entry of `fds` is ready or `timeout` passes.
///
/// Fills each entry's `ready` and returns the number of ready entries,
/// 0 on timeout. `None` waits indefinitely; `Some(Duration::ZERO)` polls.
pub fn select(fds: &mut [PollFd], timeout: Option<Duration>) -> Select<'_> {
    Select {
        fds,
        deadline: timeout.map(|t| Instant::now() + t),
        reactor: None,
        waker: None,
        timer: None,
    }
}

/// Put `fd` in non-blocking mode, if it is not already.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{spawn, Runtime};
    use crate::time::sleep;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn pipe(flags: libc::c_int) -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), flags | libc::O_CLOEXEC) };
        assert_eq!(ret, 0);
        (fds[0], fds[1])
    }

    fn close(fds: &[RawFd]) {
        for &fd in fds {
            unsafe { libc::close(fd) };
        }
    }

    #[test]
    fn read_waits_for_writer_unit() {
        // Blocking descriptors: a naive read would hang the whole thread.
        let (r, w) = pipe(0);
        let rt = Runtime::new().unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        let got = rt.block_on({
            let log = log.clone();
            async move {
                let reader = {
                    let log = log.clone();
                    spawn(async move {
                        log.borrow_mut().push("read start");
                        let mut buf = [0u8; 32];
                        let n = read(r, &mut buf).await.unwrap();
                        log.borrow_mut().push("read done");
                        buf[..n].to_vec()
                    })
                };
                let writer = {
                    let log = log.clone();
                    spawn(async move {
                        log.borrow_mut().push("write");
                        write(w, b"Rversion").await.unwrap()
                    })
                };
                assert_eq!(writer.await, 8);
                reader.await
            }
        });

        assert_eq!(got, b"Rversion");
        assert_eq!(*log.borrow(), vec!["read start", "write", "read done"]);
        close(&[r, w]);
    }

    #[test]
    fn read_reports_eof() {
        let (r, w) = pipe(libc::O_NONBLOCK);
        close(&[w]);
        let rt = Runtime::new().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(rt.block_on(read(r, &mut buf)).unwrap(), 0);
        close(&[r]);
    }

    #[test]
    fn write_waits_for_room() {
        let (r, w) = pipe(libc::O_NONBLOCK);
        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            // Fill the pipe until the kernel refuses more.
            let chunk = [7u8; 4096];
            loop {
                let n = unsafe { libc::write(w, chunk.as_ptr() as *const libc::c_void, chunk.len()) };
                if n < 0 {
                    break;
                }
            }
            let drainer = spawn(async move {
                let mut buf = [0u8; 65536];
                read(r, &mut buf).await.unwrap()
            });
            let n = write(w, b"x").await.unwrap();
            assert_eq!(n, 1);
            assert!(drainer.await > 0);
        });
        close(&[r, w]);
    }

    #[test]
    fn bad_descriptor_is_an_error() {
        let rt = Runtime::new().unwrap();
        let mut buf = [0u8; 4];
        let err = rt.block_on(read(-1, &mut buf)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn select_reports_ready_entries() {
        let (r1, w1) = pipe(0);
        let (r2, w2) = pipe(0);
        let rt = Runtime::new().unwrap();
        let fds = rt.block_on(async move {
            spawn(async move {
                sleep(Duration::from_millis(5)).await;
                write(w2, b"!").await.unwrap();
            });
            let mut fds = [
                PollFd::new(r1, Interest::Readable),
                PollFd::new(r2, Interest::Readable),
            ];
            let n = select(&mut fds, None).await.unwrap();
            assert_eq!(n, 1);
            fds
        });
        assert!(!fds[0].ready.is_ready());
        assert!(fds[1].ready.readable);
        close(&[r1, w1, r2, w2]);
    }

    #[test]
    fn select_times_out() {
        let (r, w) = pipe(0);
        let rt = Runtime::new().unwrap();
        let started = Instant::now();
        let n = rt
            .block_on(async move {
                let mut fds = [PollFd::new(r, Interest::Readable)];
                select(&mut fds, Some(Duration::from_millis(15))).await
            })
            .unwrap();
        assert_eq!(n, 0);
        assert!(started.elapsed() >= Duration::from_millis(15));
        close(&[r, w]);
    }

    #[test]
    fn select_zero_timeout_polls() {
        let (r, w) = pipe(0);
        let rt = Runtime::new().unwrap();
        let n = rt
            .block_on(async move {
                let mut fds = [
                    PollFd::new(r, Interest::Readable),
                    PollFd::new(w, Interest::Writable),
                ];
                select(&mut fds, Some(Duration::ZERO)).await
            })
            .unwrap();
        assert_eq!(n, 1);
        close(&[r, w]);
    }

    #[test]
    fn set_nonblocking_sets_flag() {
        let (r, w) = pipe(0);
        set_nonblocking(r).unwrap();
        let flags = unsafe { libc::fcntl(r, libc::F_GETFL) };
        assert_ne!(flags & libc::O_NONBLOCK, 0);
        close(&[r, w]);
    }

    #[test]
    fn read_switches_descriptor_to_nonblocking() {
        let (r, w) = pipe(0);
        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            write(w, b"x").await.unwrap();
            let mut buf = [0u8; 1];
            read(r, &mut buf).await.unwrap();
        });
        for fd in [r, w] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
            assert_ne!(flags & libc::O_NONBLOCK, 0);
        }
        close(&[r, w]);
    }

    #[test]
    fn large_write_to_blocking_pipe_lets_reader_run() {
        const TOTAL: usize = 200_000;
        let (r, w) = pipe(0);
        let rt = Runtime::new().unwrap();
        let received = rt.block_on(async move {
            let reader = spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut total = 0;
                while total < TOTAL {
                    let n = read(r, &mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    assert!(buf[..n].iter().all(|&b| b == 1));
                    total += n;
                }
                total
            });
            let data = vec![1u8; TOTAL];
            let mut sent = 0;
            while sent < TOTAL {
                sent += write(w, &data[sent..]).await.unwrap();
            }
            reader.await
        });
        assert_eq!(received, TOTAL);
        close(&[r, w]);
    }

    #[test]
    fn select_leaves_no_registration_behind() {
        let (ra, wa) = pipe(0);
        let (rb, wb) = pipe(0);
        let rt = Runtime::new().unwrap();
        let (n, idle) = rt.block_on(async move {
            // Both wait on `ra`; the consumer takes the byte, so the
            // selector wakes, finds nothing, waits again and times out.
            let consumer = spawn(async move {
                let mut buf = [0u8; 1];
                read(ra, &mut buf).await.unwrap()
            });
            let selector = spawn(async move {
                let mut fds = [
                    PollFd::new(ra, Interest::Readable),
                    PollFd::new(rb, Interest::Readable),
                ];
                select(&mut fds, Some(Duration::from_millis(30))).await.unwrap()
            });
            yield_now().await;
            write(wa, b"x").await.unwrap();
            assert_eq!(consumer.await, 1);
            let n = selector.await;
            (n, context::core().reactor().is_idle())
        });
        assert_eq!(n, 0);
        assert!(idle);
        close(&[ra, wa, rb, wb]);
    }

    #[test]
    fn interrupted_transfer_yields_once_then_reports() {
        let (r, w) = pipe(0);
        let rt = Runtime::new().unwrap();
        let (err, other_ran) = rt.block_on(async move {
            let ran = Rc::new(Cell::new(false));
            let other = {
                let ran = ran.clone();
                spawn(async move { ran.set(true) })
            };
            let err = transfer(w, Interest::Writable, || {
                Err(io::Error::from_raw_os_error(libc::EINTR))
            })
            .await
            .unwrap_err();
            let seen = ran.get();
            other.await;
            (err, seen)
        });
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert!(other_ran);
        close(&[r, w]);
    }

    #[test]
    fn would_block_waits_again() {
        let (r, w) = pipe(0);
        let rt = Runtime::new().unwrap();
        let (n, calls) = rt.block_on(async move {
            let mut calls = 0;
            let n = transfer(w, Interest::Writable, || {
                calls += 1;
                if calls == 1 {
                    Err(io::ErrorKind::WouldBlock.into())
                } else {
                    Ok(5)
                }
            })
            .await
            .unwrap();
            (n, calls)
        });
        assert_eq!((n, calls), (5, 2));
        close(&[r, w]);
    }
}
