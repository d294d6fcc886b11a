// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Reactor: epoll readiness plus a timer heap.
//!
//! Level-triggered epoll, but interest is dropped as soon as it fires: a
//! woken unit re-registers if it still has to wait. That keeps a readable
//! descriptor nobody is waiting on from spinning the loop.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::task::Waker;
use std::time::{Duration, Instant};

use ixp_thread::Interest;

/// Per-FD waiters, split by direction.
#[derive(Default)]
struct Registration {
    readers: Vec<Waker>,
    writers: Vec<Waker>,
    /// Events currently armed in epoll (0 = not in the epoll set).
    armed: u32,
}

impl Registration {
    fn wanted(&self) -> u32 {
        let mut events = 0;
        if !self.readers.is_empty() {
            events |= libc::EPOLLIN as u32;
        }
        if !self.writers.is_empty() {
            events |= libc::EPOLLOUT as u32;
        }
        events
    }
}

fn add_waker(list: &mut Vec<Waker>, waker: &Waker) {
    if !list.iter().any(|w| w.will_wake(waker)) {
        list.push(waker.clone());
    }
}

/// Handle to an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerKey(u64);

#[derive(Default)]
struct Timers {
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    /// Live timers. Cancelled keys stay in the heap until they surface.
    wakers: HashMap<u64, Waker>,
    next_key: u64,
}

impl Timers {
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, key))) = self.deadlines.peek().copied() {
            if self.wakers.contains_key(&key) {
                return Some(deadline);
            }
            self.deadlines.pop();
        }
        None
    }

    fn expire(&mut self, now: Instant, out: &mut Vec<Waker>) {
        while let Some(Reverse((deadline, key))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            if let Some(w) = self.wakers.remove(&key) {
                out.push(w);
            }
        }
    }
}

/// I/O and timer reactor for one executor.
pub(crate) struct Reactor {
    epoll_fd: RawFd,
    /// Eventfd for waking a parked executor from another thread.
    wake_fd: RawFd,
    registrations: Mutex<HashMap<RawFd, Registration>>,
    timers: Mutex<Timers>,
    max_events: usize,
}

impl Reactor {
    #[cfg(test)]
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(64)
    }

    /// Create a reactor that handles up to `max_events` events per turn.
    pub fn with_capacity(max_events: usize) -> io::Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll_fd) };
            return Err(err);
        }

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: wake_fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, wake_fd, &mut ev) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(wake_fd);
                libc::close(epoll_fd);
            }
            return Err(err);
        }

        Ok(Self {
            epoll_fd,
            wake_fd,
            registrations: Mutex::new(HashMap::new()),
            timers: Mutex::new(Timers::default()),
            max_events: max_events.max(1),
        })
    }

    /// Wake `waker` once `fd` is ready for `interest`.
    pub fn register(&self, fd: RawFd, interest: Interest, waker: &Waker) -> io::Result<()> {
        let mut regs = self.registrations.lock().unwrap();
        let reg = regs.entry(fd).or_default();
        if interest.readable() {
            add_waker(&mut reg.readers, waker);
        }
        if interest.writable() {
            add_waker(&mut reg.writers, waker);
        }
        let res = self.rearm(fd, reg);
        if res.is_err() || reg.armed == 0 {
            regs.remove(&fd);
        }
        res
    }

    /// Forget `waker` for `fd`. Used when a waiting future is dropped.
    pub fn deregister(&self, fd: RawFd, waker: &Waker) {
        let mut regs = self.registrations.lock().unwrap();
        let Some(reg) = regs.get_mut(&fd) else {
            return;
        };
        reg.readers.retain(|w| !w.will_wake(waker));
        reg.writers.retain(|w| !w.will_wake(waker));
        if let Err(err) = self.rearm(fd, reg) {
            tracing::warn!(fd, %err, "failed to update epoll interest");
        }
        if reg.armed == 0 {
            regs.remove(&fd);
        }
    }

    /// Bring the epoll set in line with the registration's wakers.
    fn rearm(&self, fd: RawFd, reg: &mut Registration) -> io::Result<()> {
        let wanted = reg.wanted();
        if wanted == reg.armed {
            return Ok(());
        }
        if wanted == 0 {
            let ret = unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
            };
            reg.armed = 0;
            if ret < 0 {
                let err = io::Error::last_os_error();
                // ENOENT / EBADF are expected if the FD was already closed.
                if err.raw_os_error() != Some(libc::ENOENT)
                    && err.raw_os_error() != Some(libc::EBADF)
                {
                    return Err(err);
                }
            }
            return Ok(());
        }

        let mut ev = libc::epoll_event {
            events: wanted,
            u64: fd as u64,
        };
        let op = if reg.armed == 0 {
            libc::EPOLL_CTL_ADD
        } else {
            libc::EPOLL_CTL_MOD
        };
        let mut ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) };
        if ret < 0 {
            // The kernel drops closed FDs from the set on its own, and a
            // reused FD number may or may not still be there.
            let retry = match io::Error::last_os_error().raw_os_error() {
                Some(libc::ENOENT) => Some(libc::EPOLL_CTL_ADD),
                Some(libc::EEXIST) => Some(libc::EPOLL_CTL_MOD),
                _ => None,
            };
            if let Some(op) = retry {
                ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) };
            }
        }
        if ret < 0 {
            reg.armed = 0;
            return Err(io::Error::last_os_error());
        }
        reg.armed = wanted;
        Ok(())
    }

    /// Arm a timer that wakes `waker` at `deadline`.
    pub fn add_timer(&self, deadline: Instant, waker: &Waker) -> TimerKey {
        let mut timers = self.timers.lock().unwrap();
        let key = timers.next_key;
        timers.next_key += 1;
        timers.deadlines.push(Reverse((deadline, key)));
        timers.wakers.insert(key, waker.clone());
        TimerKey(key)
    }

    /// Point an armed timer at a fresh waker. Returns false if it already fired.
    pub fn update_timer(&self, key: TimerKey, waker: &Waker) -> bool {
        let mut timers = self.timers.lock().unwrap();
        match timers.wakers.get_mut(&key.0) {
            Some(w) => {
                if !w.will_wake(waker) {
                    *w = waker.clone();
                }
                true
            }
            None => false,
        }
    }

    pub fn cancel_timer(&self, key: TimerKey) {
        self.timers.lock().unwrap().wakers.remove(&key.0);
    }

    /// Time until the nearest timer, `None` if no timer is armed.
    pub fn next_timeout(&self) -> Option<Duration> {
        let deadline = self.timers.lock().unwrap().next_deadline()?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    /// Nothing registered and no timer armed: no event can ever wake a unit.
    pub fn is_idle(&self) -> bool {
        self.registrations.lock().unwrap().is_empty()
            && self.timers.lock().unwrap().next_deadline().is_none()
    }

    /// Wait up to `timeout` (`None` = indefinitely) for events, then wake
    /// every unit whose descriptor or timer is ready. Returns the number
    /// of wakers fired.
    pub fn turn(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => {
                // Round up so a sub-millisecond timer does not spin.
                let mut ms = d.as_millis();
                if d > Duration::from_millis(ms as u64) {
                    ms += 1;
                }
                ms.min(i32::MAX as u128) as i32
            }
        };

        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; self.max_events];
        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                events.as_mut_ptr(),
                self.max_events as i32,
                timeout_ms,
            )
        };

        let n = if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
            0
        } else {
            n as usize
        };

        // Collect wakers under the locks, wake outside them.
        let mut to_wake = Vec::new();

        {
            let mut regs = self.registrations.lock().unwrap();
            for ev in &events[..n] {
                let fd = ev.u64 as RawFd;

                if fd == self.wake_fd {
                    let mut buf = [0u8; 8];
                    unsafe {
                        libc::read(self.wake_fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
                    }
                    continue;
                }

                let Some(reg) = regs.get_mut(&fd) else {
                    continue;
                };
                let failed = ev.events & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;
                if failed || ev.events & libc::EPOLLIN as u32 != 0 {
                    to_wake.append(&mut reg.readers);
                }
                if failed || ev.events & libc::EPOLLOUT as u32 != 0 {
                    to_wake.append(&mut reg.writers);
                }
                if let Err(err) = self.rearm(fd, reg) {
                    tracing::warn!(fd, %err, "failed to update epoll interest");
                }
                if reg.armed == 0 {
                    regs.remove(&fd);
                }
            }
        }

        self.timers
            .lock()
            .unwrap()
            .expire(Instant::now(), &mut to_wake);

        let woken = to_wake.len();
        if woken > 0 {
            tracing::trace!(woken, "reactor woke units");
        }
        for waker in to_wake {
            waker.wake();
        }
        Ok(woken)
    }

    /// Interrupt a blocking `turn`.
    pub fn wake(&self) {
        let val: u64 = 1;
        unsafe {
            libc::write(self.wake_fd, &val as *const u64 as *const libc::c_void, 8);
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let regs = self.registrations.get_mut().unwrap();
        for (&fd, reg) in regs.iter() {
            if reg.armed != 0 {
                unsafe {
                    libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
                }
            }
        }

        unsafe {
            libc::close(self.wake_fd);
            libc::close(self.epoll_fd);
        }
    }
}
