// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Writer-preferring reader/writer lock.
//!
//! New readers queue behind a queued writer unless they already hold the
//! lock. The writer may re-enter for write and also take read locks; each
//! acquisition is undone by one `unlock`, read holds first.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::thread;

use ixp_thread::{BoxFuture, RawRwLock};

use super::waitq::{Slot, WaitQueue};
use crate::runtime::{current_unit, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

#[derive(Default)]
pub struct GreenRwLock {
    /// Read holds per unit.
    readers: RefCell<HashMap<UnitId, usize>>,
    writer: Cell<Option<UnitId>>,
    depth: Cell<usize>,
    read_queue: WaitQueue,
    write_queue: WaitQueue,
}

impl GreenRwLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writer(&self) -> Option<UnitId> {
        self.writer.get()
    }

    /// Total read holds across all units.
    pub fn readers(&self) -> usize {
        self.readers.borrow().values().sum()
    }

    pub fn queued_readers(&self) -> usize {
        self.read_queue.len()
    }

    pub fn queued_writers(&self) -> usize {
        self.write_queue.len()
    }

    fn holds_read(&self, unit: UnitId) -> bool {
        self.readers.borrow().contains_key(&unit)
    }

    fn add_reader(&self, unit: UnitId) {
        *self.readers.borrow_mut().entry(unit).or_default() += 1;
    }

    /// Drop one read hold of `unit`. False if it held none.
    fn remove_reader(&self, unit: UnitId) -> bool {
        let mut readers = self.readers.borrow_mut();
        let Some(count) = readers.get_mut(&unit) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            readers.remove(&unit);
        }
        true
    }

    fn grant_read_now(&self, unit: UnitId) -> bool {
        let held = self.writer.get() == Some(unit) || self.holds_read(unit);
        let free = self.writer.get().is_none() && self.write_queue.is_empty();
        if held || free {
            self.add_reader(unit);
            return true;
        }
        false
    }

    fn grant_write_now(&self, unit: UnitId) -> bool {
        if self.writer.get() == Some(unit) {
            self.depth.set(self.depth.get() + 1);
            return true;
        }
        if self.writer.get().is_none()
            && self.readers.borrow().is_empty()
            && self.write_queue.is_empty()
        {
            self.writer.set(Some(unit));
            self.depth.set(1);
            return true;
        }
        false
    }

    fn release_write(&self) {
        let depth = self.depth.get() - 1;
        self.depth.set(depth);
        if depth == 0 {
            self.writer.set(None);
        }
    }

    /// Hand the lock to whoever may have it now: the oldest writer once the
    /// lock is free, or every queued reader while no writer holds or waits.
    fn dispatch(&self) {
        if self.writer.get().is_some() {
            return;
        }
        if self.readers.borrow().is_empty() {
            if let Some(next) = self.write_queue.pop_front() {
                self.writer.set(Some(next.unit()));
                self.depth.set(1);
                next.grant();
                return;
            }
        }
        if self.write_queue.is_empty() {
            for next in self.read_queue.drain() {
                self.add_reader(next.unit());
                next.grant();
            }
        }
    }
}

impl RawRwLock for GreenRwLock {
    fn read_lock(&self) -> BoxFuture<'_, ()> {
        Box::pin(Acquire {
            lock: self,
            mode: Mode::Read,
            slot: None,
        })
    }

    fn try_read_lock(&self) -> bool {
        self.grant_read_now(current_unit())
    }

    fn write_lock(&self) -> BoxFuture<'_, ()> {
        Box::pin(Acquire {
            lock: self,
            mode: Mode::Write,
            slot: None,
        })
    }

    fn try_write_lock(&self) -> bool {
        self.grant_write_now(current_unit())
    }

    fn unlock(&self) {
        let me = current_unit();
        if !self.remove_reader(me) {
            if self.writer.get() != Some(me) {
                panic!("rwlock unlocked by {me}, which holds neither a read nor a write lock");
            }
            self.release_write();
        }
        self.dispatch();
    }
}

impl Drop for GreenRwLock {
    fn drop(&mut self) {
        let waiting = self.read_queue.len() + self.write_queue.len();
        if waiting > 0 && !thread::panicking() {
            panic!("rwlock destroyed with {waiting} waiters");
        }
    }
}

struct Acquire<'a> {
    lock: &'a GreenRwLock,
    mode: Mode,
    slot: Option<Rc<Slot>>,
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if let Some(slot) = &self.slot {
            if slot.is_granted() {
                self.slot = None;
                return Poll::Ready(());
            }
            slot.set_waker(cx.waker());
            return Poll::Pending;
        }

        let me = current_unit();
        let lock = self.lock;
        let slot = match self.mode {
            Mode::Read => {
                if lock.grant_read_now(me) {
                    return Poll::Ready(());
                }
                lock.read_queue.push(me)
            }
            Mode::Write => {
                if lock.grant_write_now(me) {
                    return Poll::Ready(());
                }
                if lock.holds_read(me) {
                    panic!("write lock requested by {me} while it holds a read lock");
                }
                lock.write_queue.push(me)
            }
        };
        slot.set_waker(cx.waker());
        tracing::trace!(unit = %me, mode = ?self.mode, "rwlock contended");
        self.slot = Some(slot);
        Poll::Pending
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let lock = self.lock;
        if slot.is_granted() {
            match self.mode {
                Mode::Read => {
                    lock.remove_reader(slot.unit());
                }
                Mode::Write => lock.release_write(),
            }
        } else {
            match self.mode {
                Mode::Read => lock.read_queue.remove(&slot),
                Mode::Write => lock.write_queue.remove(&slot),
            };
        }
        lock.dispatch();
    }
}
