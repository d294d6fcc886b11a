// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Hand-off mutex.
//!
//! Unlock passes ownership straight to the oldest waiter, so a unit that
//! keeps re-locking cannot barge ahead of the queue.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::thread;

use ixp_thread::{BoxFuture, RawMutex};

use super::waitq::{Slot, WaitQueue};
use crate::runtime::{current_unit, UnitId};

#[derive(Default)]
pub struct GreenMutex {
    owner: Cell<Option<UnitId>>,
    waiters: WaitQueue,
}

impl GreenMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> Option<UnitId> {
        self.owner.get()
    }

    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Give the mutex to the next waiter, or leave it free.
    fn release(&self) {
        match self.waiters.pop_front() {
            Some(next) => {
                self.owner.set(Some(next.unit()));
                next.grant();
            }
            None => self.owner.set(None),
        }
    }
}

impl RawMutex for GreenMutex {
    fn lock(&self) -> BoxFuture<'_, ()> {
        Box::pin(Lock {
            mutex: self,
            slot: None,
        })
    }

    fn try_lock(&self) -> bool {
        if self.owner.get().is_some() || !self.waiters.is_empty() {
            return false;
        }
        self.owner.set(Some(current_unit()));
        true
    }

    fn unlock(&self) {
        let me = current_unit();
        match self.owner.get() {
            None => panic!("unlock of unlocked mutex by {me}"),
            Some(owner) if owner != me => {
                panic!("mutex owned by {owner} unlocked by {me}")
            }
            Some(_) => self.release(),
        }
    }
}

impl Drop for GreenMutex {
    fn drop(&mut self) {
        if !self.waiters.is_empty() && !thread::panicking() {
            panic!("mutex destroyed with {} waiters", self.waiters.len());
        }
    }
}

struct Lock<'a> {
    mutex: &'a GreenMutex,
    slot: Option<Rc<Slot>>,
}

impl Future for Lock<'_> {
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
        let mutex = self.mutex;
        match mutex.owner.get() {
            Some(owner) if owner == me => panic!("recursive locking by {me}"),
            None if mutex.waiters.is_empty() => {
                mutex.owner.set(Some(me));
                return Poll::Ready(());
            }
            _ => {}
        }

        let slot = mutex.waiters.push(me);
        slot.set_waker(cx.waker());
        tracing::trace!(unit = %me, queued = mutex.waiters.len(), "mutex contended");
        self.slot = Some(slot);
        Poll::Pending
    }
}

impl Drop for Lock<'_> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        if slot.is_granted() {
            // Handed the mutex but never saw it: pass it on.
            self.mutex.release();
        } else {
            self.mutex.waiters.remove(&slot);
        }
    }
}
