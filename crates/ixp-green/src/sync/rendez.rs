// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Rendezvous (condition variable).

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::thread;

use ixp_thread::{BoxFuture, RawMutex, RawRendez};

use super::waitq::{Slot, WaitQueue};
use crate::runtime::current_unit;

#[derive(Default)]
pub struct GreenRendez {
    waiters: WaitQueue,
}

impl GreenRendez {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }
}

impl RawRendez for GreenRendez {
    fn wait<'a>(&'a self, mutex: &'a dyn RawMutex) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            // Queue and release in one step: a signal sent once the mutex
            // is free always finds us.
            let slot = self.waiters.push(current_unit());
            mutex.unlock();
            Parked {
                queue: &self.waiters,
                slot: Some(slot),
            }
            .await;
            mutex.lock().await;
        })
    }

    fn signal(&self) -> bool {
        match self.waiters.pop_front() {
            Some(slot) => {
                slot.grant();
                true
            }
            None => false,
        }
    }

    fn broadcast(&self) -> usize {
        let woken = self.waiters.drain();
        for slot in &woken {
            slot.grant();
        }
        woken.len()
    }
}

impl Drop for GreenRendez {
    fn drop(&mut self) {
        if !self.waiters.is_empty() && !thread::panicking() {
            panic!("rendezvous destroyed with {} waiters", self.waiters.len());
        }
    }
}

struct Parked<'a> {
    queue: &'a WaitQueue,
    slot: Option<Rc<Slot>>,
}

impl Future for Parked<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(slot) = &self.slot else {
            return Poll::Ready(());
        };
        if slot.is_granted() {
            self.slot = None;
            return Poll::Ready(());
        }
        slot.set_waker(cx.waker());
        Poll::Pending
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        if !slot.is_granted() {
            self.queue.remove(&slot);
        } else if let Some(next) = self.queue.pop_front() {
            // The signal was meant for someone; give it to the next waiter.
            next.grant();
        }
    }
}
