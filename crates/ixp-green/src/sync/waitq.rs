// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! FIFO queue of suspended units.
//!
//! A waiter owns an `Rc<Slot>`; the queue holds the other reference. Whoever
//! pops a slot grants it, which wakes the waiter. A waiter that is dropped
//! while still queued removes its own slot.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::task::Waker;

use crate::runtime::UnitId;

pub(crate) struct Slot {
    unit: UnitId,
    granted: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl Slot {
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn is_granted(&self) -> bool {
        self.granted.get()
    }

    /// Mark granted and wake the waiter.
    pub fn grant(&self) {
        self.granted.set(true);
        let waker = self.waker.borrow_mut().take();
        if let Some(w) = waker {
            w.wake();
        }
    }

    pub fn set_waker(&self, waker: &Waker) {
        let mut slot = self.waker.borrow_mut();
        match &*slot {
            Some(w) if w.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }
}

#[derive(Default)]
pub(crate) struct WaitQueue {
    slots: RefCell<VecDeque<Rc<Slot>>>,
}

impl WaitQueue {
    /// Enqueue `unit` at the back.
    pub fn push(&self, unit: UnitId) -> Rc<Slot> {
        let slot = Rc::new(Slot {
            unit,
            granted: Cell::new(false),
            waker: RefCell::new(None),
        });
        self.slots.borrow_mut().push_back(slot.clone());
        slot
    }

    pub fn pop_front(&self) -> Option<Rc<Slot>> {
        self.slots.borrow_mut().pop_front()
    }

    /// Remove `slot` if still queued.
    pub fn remove(&self, slot: &Rc<Slot>) -> bool {
        let mut slots = self.slots.borrow_mut();
        match slots.iter().position(|s| Rc::ptr_eq(s, slot)) {
            Some(i) => {
                slots.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn drain(&self) -> Vec<Rc<Slot>> {
        self.slots.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }
}
