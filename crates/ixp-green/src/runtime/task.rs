// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduling units and their wake-up state machine.
//!
//! A unit is a stackless task owned by the local executor. The header is
//! shared with its wakers, which may be invoked from any thread; they only
//! flip the state and push the unit id onto the ready queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Wake, Waker};

use super::reactor::Reactor;

/// Identity of a scheduling unit.
///
/// Task ids start at 1 and are never reused within a process. Code running
/// on the OS thread outside any task is the unit [`UnitId::THREAD`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    pub const THREAD: UnitId = UnitId(0);

    pub(crate) fn from_raw(raw: u64) -> Self {
        UnitId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_task(self) -> bool {
        self != Self::THREAD
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_task() {
            write!(f, "task#{}", self.0)
        } else {
            f.write_str("thread")
        }
    }
}

/// Task lifecycle states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// In the ready queue.
    Ready = 0,
    /// Being polled.
    Running = 1,
    /// Woken while being polled; goes straight back to the ready queue.
    Notified = 2,
    /// Parked until a waker fires.
    Waiting = 3,
    Complete = 4,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Notified,
            3 => Self::Waiting,
            _ => Self::Complete,
        }
    }
}

/// FIFO of runnable units, shared by the executor and every waker.
pub(crate) struct ReadyQueue {
    queue: Mutex<VecDeque<UnitId>>,
    /// Executor is blocked in the reactor and needs an eventfd kick.
    parked: AtomicBool,
    reactor: Arc<Reactor>,
}

impl ReadyQueue {
    pub fn new(reactor: Arc<Reactor>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            parked: AtomicBool::new(false),
            reactor,
        }
    }

    pub fn push(&self, id: UnitId) {
        self.queue.lock().unwrap().push_back(id);
        if self.parked.load(Ordering::Acquire) {
            self.reactor.wake();
        }
    }

    pub fn pop(&self) -> Option<UnitId> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    pub fn set_parked(&self, parked: bool) {
        self.parked.store(parked, Ordering::Release);
    }
}

/// Header shared between the executor and the unit's wakers.
pub(crate) struct TaskHeader {
    pub id: UnitId,
    state: AtomicU8,
    ready: Arc<ReadyQueue>,
}

impl TaskHeader {
    /// New header in the `Ready` state. The caller enqueues the id.
    pub fn new(id: UnitId, ready: Arc<ReadyQueue>) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(TaskState::Ready as u8),
            ready,
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn begin_poll(&self) {
        self.state.store(TaskState::Running as u8, Ordering::Release);
    }

    /// Finish a poll. Returns true if the unit was woken during the poll
    /// and must be re-enqueued.
    pub fn end_poll(&self, completed: bool) -> bool {
        if completed {
            self.state.store(TaskState::Complete as u8, Ordering::Release);
            return false;
        }
        let parked = self.state.compare_exchange(
            TaskState::Running as u8,
            TaskState::Waiting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if parked.is_err() {
            // Running -> Notified happened under us.
            self.state.store(TaskState::Ready as u8, Ordering::Release);
            return true;
        }
        false
    }

    fn wake(&self) {
        loop {
            let current = self.state.load(Ordering::Acquire);
            let next = match TaskState::from_u8(current) {
                TaskState::Waiting => TaskState::Ready,
                TaskState::Running => TaskState::Notified,
                TaskState::Ready | TaskState::Notified | TaskState::Complete => return,
            };
            if self
                .state
                .compare_exchange(current, next as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if next == TaskState::Ready {
                    self.ready.push(self.id);
                }
                return;
            }
        }
    }
}

struct TaskWaker {
    header: Arc<TaskHeader>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.header.wake();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.header.wake();
    }
}

pub(crate) fn waker(header: Arc<TaskHeader>) -> Waker {
    Waker::from(Arc::new(TaskWaker { header }))
}
