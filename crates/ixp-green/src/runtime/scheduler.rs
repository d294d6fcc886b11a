// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-thread cooperative executor.
//!
//! One OS thread, many units. Units run in FIFO order off the ready queue;
//! after `tick_budget` polls, or when nothing is runnable, the executor
//! turns the reactor. When nothing is runnable it blocks there until a
//! descriptor, a timer or a cross-thread wake makes a unit ready.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::pin::{pin, Pin};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use ixp_thread::ErrBuf;

use super::context;
use super::reactor::Reactor;
use super::task::{self, ReadyQueue, TaskHeader, UnitId};
use crate::config::Config;
use crate::error::Error;

type LocalBoxFuture = Pin<Box<dyn Future<Output = ()>>>;

static NEXT_UNIT: AtomicU64 = AtomicU64::new(1);

fn next_unit() -> UnitId {
    UnitId::from_raw(NEXT_UNIT.fetch_add(1, Ordering::Relaxed))
}

struct Task {
    header: Arc<TaskHeader>,
    /// One waker per task, so `will_wake` holds across polls.
    waker: Waker,
    /// Taken out while the task is being polled.
    future: Option<LocalBoxFuture>,
}

/// Executor state shared by the runtime handle and the thread context.
pub(crate) struct Core {
    config: Config,
    ready: Arc<ReadyQueue>,
    reactor: Arc<Reactor>,
    tasks: RefCell<HashMap<UnitId, Task>>,
    errbufs: RefCell<HashMap<UnitId, ErrBuf>>,
    polls: Cell<u64>,
}

impl Core {
    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.reactor
    }

    /// Error buffer of `unit`, created on first use.
    pub fn errbuf(&self, unit: UnitId) -> ErrBuf {
        self.errbufs
            .borrow_mut()
            .entry(unit)
            .or_default()
            .clone()
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
    {
        let id = next_unit();
        let state = Rc::new(RefCell::new(JoinState {
            output: None,
            waiter: None,
        }));

        let slot = state.clone();
        let wrapped = async move {
            let output = future.await;
            let waiter = {
                let mut st = slot.borrow_mut();
                st.output = Some(output);
                st.waiter.take()
            };
            if let Some(w) = waiter {
                w.wake();
            }
        };

        let header = TaskHeader::new(id, self.ready.clone());
        let waker = task::waker(header.clone());
        self.tasks.borrow_mut().insert(
            id,
            Task {
                header,
                waker,
                future: Some(Box::pin(wrapped)),
            },
        );
        self.ready.push(id);
        tracing::trace!(unit = %id, "spawned");

        JoinHandle { id, state }
    }

    /// Poll one spawned unit.
    fn poll_task(&self, id: UnitId) {
        let (header, waker, mut future) = {
            let mut tasks = self.tasks.borrow_mut();
            let Some(task) = tasks.get_mut(&id) else {
                return;
            };
            let Some(future) = task.future.take() else {
                return;
            };
            (task.header.clone(), task.waker.clone(), future)
        };

        header.begin_poll();
        self.polls.set(self.polls.get() + 1);
        let polled = {
            let _unit = context::set_unit(id);
            future.as_mut().poll(&mut Context::from_waker(&waker))
        };

        match polled {
            Poll::Ready(()) => {
                header.end_poll(true);
                self.tasks.borrow_mut().remove(&id);
                let errbuf = self.errbufs.borrow_mut().remove(&id);
                drop(errbuf);
                tracing::trace!(unit = %id, "completed");
                drop(future);
            }
            Poll::Pending => {
                if let Some(task) = self.tasks.borrow_mut().get_mut(&id) {
                    task.future = Some(future);
                }
                if header.end_poll(false) {
                    self.ready.push(id);
                }
            }
        }
    }

    /// Nothing left to poll this tick: wait for the reactor.
    fn park(&self) {
        let mut timeout = if self.ready.is_empty() {
            self.reactor.next_timeout()
        } else {
            Some(Duration::ZERO)
        };

        if timeout.is_none() && self.config.detect_deadlock && self.reactor.is_idle() {
            panic!(
                "deadlock: every scheduling unit is blocked ({} spawned tasks pending) \
                 and no descriptor or timer can wake one",
                self.tasks.borrow().len()
            );
        }

        self.ready.set_parked(true);
        if !self.ready.is_empty() {
            // A cross-thread wake landed before we were marked parked.
            timeout = Some(Duration::ZERO);
        }
        let turned = self.reactor.turn(timeout);
        self.ready.set_parked(false);

        if let Err(err) = turned {
            panic!("green runtime reactor failed: {err}");
        }
    }
}

struct JoinState<T> {
    output: Option<T>,
    waiter: Option<Waker>,
}

/// Handle to a spawned unit; resolves to its output.
///
/// Dropping the handle detaches the unit, which keeps running.
pub struct JoinHandle<T> {
    id: UnitId,
    state: Rc<RefCell<JoinState<T>>>,
}

impl<T> JoinHandle<T> {
    pub fn unit(&self) -> UnitId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.state.borrow().output.is_some()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut st = self.state.borrow_mut();
        if let Some(output) = st.output.take() {
            return Poll::Ready(output);
        }
        match &st.waiter {
            Some(w) if w.will_wake(cx.waker()) => {}
            _ => st.waiter = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

/// The cooperative scheduler that backs the green thread backend.
pub struct Runtime {
    core: Rc<Core>,
}

impl Runtime {
    pub fn new() -> Result<Self, Error> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self, Error> {
        let reactor = Arc::new(Reactor::with_capacity(config.max_events)?);
        let ready = Arc::new(ReadyQueue::new(reactor.clone()));
        tracing::debug!(?config, "green runtime created");
        Ok(Self {
            core: Rc::new(Core {
                config,
                ready,
                reactor,
                tasks: RefCell::new(HashMap::new()),
                errbufs: RefCell::new(HashMap::new()),
                polls: Cell::new(0),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.core.config
    }

    /// Spawn a unit. It starts running at the next `block_on`.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
    {
        self.core.spawn(future)
    }

    /// Spawned units that have not finished.
    pub fn pending_tasks(&self) -> usize {
        self.core.tasks.borrow().len()
    }

    /// Total polls of spawned units so far.
    pub fn polls(&self) -> u64 {
        self.core.polls.get()
    }

    /// Run `future` as the root unit, driving every other unit until it
    /// completes.
    ///
    /// # Panics
    /// If called while a runtime is already running on this thread, if any
    /// unit panics, or (with deadlock detection on) if every unit is
    /// blocked with nothing left to wake them.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let core = &self.core;
        let _enter = context::enter(core.clone());

        let root = TaskHeader::new(next_unit(), core.ready.clone());
        let root_waker = task::waker(root.clone());
        let mut future = pin!(future);
        core.ready.push(root.id);
        tracing::debug!(unit = %root.id, "block_on started");

        loop {
            for _ in 0..core.config.tick_budget {
                let Some(id) = core.ready.pop() else {
                    break;
                };
                if id != root.id {
                    core.poll_task(id);
                    continue;
                }

                root.begin_poll();
                let polled = {
                    let _unit = context::set_unit(root.id);
                    future.as_mut().poll(&mut Context::from_waker(&root_waker))
                };
                match polled {
                    Poll::Ready(output) => {
                        root.end_poll(true);
                        let errbuf = core.errbufs.borrow_mut().remove(&root.id);
                        drop(errbuf);
                        tracing::debug!(unit = %root.id, "block_on finished");
                        return output;
                    }
                    Poll::Pending => {
                        if root.end_poll(false) {
                            core.ready.push(root.id);
                        }
                    }
                }
            }
            core.park();
        }
    }
}

/// Spawn a unit on the runtime driving this thread.
///
/// # Panics
/// Outside `Runtime::block_on`.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + 'static,
{
    context::core().spawn(future)
}
