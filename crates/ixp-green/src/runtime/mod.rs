// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative green-task runtime.
//!
//! Stackless tasks on a single-thread executor with an epoll reactor.
//! Every task is one scheduling unit of the thread backend.
//!
//! Components:
//! - `task`: unit ids, task state machine, waker
//! - `reactor`: epoll readiness + timers
//! - `scheduler`: executor loop, spawn, join
//! - `context`: which executor and unit are running on this thread

pub(crate) mod context;
pub(crate) mod reactor;
pub mod scheduler;
pub mod task;
mod yield_now;

pub use context::current_unit;
pub use scheduler::{spawn, JoinHandle, Runtime};
pub use task::UnitId;
pub use yield_now::{yield_now, YieldNow};
