// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Green-task thread backend for ixp.
//!
//! Scheduling units are tasks on a single-thread cooperative [`Runtime`].
//! Locks hand off to queued tasks, descriptor I/O waits on an epoll reactor
//! instead of blocking the thread, and each task has its own error buffer.
//!
//! ```no_run
//! use ixp_thread::Mutex;
//!
//! ixp_green::init().unwrap();
//! let rt = ixp_green::Runtime::new().unwrap();
//! rt.block_on(async {
//!     let m = Mutex::new();
//!     m.lock().await;
//!     m.unlock();
//! });
//! ```

pub mod backend;
pub mod config;
pub mod errbuf;
pub mod error;
pub mod io;
pub mod runtime;
pub mod sync;
pub mod time;

pub use backend::{init, GreenBackend, BACKEND};
pub use config::Config;
pub use error::Error;
pub use runtime::{current_unit, spawn, yield_now, JoinHandle, Runtime, UnitId};
pub use time::{sleep, sleep_until};
