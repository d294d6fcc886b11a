// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Concurrency interface of the ixp client library.
//!
//! The library never talks to a threading system directly. Every lock,
//! rendezvous, error buffer and blocking descriptor read/write goes through
//! the [`Backend`] installed at process start. Backends are interchangeable;
//! exactly one is active per process.
//!
//! Components:
//! - `backend`: the backend trait and one trait per handle kind
//! - `install`: the process-wide backend slot
//! - `sync`: host lock/rendezvous structs embedding a backend handle
//! - `io`: host entry points for yielding read/write/select
//! - `errbuf`: per-unit error message buffer and errstr helpers

pub mod backend;
pub mod errbuf;
pub mod error;
pub mod install;
pub mod io;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backend, BoxFuture, Interest, PollFd, RawMutex, RawRendez, RawRwLock, Readiness};
pub use errbuf::{errbuf, errstr, rerrstr, werrstr, ErrBuf, ERRMAX};
pub use error::Error;
pub use install::{backend, install, try_backend};
pub use sync::{Mutex, Rendez, RwLock};
