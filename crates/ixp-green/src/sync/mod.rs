// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Lock and rendezvous handles for green units.
//!
//! Handles are owned by the unit that created them and shared with other
//! units on the same runtime. Waiting parks the unit on a FIFO queue; the
//! unit that releases the lock grants it to the next waiter directly.

mod mutex;
mod rendez;
mod rwlock;
mod waitq;

pub use mutex::GreenMutex;
pub use rendez::GreenRendez;
pub use rwlock::GreenRwLock;
