// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Unit-local error buffers.

use ixp_thread::ErrBuf;

use crate::runtime::{context, current_unit};

thread_local! {
    /// Buffer of the thread itself, outside any green unit.
    static THREAD_ERRBUF: ErrBuf = ErrBuf::new();
}

/// Error buffer of the calling unit.
///
/// Tasks get their own buffer from the runtime, created on first use and
/// freed when the task completes. Code running outside a task shares one
/// buffer per OS thread.
pub fn errbuf() -> ErrBuf {
    let unit = current_unit();
    match context::try_core() {
        Some(core) if unit.is_task() => core.errbuf(unit),
        _ => THREAD_ERRBUF.with(|b| b.clone()),
    }
}
