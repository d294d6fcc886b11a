// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-thread runtime context.
//!
//! Which executor is driving this thread, and which unit it is polling.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::scheduler::Core;
use super::task::UnitId;

thread_local! {
    static CORE: RefCell<Option<Rc<Core>>> = const { RefCell::new(None) };
    static UNIT: Cell<UnitId> = const { Cell::new(UnitId::THREAD) };
}

/// The scheduling unit currently running on this thread.
pub fn current_unit() -> UnitId {
    UNIT.with(|u| u.get())
}

pub(crate) fn try_core() -> Option<Rc<Core>> {
    CORE.with(|c| c.borrow().clone())
}

/// The executor driving this thread.
///
/// # Panics
/// Outside `Runtime::block_on`.
pub(crate) fn core() -> Rc<Core> {
    match try_core() {
        Some(core) => core,
        None => panic!("no green runtime is running on this thread"),
    }
}

/// Marks the thread as driven by `core` until dropped.
pub(crate) struct EnterGuard(());

pub(crate) fn enter(core: Rc<Core>) -> EnterGuard {
    CORE.with(|c| {
        let mut slot = c.borrow_mut();
        if slot.is_some() {
            panic!("green runtime entered twice on one thread (nested block_on)");
        }
        *slot = Some(core);
    });
    EnterGuard(())
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let core = CORE.with(|c| c.borrow_mut().take());
        UNIT.with(|u| u.set(UnitId::THREAD));
        drop(core);
    }
}

/// Marks `unit` as running until dropped.
pub(crate) struct UnitGuard {
    prev: UnitId,
}

pub(crate) fn set_unit(unit: UnitId) -> UnitGuard {
    let prev = UNIT.with(|u| u.replace(unit));
    UnitGuard { prev }
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        UNIT.with(|u| u.set(self.prev));
    }
}
