// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Process-wide backend slot.
//!
//! Exactly one backend may be active per process. It is installed before
//! any other host call and never replaced.

use std::sync::OnceLock;

use crate::backend::Backend;
use crate::error::Error;

static ACTIVE: OnceLock<&'static dyn Backend> = OnceLock::new();

/// Install `backend` as the process's thread backend.
///
/// Installing the backend that is already active is a no-op, so every
/// thread may run its backend's initializer. Installing a different one
/// fails. Backends are told apart by [`Backend::name`] alone; the value
/// passed in a no-op install is not retained.
pub fn install(backend: &'static dyn Backend) -> Result<(), Error> {
    let active = *ACTIVE.get_or_init(|| {
        tracing::debug!(backend = backend.name(), "installing thread backend");
        backend
    });
    if active.name() == backend.name() {
        Ok(())
    } else {
        Err(Error::AlreadyInstalled {
            active: active.name(),
            requested: backend.name(),
        })
    }
}

/// The installed backend, if any.
pub fn try_backend() -> Option<&'static dyn Backend> {
    ACTIVE.get().copied()
}

/// The installed backend.
///
/// # Panics
/// If no backend was installed. The host must initialize one first.
pub fn backend() -> &'static dyn Backend {
    match try_backend() {
        Some(b) => b,
        None => panic!("ixp thread backend used before initialization"),
    }
}
