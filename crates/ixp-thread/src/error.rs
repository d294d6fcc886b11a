// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Backend setup errors.

use thiserror::Error;

/// Errors from installing a backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Another backend already owns the process.
    #[error("cannot install thread backend `{requested}`: `{active}` is already active")]
    AlreadyInstalled {
        active: &'static str,
        requested: &'static str,
    },
}
