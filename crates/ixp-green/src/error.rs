// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime and backend setup errors.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// epoll or eventfd could not be created.
    #[error("failed to create reactor: {0}")]
    Reactor(#[from] io::Error),

    #[error(transparent)]
    Install(#[from] ixp_thread::Error),
}
