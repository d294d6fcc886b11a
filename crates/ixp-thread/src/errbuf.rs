// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-unit error message buffer.
//!
//! The host records the last error of each scheduling unit in a fixed-size,
//! NUL-terminated buffer owned by that unit. Which unit is "current" is the
//! backend's business; this module only defines the buffer and the host's
//! errstr helpers on top of the installed backend.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::install::backend;

/// Capacity of an error buffer in bytes, terminator included.
pub const ERRMAX: usize = 128;

/// Handle to one unit's error buffer.
///
/// Clones share the same storage; two handles refer to the same buffer iff
/// [`ErrBuf::same_buffer`] says so.
#[derive(Clone)]
pub struct ErrBuf {
    bytes: Rc<RefCell<[u8; ERRMAX]>>,
}

impl ErrBuf {
    pub fn new() -> Self {
        Self {
            bytes: Rc::new(RefCell::new([0; ERRMAX])),
        }
    }

    /// Store `msg`, truncated to `ERRMAX - 1` bytes on a char boundary.
    pub fn set(&self, msg: &str) {
        let mut end = msg.len().min(ERRMAX - 1);
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = self.bytes.borrow_mut();
        bytes[..end].copy_from_slice(&msg.as_bytes()[..end]);
        bytes[end] = 0;
    }

    /// Current message, up to the first NUL.
    pub fn get(&self) -> String {
        let bytes = self.bytes.borrow();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(ERRMAX);
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    pub fn clear(&self) {
        self.bytes.borrow_mut()[0] = 0;
    }

    /// Raw access to the whole buffer.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8; ERRMAX]) -> R) -> R {
        f(&mut self.bytes.borrow_mut())
    }

    pub fn same_buffer(&self, other: &ErrBuf) -> bool {
        Rc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl Default for ErrBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrBuf").field(&self.get()).finish()
    }
}

/// Error buffer of the calling unit.
pub fn errbuf() -> ErrBuf {
    backend().errbuf()
}

/// Last error message of the calling unit.
pub fn errstr() -> String {
    errbuf().get()
}

/// Record `msg` as the calling unit's error.
pub fn werrstr(msg: impl fmt::Display) {
    errbuf().set(&msg.to_string());
}

/// Copy the calling unit's error into `out`, NUL-terminated and truncated
/// to fit. Returns the number of message bytes copied.
pub fn rerrstr(out: &mut [u8]) -> usize {
    if out.is_empty() {
        return 0;
    }
    errbuf().with_bytes(|bytes| {
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(ERRMAX);
        let n = len.min(out.len() - 1);
        out[..n].copy_from_slice(&bytes[..n]);
        out[n] = 0;
        n
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn set_and_get() {
        let b = ErrBuf::new();
        assert_eq!(b.get(), "");
        b.set("file not found");
        assert_eq!(b.get(), "file not found");
        b.clear();
        assert_eq!(b.get(), "");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let b = ErrBuf::new();
        // 126 ASCII bytes then a 3-byte char straddling the limit.
        let msg = format!("{}€", "a".repeat(ERRMAX - 2));
        b.set(&msg);
        let got = b.get();
        assert_eq!(got.len(), ERRMAX - 2);
        assert!(got.chars().all(|c| c == 'a'));
    }

    #[test]
    fn clones_share_storage() {
        let a = ErrBuf::new();
        let b = a.clone();
        b.set("shared");
        assert_eq!(a.get(), "shared");
        assert!(a.same_buffer(&b));
        assert!(!a.same_buffer(&ErrBuf::new()));
    }

    #[test]
    fn werrstr_roundtrips_through_backend() {
        testing::install_stub();
        werrstr(format_args!("bad fid {}", 7));
        assert_eq!(errstr(), "bad fid 7");

        let mut out = [0xffu8; 4];
        let n = rerrstr(&mut out);
        assert_eq!(n, 3);
        assert_eq!(&out, b"bad\0");
    }
}
