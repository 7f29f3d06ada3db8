//! Errno-style error codes and the per-thread last-error slot.
//!
//! Codes use the Linux numbering for POSIX errors. `EFSM` and `ETERM` have no
//! POSIX equivalent and live above `NN_HAUSNUMERO`, as nanomsg defines them.
//!
//! The last-error slot is thread-local: a failure on one thread never shows up
//! in `last_error()` on another.

use std::borrow::Cow;
use std::cell::Cell;
use std::io;

/// Base for library-specific codes that have no POSIX counterpart.
pub const NN_HAUSNUMERO: i32 = 156_384_712;

pub const EIO: i32 = 5;
pub const EBADF: i32 = 9;
pub const EAGAIN: i32 = 11;
pub const EINVAL: i32 = 22;
pub const EMFILE: i32 = 24;
pub const EPROTO: i32 = 71;
pub const EPROTONOSUPPORT: i32 = 93;
pub const EAFNOSUPPORT: i32 = 97;
pub const EADDRINUSE: i32 = 98;
pub const ENOTCONN: i32 = 107;
pub const ESHUTDOWN: i32 = 108;
pub const ETIMEDOUT: i32 = 110;
pub const ECONNREFUSED: i32 = 111;

/// Operation cannot be performed in this state.
pub const EFSM: i32 = NN_HAUSNUMERO + 51;
/// The library is terminating.
pub const ETERM: i32 = NN_HAUSNUMERO + 53;

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(0) };
}

/// Record `code` as the calling thread's last error.
#[inline]
pub fn set_last_error(code: i32) {
    LAST_ERROR.with(|slot| slot.set(code));
}

/// The last error recorded on the calling thread, `0` if none.
#[inline]
#[must_use]
pub fn last_error() -> i32 {
    LAST_ERROR.with(Cell::get)
}

/// Record the error of a failed result in the last-error slot and pass the
/// result through unchanged.
#[inline]
pub fn record<T>(result: crate::error::Result<T>) -> crate::error::Result<T> {
    if let Err(e) = &result {
        set_last_error(e.code());
    }
    result
}

/// Human-readable text for an error code.
///
/// Codes this library produces have fixed descriptions; anything else is
/// treated as a raw OS error number.
#[must_use]
pub fn describe(code: i32) -> Cow<'static, str> {
    let text = match code {
        0 => "Success",
        EIO => "Input/output error",
        EBADF => "Bad file descriptor",
        EAGAIN => "Resource temporarily unavailable",
        EINVAL => "Invalid argument",
        EMFILE => "Too many open files",
        EPROTO => "Protocol error",
        EPROTONOSUPPORT => "Protocol not supported",
        EAFNOSUPPORT => "Address family not supported by protocol",
        EADDRINUSE => "Address already in use",
        ENOTCONN => "Transport endpoint is not connected",
        ESHUTDOWN => "Cannot send after transport endpoint shutdown",
        ETIMEDOUT => "Connection timed out",
        ECONNREFUSED => "Connection refused",
        EFSM => "Operation cannot be performed in this state",
        ETERM => "Nanosp library was terminated",
        other => return Cow::Owned(io::Error::from_raw_os_error(other).to_string()),
    };
    Cow::Borrowed(text)
}
