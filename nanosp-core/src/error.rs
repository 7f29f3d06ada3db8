//! nanosp Error Types
//!
//! Every fallible socket operation reports one of these. Each variant maps to
//! an errno-style code (see [`crate::errno`]) so a calling layer can follow
//! the `nn_errno()`/`nn_strerror()` convention.

use std::io;
use thiserror::Error;

use crate::address::AddressError;
use crate::errno;

/// Main error type for nanosp operations
#[derive(Error, Debug)]
pub enum NanospError {
    /// Descriptor does not name a live socket (closed, stale or never created)
    #[error("Invalid socket descriptor")]
    InvalidDescriptor,

    /// Protocol number is not supported
    #[error("Protocol not supported: {0}")]
    InvalidProtocol(i32),

    /// Domain number is not supported
    #[error("Address family not supported: {0}")]
    InvalidDomain(i32),

    /// Operation is not allowed in the socket's current state
    #[error("Operation cannot be performed in this state: {0}")]
    InvalidState(&'static str),

    /// Transport could not listen on the address
    #[error("Address in use: {0}")]
    AddressInUse(String),

    /// No established peer connection
    #[error("Socket is not connected")]
    NotConnected,

    /// Non-blocking operation could not complete immediately
    #[error("Resource temporarily unavailable")]
    WouldBlock,

    /// Blocking operation exceeded its configured timeout
    #[error("Operation timed out")]
    Timeout,

    /// Local shutdown, close or peer disconnect interrupted the operation
    #[error("Socket was shut down")]
    Shutdown,

    /// Malformed frame or handshake from the peer
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Underlying transport I/O failure
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// Address string could not be parsed
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    /// Argument does not refer to anything the socket knows about
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Registry has no free slots
    #[error("Too many open sockets")]
    TooManySockets,

    /// The library was terminated
    #[error("Library is terminating")]
    Terminated,
}

/// Result type alias for nanosp operations
pub type Result<T> = std::result::Result<T, NanospError>;

impl NanospError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an invalid argument error with a message
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Errno-style code reported through the last-error slot.
    ///
    /// Transport errors report the wrapped OS error number, or `EIO` when the
    /// I/O error did not originate from the OS.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidDescriptor => errno::EBADF,
            Self::InvalidProtocol(_) => errno::EPROTONOSUPPORT,
            Self::InvalidDomain(_) => errno::EAFNOSUPPORT,
            Self::InvalidState(_) => errno::EFSM,
            Self::AddressInUse(_) => errno::EADDRINUSE,
            Self::NotConnected => errno::ENOTCONN,
            Self::WouldBlock => errno::EAGAIN,
            Self::Timeout => errno::ETIMEDOUT,
            Self::Shutdown => errno::ESHUTDOWN,
            Self::Protocol(_) => errno::EPROTO,
            Self::Transport(e) => e.raw_os_error().unwrap_or(errno::EIO),
            Self::InvalidAddress(_) | Self::InvalidArgument(_) => errno::EINVAL,
            Self::TooManySockets => errno::EMFILE,
            Self::Terminated => errno::ETERM,
        }
    }

    /// Check if retrying the same call later may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::Timeout)
    }

    /// Check if this error means the peer relationship is gone
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_errno_convention() {
        assert_eq!(NanospError::InvalidDescriptor.code(), errno::EBADF);
        assert_eq!(NanospError::WouldBlock.code(), errno::EAGAIN);
        assert_eq!(NanospError::InvalidState("connected").code(), errno::EFSM);
        assert_eq!(NanospError::invalid_argument("eid 7").code(), errno::EINVAL);
    }

    #[test]
    fn test_transport_error_keeps_os_code() {
        let err = NanospError::from(io::Error::from_raw_os_error(errno::ECONNREFUSED));
        assert_eq!(err.code(), errno::ECONNREFUSED);

        let err = NanospError::from(io::Error::new(io::ErrorKind::Other, "synthetic"));
        assert_eq!(err.code(), errno::EIO);
    }

    #[test]
    fn test_classification() {
        assert!(NanospError::Timeout.is_transient());
        assert!(!NanospError::Shutdown.is_transient());
        assert!(NanospError::Shutdown.is_connection_error());
        assert!(!NanospError::TooManySockets.is_connection_error());
    }
}
