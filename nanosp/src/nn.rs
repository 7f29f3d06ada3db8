//! The nanomsg-style call surface.
//!
//! Sockets are named by integer descriptors from the process-wide
//! [`registry`](crate::registry). Every call that fails stores its error code
//! in the calling thread's last-error slot before returning, so code written
//! against the `nn_*` convention can keep using [`errno`] and [`strerror`].
//!
//! ```rust
//! use nanosp::nn::{self, AF_SP, NN_PAIR};
//!
//! # fn main() -> nanosp::Result<()> {
//! let server = nn::socket(AF_SP, NN_PAIR)?;
//! let client = nn::socket(AF_SP, NN_PAIR)?;
//! nn::bind(server, "inproc://nn-doc")?;
//! nn::connect(client, "inproc://nn-doc")?;
//!
//! nn::send(client, b"hello", 0)?;
//! assert_eq!(&nn::recv(server, 0)?[..], b"hello");
//!
//! nn::close(client)?;
//! nn::close(server)?;
//! assert!(nn::send(client, b"late", 0).is_err());
//! assert_eq!(nn::errno(), nn::EBADF);
//! # Ok(())
//! # }
//! ```

use std::borrow::Cow;
use std::time::Duration;

use bytes::Bytes;
use nanosp_core::errno::{self as codes, record};
use nanosp_core::error::{NanospError, Result};
use nanosp_core::options::SocketOptions;
use nanosp_proto::PairSocket;
use tracing::{debug, trace};

use crate::registry::{self, Descriptor};

pub use nanosp_core::errno::{
    EADDRINUSE, EAFNOSUPPORT, EAGAIN, EBADF, EFSM, EINVAL, EMFILE, ENOTCONN, EPROTO,
    EPROTONOSUPPORT, ESHUTDOWN, ETERM, ETIMEDOUT,
};
pub use nanosp_core::protocol::{AF_SP, AF_SP_RAW, NN_DONTWAIT, NN_PAIR};

/// Run `f` on the socket behind `s`, recording any failure.
pub(crate) fn with_socket<T>(s: Descriptor, f: impl FnOnce(&PairSocket) -> Result<T>) -> Result<T> {
    let result = registry::global().lookup(s).and_then(|socket| f(&socket));
    if let Err(e) = &result {
        log_failure(s, e);
    }
    record(result)
}

/// Retryable failures are routine for non-blocking callers; keep them quiet.
fn log_failure(s: Descriptor, err: &NanospError) {
    if err.is_transient() {
        trace!(descriptor = s, "[NN] {}", err);
    } else if err.is_connection_error() {
        debug!(descriptor = s, "[NN] No peer: {}", err);
    } else {
        debug!(descriptor = s, code = err.code(), "[NN] Call failed: {}", err);
    }
}

/// Create a socket. Returns its descriptor.
pub fn socket(domain: i32, protocol: i32) -> Result<Descriptor> {
    record(registry::global().create(domain, protocol))
}

/// Listen on `addr`. Returns the endpoint id.
pub fn bind(s: Descriptor, addr: &str) -> Result<i32> {
    with_socket(s, |socket| socket.bind(addr))
}

/// Connect to `addr`. Returns the endpoint id.
pub fn connect(s: Descriptor, addr: &str) -> Result<i32> {
    with_socket(s, |socket| socket.connect(addr))
}

/// Send `payload` to the peer. Returns the number of bytes sent, which is
/// always the whole payload.
pub fn send(s: Descriptor, payload: &[u8], flags: i32) -> Result<usize> {
    with_socket(s, |socket| socket.send(Bytes::copy_from_slice(payload), flags))
}

/// Receive the next message.
pub fn recv(s: Descriptor, flags: i32) -> Result<Bytes> {
    with_socket(s, |socket| socket.recv(flags).map(Into::into))
}

/// Remove endpoint `eid` from the socket.
pub fn shutdown(s: Descriptor, eid: i32) -> Result<()> {
    with_socket(s, |socket| socket.shutdown(eid))
}

/// Close the socket and release its descriptor.
pub fn close(s: Descriptor) -> Result<()> {
    record(registry::global().destroy(s))
}

/// The calling thread's last error code, `0` if no call has failed on it.
pub fn errno() -> i32 {
    codes::last_error()
}

/// Text for an error code.
pub fn strerror(code: i32) -> Cow<'static, str> {
    codes::describe(code)
}

/// Close every socket and make later [`socket`] calls fail with `ETERM`.
pub fn term() {
    registry::global().terminate();
}

/// A single socket option, as set through [`setsockopt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    /// `NN_SNDTIMEO`: `None` blocks indefinitely
    SendTimeout(Option<Duration>),
    /// `NN_RCVTIMEO`: `None` blocks indefinitely
    RecvTimeout(Option<Duration>),
    /// `NN_SNDBUF`: outbound queue capacity in messages
    SendBuffer(usize),
    /// `NN_RCVBUF`: inbound queue capacity in messages
    RecvBuffer(usize),
    /// `NN_RCVMAXSIZE`: `None` removes the limit
    RecvMaxSize(Option<usize>),
    /// `NN_LINGER`: how long `close` flushes queued messages
    Linger(Option<Duration>),
    /// How long a peer may take to send its connection header
    HandshakeTimeout(Duration),
    /// Bound on TCP dials, `None` for the OS default
    ConnectTimeout(Option<Duration>),
    /// `NN_TCP_NODELAY`
    TcpNoDelay(bool),
    /// Bytes read from the transport at once
    ReadBufferSize(usize),
}

impl SocketOption {
    fn apply(self, options: &mut SocketOptions) -> Result<()> {
        match self {
            Self::SendTimeout(v) => options.send_timeout = v,
            Self::RecvTimeout(v) => options.recv_timeout = v,
            Self::SendBuffer(v) => options.send_hwm = v,
            Self::RecvBuffer(v) => options.recv_hwm = v,
            Self::RecvMaxSize(v) => options.max_msg_size = v,
            Self::Linger(v) => options.linger = v,
            Self::HandshakeTimeout(v) if v.is_zero() => {
                return Err(NanospError::invalid_argument("handshake timeout must be positive"))
            }
            Self::HandshakeTimeout(v) => options.handshake_timeout = v,
            Self::ConnectTimeout(v) => options.connect_timeout = v,
            Self::TcpNoDelay(v) => options.tcp_nodelay = v,
            Self::ReadBufferSize(0) => {
                return Err(NanospError::invalid_argument("read buffer size must be positive"))
            }
            Self::ReadBufferSize(v) => options.read_buffer_size = v,
        }
        Ok(())
    }
}

/// Change one option on the socket.
pub fn setsockopt(s: Descriptor, option: SocketOption) -> Result<()> {
    with_socket(s, |socket| {
        let mut outcome = Ok(());
        socket.update_options(|options| outcome = option.apply(options))?;
        outcome
    })
}

/// Current options of the socket.
pub fn getsockopt(s: Descriptor) -> Result<SocketOptions> {
    with_socket(s, |socket| Ok(socket.options()))
}

/// A named public constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    /// Constant name, e.g. `"NN_PAIR"`
    pub name: &'static str,
    /// Constant value
    pub value: i32,
}

const SYMBOLS: &[Symbol] = &[
    Symbol { name: "AF_SP", value: AF_SP },
    Symbol { name: "AF_SP_RAW", value: AF_SP_RAW },
    Symbol { name: "NN_PAIR", value: NN_PAIR },
    Symbol { name: "NN_DONTWAIT", value: NN_DONTWAIT },
    Symbol { name: "EADDRINUSE", value: EADDRINUSE },
    Symbol { name: "EAFNOSUPPORT", value: EAFNOSUPPORT },
    Symbol { name: "EAGAIN", value: EAGAIN },
    Symbol { name: "EBADF", value: EBADF },
    Symbol { name: "EFSM", value: EFSM },
    Symbol { name: "EINVAL", value: EINVAL },
    Symbol { name: "EMFILE", value: EMFILE },
    Symbol { name: "ENOTCONN", value: ENOTCONN },
    Symbol { name: "EPROTO", value: EPROTO },
    Symbol { name: "EPROTONOSUPPORT", value: EPROTONOSUPPORT },
    Symbol { name: "ESHUTDOWN", value: ESHUTDOWN },
    Symbol { name: "ETERM", value: ETERM },
    Symbol { name: "ETIMEDOUT", value: ETIMEDOUT },
];

/// The `index`-th public constant, `None` past the end of the table.
///
/// Lets a binding layer discover every constant by iterating from 0.
pub fn symbol(index: usize) -> Option<Symbol> {
    SYMBOLS.get(index).copied()
}
