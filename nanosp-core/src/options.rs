//! Socket configuration options
//!
//! This module provides configuration options for sockets, similar to
//! nanomsg's socket options (nn_setsockopt/nn_getsockopt).

use std::time::Duration;

/// Default high water mark for both queues (messages).
pub const DEFAULT_HWM: usize = 1000;

/// Default maximum inbound message size (1 MiB).
pub const DEFAULT_MAX_MSG_SIZE: usize = 1024 * 1024;

/// Default read buffer size (8KB)
pub const DEFAULT_READ_BUF_SIZE: usize = 8192;

/// Socket configuration options.
///
/// # Examples
///
/// ```
/// use nanosp_core::options::SocketOptions;
/// use std::time::Duration;
///
/// let opts = SocketOptions::default()
///     .with_recv_timeout(Duration::from_secs(5))
///     .with_send_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Receive timeout (NN_RCVTIMEO)
    ///
    /// - `None`: Block indefinitely (default)
    /// - `Some(duration)`: Wait up to duration before failing with `Timeout`
    pub recv_timeout: Option<Duration>,

    /// Send timeout (NN_SNDTIMEO)
    ///
    /// - `None`: Block indefinitely (default)
    /// - `Some(duration)`: Wait up to duration before failing with `Timeout`
    pub send_timeout: Option<Duration>,

    /// Outbound queue capacity in messages (NN_SNDBUF)
    ///
    /// A blocking send waits while the queue is full; a non-blocking send
    /// fails with `WouldBlock`. Applies to queues created after the change.
    pub send_hwm: usize,

    /// Inbound queue capacity in messages (NN_RCVBUF)
    ///
    /// When full, the connection stops reading until `recv` drains it.
    pub recv_hwm: usize,

    /// Maximum inbound message size (NN_RCVMAXSIZE)
    ///
    /// - `None`: No limit
    /// - `Some(size)`: A frame announcing more bytes drops the connection
    pub max_msg_size: Option<usize>,

    /// Linger timeout (NN_LINGER)
    ///
    /// How long `close` waits for queued outbound messages to be written.
    /// - `None` or `Some(Duration::ZERO)`: Discard pending messages
    pub linger: Option<Duration>,

    /// Maximum time for the peer's protocol header to arrive.
    pub handshake_timeout: Duration,

    /// Maximum time for a TCP dial to complete.
    ///
    /// - `None`: Use the OS default (default)
    pub connect_timeout: Option<Duration>,

    /// Disable Nagle's algorithm on TCP connections (NN_TCP_NODELAY)
    pub tcp_nodelay: bool,

    /// Read buffer size (bytes)
    ///
    /// Size of the chunk each connection reads from the transport at once.
    pub read_buffer_size: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            recv_timeout: None, // Block indefinitely
            send_timeout: None, // Block indefinitely
            send_hwm: DEFAULT_HWM,
            recv_hwm: DEFAULT_HWM,
            max_msg_size: Some(DEFAULT_MAX_MSG_SIZE),
            linger: Some(Duration::from_secs(1)),
            handshake_timeout: Duration::from_secs(5),
            connect_timeout: None,
            tcp_nodelay: true,
            read_buffer_size: DEFAULT_READ_BUF_SIZE,
        }
    }
}

impl SocketOptions {
    /// Create new socket options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set receive timeout.
    ///
    /// # Examples
    ///
    /// ```
    /// use nanosp_core::options::SocketOptions;
    /// use std::time::Duration;
    ///
    /// let opts = SocketOptions::new().with_recv_timeout(Duration::from_millis(250));
    /// assert_eq!(opts.recv_timeout, Some(Duration::from_millis(250)));
    /// ```
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    /// Set send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set outbound queue capacity.
    pub fn with_send_hwm(mut self, hwm: usize) -> Self {
        self.send_hwm = hwm;
        self
    }

    /// Set inbound queue capacity.
    pub fn with_recv_hwm(mut self, hwm: usize) -> Self {
        self.recv_hwm = hwm;
        self
    }

    /// Set maximum inbound message size.
    pub fn with_max_msg_size(mut self, size: Option<usize>) -> Self {
        self.max_msg_size = size;
        self
    }

    /// Set linger timeout.
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    /// Set handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set TCP dial timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Enable or disable TCP_NODELAY.
    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// Set read buffer size.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Outbound queue capacity, never zero.
    ///
    /// A zero-capacity flume channel is a rendezvous channel, which would
    /// make every send wait for the writer thread.
    #[inline]
    pub fn send_capacity(&self) -> usize {
        self.send_hwm.max(1)
    }

    /// Inbound queue capacity, never zero.
    #[inline]
    pub fn recv_capacity(&self) -> usize {
        self.recv_hwm.max(1)
    }

    /// Linger window, `None` when pending messages are discarded on close.
    #[inline]
    pub fn linger_window(&self) -> Option<Duration> {
        self.linger.filter(|d| !d.is_zero())
    }
}
