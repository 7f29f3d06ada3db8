//! Owned, close-on-drop handle over a socket descriptor.

use nanosp_core::address::Address;
use nanosp_core::error::Result;
use nanosp_core::message::Message;
use nanosp_core::options::SocketOptions;
use nanosp_core::protocol::{Domain, Protocol};
use nanosp_proto::{EndpointId, SocketState};

use crate::nn::{self, with_socket, SocketOption};
use crate::registry::Descriptor;

/// Owned socket descriptor that closes itself on drop.
///
/// Goes through the same registry and last-error slot as [`crate::nn`], so a
/// `Socket` and raw `nn` calls on its descriptor can be mixed freely.
///
/// ```rust
/// use nanosp::Socket;
///
/// # fn main() -> nanosp::Result<()> {
/// let server = Socket::pair()?;
/// let client = Socket::pair()?;
/// server.bind("inproc://socket-doc")?;
/// client.connect("inproc://socket-doc")?;
///
/// client.send("hi", 0)?;
/// assert_eq!(server.recv(0)?.as_bytes(), b"hi");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Socket {
    descriptor: Descriptor,
    closed: bool,
}

impl Socket {
    /// Create a socket in `domain` speaking `protocol`.
    pub fn new(domain: Domain, protocol: Protocol) -> Result<Self> {
        let descriptor = nn::socket(domain.as_raw(), protocol.as_raw())?;
        Ok(Self {
            descriptor,
            closed: false,
        })
    }

    /// Create a PAIR socket.
    pub fn pair() -> Result<Self> {
        Self::new(Domain::Sp, Protocol::Pair)
    }

    /// The underlying descriptor.
    #[inline]
    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    /// Listen on `addr`.
    pub fn bind(&self, addr: &str) -> Result<EndpointId> {
        nn::bind(self.descriptor, addr)
    }

    /// Connect to `addr`.
    pub fn connect(&self, addr: &str) -> Result<EndpointId> {
        nn::connect(self.descriptor, addr)
    }

    /// Send a message without copying it. Returns its length.
    pub fn send(&self, msg: impl Into<Message>, flags: i32) -> Result<usize> {
        let msg = msg.into();
        with_socket(self.descriptor, |socket| socket.send(msg, flags))
    }

    /// Receive the next message.
    pub fn recv(&self, flags: i32) -> Result<Message> {
        with_socket(self.descriptor, |socket| socket.recv(flags))
    }

    /// Remove an endpoint.
    pub fn shutdown(&self, eid: EndpointId) -> Result<()> {
        nn::shutdown(self.descriptor, eid)
    }

    /// Change one option.
    pub fn set_option(&self, option: SocketOption) -> Result<()> {
        nn::setsockopt(self.descriptor, option)
    }

    /// Current options.
    pub fn options(&self) -> Result<SocketOptions> {
        nn::getsockopt(self.descriptor)
    }

    /// Resolved local address of a bound endpoint.
    pub fn endpoint_address(&self, eid: EndpointId) -> Result<Address> {
        with_socket(self.descriptor, |socket| socket.endpoint_address(eid))
    }

    /// Lifecycle state of the socket.
    pub fn state(&self) -> Result<SocketState> {
        with_socket(self.descriptor, |socket| Ok(socket.state()))
    }

    /// Close now and report the outcome, instead of on drop.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        nn::close(self.descriptor)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if !self.closed {
            let _ = nn::close(self.descriptor);
        }
    }
}
