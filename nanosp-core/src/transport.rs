//! Byte-stream transport abstraction.
//!
//! A transport turns an [`Address`] into listeners and streams. Sockets only
//! ever see the traits in this module, so a transport can be swapped without
//! touching the protocol layer. Two implementations ship:
//!
//! - [`crate::tcp`] over OS stream sockets (`tcp://`)
//! - [`crate::inproc`] over paired in-memory byte pipes (`inproc://`)
//!
//! All calls are blocking. Each endpoint drives them from its own threads.

use std::io;
use std::time::Duration;

use crate::address::Address;
use crate::inproc::InprocTransport;
use crate::options::SocketOptions;
use crate::tcp::TcpTransport;

/// A bidirectional byte stream.
///
/// Handles obtained with [`Stream::try_clone`] share the same connection, so
/// one handle can read while another writes and a third shuts it down.
pub trait Stream: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write some prefix of `buf`, returning how many bytes were taken.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Another handle to the same connection.
    fn try_clone(&self) -> io::Result<Box<dyn Stream>>;

    /// Close both directions. Blocked readers on any handle observe end of
    /// stream; later writes fail.
    fn shutdown(&self) -> io::Result<()>;

    /// Bound how long `read` may block. `None` blocks indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Description of the remote side, for logging.
    fn peer(&self) -> String;

    /// Write all of `buf`, retrying partial writes.
    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    ))
                }
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Fill `buf` completely, accumulating partial reads.
    fn read_exact(&mut self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream closed mid-read",
                    ))
                }
                Ok(n) => {
                    let rest = buf;
                    buf = &mut rest[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// A bound address waiting for inbound streams.
pub trait Listener: Send + Sync {
    /// Block until a peer connects.
    ///
    /// After [`Listener::close`] this fails with
    /// `io::ErrorKind::ConnectionAborted`.
    fn accept(&self) -> io::Result<Box<dyn Stream>>;

    /// Address actually bound (resolves port 0).
    fn local_address(&self) -> Address;

    /// Stop listening and wake any blocked `accept`.
    fn close(&self);
}

/// Factory for listeners and outbound streams.
pub trait Transport: Send + Sync {
    /// Scheme handled by this transport.
    fn scheme(&self) -> &'static str;

    /// Start listening on `address`.
    ///
    /// Fails with `io::ErrorKind::AddrInUse` when the address is taken.
    fn listen(&self, address: &Address, options: &SocketOptions) -> io::Result<Box<dyn Listener>>;

    /// Open a stream to `address`, giving up after `options.connect_timeout`
    /// if set.
    fn dial(&self, address: &Address, options: &SocketOptions) -> io::Result<Box<dyn Stream>>;
}

static TCP: TcpTransport = TcpTransport;
static INPROC: InprocTransport = InprocTransport;

/// Transport responsible for `address`.
pub fn for_address(address: &Address) -> &'static dyn Transport {
    match address {
        Address::Tcp(_) => &TCP,
        Address::Inproc(_) => &INPROC,
    }
}

/// True for the errors a read timeout produces (platforms disagree on which).
#[inline]
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
