//! TCP transport (`tcp://`).
//!
//! Listeners are created through `socket2` so `SO_REUSEADDR` is set before
//! binding, which lets a closed endpoint's port be bound again right away.
//! Streams are plain `std::net::TcpStream`s; `try_clone` duplicates the OS
//! handle so reader and writer threads can share a connection.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, trace, warn};

use crate::address::Address;
use crate::options::SocketOptions;
use crate::transport::{Listener, Stream, Transport};

const LISTEN_BACKLOG: i32 = 128;

/// How long `close` waits for its wake-up connection.
const WAKE_TIMEOUT: Duration = Duration::from_millis(200);

/// Enable TCP_NODELAY on a stream for minimal latency.
///
/// This disables Nagle's algorithm, trading bandwidth efficiency for lower latency.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_tcp_nodelay(stream: &TcpStream) -> io::Result<()> {
    SockRef::from(stream).set_nodelay(true)
}

fn tcp_addr(address: &Address) -> io::Result<SocketAddr> {
    match address {
        Address::Tcp(addr) => Ok(*addr),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("tcp transport cannot handle {other}"),
        )),
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Address a local connect can reach when the listener is bound to a wildcard.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, local.port()))
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, local.port()))
        }
        _ => local,
    }
}

/// Make a blocked `accept` on `listener` return an error.
fn interrupt_accept(listener: &TcpListener) -> io::Result<()> {
    if cfg!(target_os = "linux") {
        SockRef::from(listener).shutdown(Shutdown::Read)
    } else {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "listening sockets cannot be shut down here",
        ))
    }
}

/// The TCP transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn scheme(&self) -> &'static str {
        "tcp"
    }

    fn listen(&self, address: &Address, options: &SocketOptions) -> io::Result<Box<dyn Listener>> {
        let listener = bind_listener(tcp_addr(address)?)?;
        let local = listener.local_addr()?;
        debug!("[TCP] Listening on {}", local);
        Ok(Box::new(TcpAcceptor {
            inner: listener,
            local,
            nodelay: options.tcp_nodelay,
            closed: AtomicBool::new(false),
        }))
    }

    fn dial(&self, address: &Address, options: &SocketOptions) -> io::Result<Box<dyn Stream>> {
        let addr = tcp_addr(address)?;
        let stream = match options.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        if options.tcp_nodelay {
            enable_tcp_nodelay(&stream)?;
            trace!("[TCP] TCP_NODELAY enabled");
        }
        debug!("[TCP] Connected to {}", addr);
        Ok(Box::new(TcpConnection::new(stream, addr)))
    }
}

struct TcpAcceptor {
    inner: TcpListener,
    local: SocketAddr,
    nodelay: bool,
    closed: AtomicBool,
}

impl TcpAcceptor {
    fn aborted() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionAborted, "listener closed")
    }
}

impl Listener for TcpAcceptor {
    fn accept(&self) -> io::Result<Box<dyn Stream>> {
        loop {
            match self.inner.accept() {
                Ok((stream, peer)) => {
                    if self.closed.load(Ordering::Acquire) {
                        return Err(Self::aborted());
                    }
                    if self.nodelay {
                        enable_tcp_nodelay(&stream)?;
                    }
                    debug!("[TCP] Accepted connection from {}", peer);
                    return Ok(Box::new(TcpConnection::new(stream, peer)));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) if self.closed.load(Ordering::Acquire) => return Err(Self::aborted()),
                Err(e) => return Err(e),
            }
        }
    }

    fn local_address(&self) -> Address {
        Address::Tcp(self.local)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // A blocking accept(2) cannot be interrupted portably. Shutting the
        // listening socket down wakes it on Linux; elsewhere hand it a
        // connection so it returns and sees the flag.
        if interrupt_accept(&self.inner).is_err() {
            let target = wake_addr(self.local);
            if let Err(e) = TcpStream::connect_timeout(&target, WAKE_TIMEOUT) {
                warn!("[TCP] Cannot wake accept on {}: {}", self.local, e);
            }
        }
        debug!("[TCP] Stopped listening on {}", self.local);
    }
}

struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpConnection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }
}

impl Stream for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.stream, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut self.stream, buf)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Stream>> {
        Ok(Box::new(Self::new(self.stream.try_clone()?, self.peer)))
    }

    fn shutdown(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // std rejects a zero timeout; treat it as "no timeout".
        self.stream.set_read_timeout(timeout.filter(|d| !d.is_zero()))
    }

    fn peer(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}
