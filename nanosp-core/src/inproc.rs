//! In-process transport (`inproc://`).
//!
//! Each connection is a pair of byte pipes built from two bounded `flume`
//! channels, so the protocol layer above runs exactly as it does over TCP
//! (handshake, framing, partial reads, a writer blocked by a slow reader)
//! without touching the network. Bound names live in a process-wide
//! registry.
//!
//! # Usage
//!
//! ```rust
//! use nanosp_core::address::Address;
//! use nanosp_core::inproc::InprocTransport;
//! use nanosp_core::options::SocketOptions;
//! use nanosp_core::transport::{Listener, Stream, Transport};
//!
//! # fn example() -> std::io::Result<()> {
//! let opts = SocketOptions::default();
//! let address = Address::parse("inproc://doc-example").unwrap();
//! let listener = InprocTransport.listen(&address, &opts)?;
//!
//! let mut client = InprocTransport.dial(&address, &opts)?;
//! let mut server = listener.accept()?;
//!
//! client.write_all(b"Hello")?;
//! let mut buf = [0u8; 5];
//! server.read_exact(&mut buf)?;
//! assert_eq!(&buf, b"Hello");
//! listener.close();
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flume::{Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::address::Address;
use crate::options::SocketOptions;
use crate::transport::{Listener, Stream, Transport};

/// Largest chunk a single `write` hands to the peer.
const CHUNK_SIZE: usize = 16 * 1024;

/// Chunks buffered per direction before `write` blocks, like a kernel
/// socket buffer (128 KiB).
const PIPE_CHUNKS: usize = 8;

/// Global registry of bound inproc names
static INPROC_REGISTRY: once_cell::sync::Lazy<DashMap<String, Sender<InprocStream>>> =
    once_cell::sync::Lazy::new(DashMap::new);

fn inproc_name(address: &Address) -> io::Result<&str> {
    match address {
        Address::Inproc(name) => Ok(name),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("inproc transport cannot handle {other}"),
        )),
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "inproc pipe closed")
}

/// State shared by both ends of one connection.
struct Link {
    closed: AtomicBool,
    /// Never sent on; dropping it disconnects every `hangup` receiver.
    hangup: Mutex<Option<Sender<()>>>,
}

impl Link {
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.hangup.lock().take();
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One side of a connection, shared by all clones of its stream.
struct PipeEnd {
    inbound: Receiver<Bytes>,
    outbound: Sender<Bytes>,
    hangup: Receiver<()>,
    link: Arc<Link>,
    name: String,
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        self.link.close();
    }
}

/// Stream half of an inproc connection.
pub struct InprocStream {
    end: Arc<PipeEnd>,
    pending: Bytes,
    eof: bool,
    read_timeout: Option<Duration>,
}

impl InprocStream {
    /// Create a connected pair of streams.
    pub fn pair(name: &str) -> (InprocStream, InprocStream) {
        let (a_tx, a_rx) = flume::bounded(PIPE_CHUNKS);
        let (b_tx, b_rx) = flume::bounded(PIPE_CHUNKS);
        let (hangup_tx, hangup_rx) = flume::bounded(1);
        let link = Arc::new(Link {
            closed: AtomicBool::new(false),
            hangup: Mutex::new(Some(hangup_tx)),
        });
        let a = PipeEnd {
            inbound: a_rx,
            outbound: b_tx,
            hangup: hangup_rx.clone(),
            link: link.clone(),
            name: name.to_string(),
        };
        let b = PipeEnd {
            inbound: b_rx,
            outbound: a_tx,
            hangup: hangup_rx,
            link,
            name: name.to_string(),
        };
        (Self::from_end(a), Self::from_end(b))
    }

    fn from_end(end: PipeEnd) -> Self {
        Self::share(Arc::new(end))
    }

    fn share(end: Arc<PipeEnd>) -> Self {
        Self {
            end,
            pending: Bytes::new(),
            eof: false,
            read_timeout: None,
        }
    }

    /// Next chunk from the peer, `None` at end of stream. Data written before
    /// the hangup is still delivered.
    fn next_chunk(&self) -> io::Result<Option<Bytes>> {
        match self.end.inbound.try_recv() {
            Ok(chunk) => return Ok(Some(chunk)),
            Err(TryRecvError::Disconnected) => return Ok(None),
            Err(TryRecvError::Empty) if self.end.link.is_closed() => return Ok(None),
            Err(TryRecvError::Empty) => {}
        }

        let selector = flume::Selector::new()
            .recv(&self.end.inbound, |res| res.ok())
            .recv(&self.end.hangup, |_| None);
        let received = match self.read_timeout {
            Some(timeout) => selector.wait_timeout(timeout).map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, "inproc read timed out")
            })?,
            None => selector.wait(),
        };
        match received {
            Some(chunk) => Ok(Some(chunk)),
            // A chunk may have landed just before the hangup.
            None => Ok(self.end.inbound.try_recv().ok()),
        }
    }
}

impl Stream for InprocStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            if self.eof {
                return Ok(0);
            }
            match self.next_chunk()? {
                Some(chunk) => self.pending = chunk,
                None => self.eof = true,
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }

    /// Hands at most one chunk to the peer, blocking while its buffer is full.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.end.link.is_closed() {
            return Err(broken_pipe());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(CHUNK_SIZE);
        let chunk = Bytes::copy_from_slice(&buf[..n]);
        let chunk = match self.end.outbound.try_send(chunk) {
            Ok(()) => return Ok(n),
            Err(TrySendError::Disconnected(_)) => return Err(broken_pipe()),
            Err(TrySendError::Full(chunk)) => chunk,
        };
        let sent = flume::Selector::new()
            .send(&self.end.outbound, chunk, |res| res.is_ok())
            .recv(&self.end.hangup, |_| false)
            .wait();
        if sent {
            Ok(n)
        } else {
            Err(broken_pipe())
        }
    }

    fn try_clone(&self) -> io::Result<Box<dyn Stream>> {
        Ok(Box::new(Self::share(self.end.clone())))
    }

    fn shutdown(&self) -> io::Result<()> {
        if self.end.link.close() {
            debug!("[INPROC] Closed connection on {}", self.end.name);
        }
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.read_timeout = timeout.filter(|d| !d.is_zero());
        Ok(())
    }

    fn peer(&self) -> String {
        format!("inproc://{}", self.end.name)
    }
}

/// The in-process transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct InprocTransport;

impl Transport for InprocTransport {
    fn scheme(&self) -> &'static str {
        "inproc"
    }

    fn listen(&self, address: &Address, _options: &SocketOptions) -> io::Result<Box<dyn Listener>> {
        let name = inproc_name(address)?;
        let (tx, rx) = flume::unbounded();

        match INPROC_REGISTRY.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("inproc endpoint '{}' is already bound", name),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(tx.clone());
            }
        }

        debug!("[INPROC] Bound {}", name);
        Ok(Box::new(InprocListener {
            name: name.to_string(),
            incoming: rx,
            own: tx,
            closed: AtomicBool::new(false),
        }))
    }

    fn dial(&self, address: &Address, _options: &SocketOptions) -> io::Result<Box<dyn Stream>> {
        let name = inproc_name(address)?;
        let refused = || {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("inproc endpoint '{}' not bound", name),
            )
        };

        let acceptor = INPROC_REGISTRY
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(refused)?;

        let (ours, theirs) = InprocStream::pair(name);
        acceptor.send(theirs).map_err(|_| refused())?;
        debug!("[INPROC] Connected to {}", name);
        Ok(Box::new(ours))
    }
}

struct InprocListener {
    name: String,
    incoming: Receiver<InprocStream>,
    /// Identifies our registry entry and delivers the wake-up on close.
    own: Sender<InprocStream>,
    closed: AtomicBool,
}

impl InprocListener {
    fn aborted() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionAborted, "listener closed")
    }
}

impl Listener for InprocListener {
    fn accept(&self) -> io::Result<Box<dyn Stream>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Self::aborted());
        }
        let stream = self.incoming.recv().map_err(|_| Self::aborted())?;
        if self.closed.load(Ordering::Acquire) {
            return Err(Self::aborted());
        }
        Ok(Box::new(stream))
    }

    fn local_address(&self) -> Address {
        Address::Inproc(self.name.clone())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        INPROC_REGISTRY.remove_if(&self.name, |_, sender| sender.same_channel(&self.own));
        let (wake, _) = InprocStream::pair(&self.name);
        let _ = self.own.send(wake);
        debug!("[INPROC] Unbound {}", self.name);
    }
}

impl Drop for InprocListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// List all currently bound inproc names.
///
/// This is primarily useful for debugging and testing.
pub fn list_inproc_endpoints() -> Vec<String> {
    INPROC_REGISTRY
        .iter()
        .map(|entry| entry.key().clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(name: &str) -> Address {
        Address::parse(&format!("inproc://{name}")).unwrap()
    }

    #[test]
    fn test_bind_duplicate() {
        let opts = SocketOptions::default();
        let first = InprocTransport.listen(&addr("test-duplicate"), &opts).unwrap();

        let err = match InprocTransport.listen(&addr("test-duplicate"), &opts) {
            Ok(_) => panic!("second bind succeeded"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);

        first.close();
        assert!(InprocTransport.listen(&addr("test-duplicate"), &opts).is_ok());
    }

    #[test]
    fn test_dial_unbound_is_refused() {
        let err = match InprocTransport.dial(&addr("test-nobody"), &SocketOptions::default()) {
            Ok(_) => panic!("dial to unbound name succeeded"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn test_partial_reads_keep_remainder() {
        let (mut a, mut b) = InprocStream::pair("test-partial");
        a.write_all(b"abcdef").unwrap();

        let mut two = [0u8; 2];
        b.read_exact(&mut two).unwrap();
        assert_eq!(&two, b"ab");
        let mut four = [0u8; 4];
        b.read_exact(&mut four).unwrap();
        assert_eq!(&four, b"cdef");
    }

    #[test]
    fn test_shutdown_wakes_own_reader_and_peer() {
        let (a, b) = InprocStream::pair("test-shutdown");
        let mut a_reader = a.try_clone().unwrap();
        let mut b_reader = b.try_clone().unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            a_reader.read(&mut buf).unwrap()
        });
        std::thread::sleep(Duration::from_millis(20));
        a.shutdown().unwrap();

        assert_eq!(handle.join().unwrap(), 0);
        let mut buf = [0u8; 8];
        assert_eq!(b_reader.read(&mut buf).unwrap(), 0);

        let mut a_writer = a.try_clone().unwrap();
        assert_eq!(
            a_writer.write(b"late").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn test_writer_blocks_until_peer_reads() {
        let (mut a, mut b) = InprocStream::pair("test-backpressure");
        let total = CHUNK_SIZE * PIPE_CHUNKS * 4;
        let (done_tx, done_rx) = flume::bounded(1);
        let writer = std::thread::spawn(move || {
            a.write_all(&vec![7u8; total]).unwrap();
            done_tx.send(()).unwrap();
            a
        });

        // Far more than the pipe buffers: the writer must be stuck.
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        let mut received = vec![0u8; total];
        b.read_exact(&mut received).unwrap();
        assert!(received.iter().all(|&byte| byte == 7));
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        drop(writer.join().unwrap());
    }

    #[test]
    fn test_shutdown_wakes_blocked_writer() {
        let (mut a, _b) = InprocStream::pair("test-blocked-writer");
        let closer = a.try_clone().unwrap();
        let writer = std::thread::spawn(move || {
            a.write_all(&vec![0u8; CHUNK_SIZE * (PIPE_CHUNKS + 1)])
        });
        std::thread::sleep(Duration::from_millis(50));
        closer.shutdown().unwrap();

        let err = writer.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_buffered_data_survives_peer_shutdown() {
        let (mut a, mut b) = InprocStream::pair("test-drain");
        a.write_all(b"last words").unwrap();
        a.shutdown().unwrap();

        let mut buf = [0u8; 10];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"last words");
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_timeout() {
        let (_a, mut b) = InprocStream::pair("test-timeout");
        b.set_read_timeout(Some(Duration::from_millis(10))).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(b.read(&mut buf).unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_close_wakes_accept_and_unregisters() {
        let opts = SocketOptions::default();
        let listener: Arc<dyn Listener> = InprocTransport
            .listen(&addr("test-close-accept"), &opts)
            .unwrap()
            .into();
        assert!(list_inproc_endpoints().contains(&"test-close-accept".to_string()));

        let acceptor = listener.clone();
        let handle = std::thread::spawn(move || acceptor.accept().map(|_| ()));
        std::thread::sleep(Duration::from_millis(20));
        listener.close();

        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert!(!list_inproc_endpoints().contains(&"test-close-accept".to_string()));
    }
}
