//! PAIR socket implementation
//!
//! PAIR sockets are exclusive peer-to-peer sockets that connect exactly two endpoints.
//! They provide bidirectional communication without routing or filtering.
//!
//! # Characteristics
//!
//! - **Exclusive**: At most one established peer at a time; further inbound
//!   connections are refused before the handshake while one is active
//! - **Bidirectional**: Can both send and receive messages
//! - **Queued**: `send` enqueues for the pipe's writer thread, the pipe's
//!   reader thread fills the inbound queue that `recv` drains
//!
//! # Locking
//!
//! All state lives behind one `parking_lot::Mutex`. Blocking operations clone
//! the channel handles they need, release the lock and then wait, racing the
//! queue against a *wake* channel. Anything that should interrupt waiters
//! (shutdown, close, peer loss) replaces the wake channel; dropping the old
//! sender disconnects every waiter's copy at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use flume::{Receiver, Sender};
use nanosp_core::address::Address;
use nanosp_core::error::{NanospError, Result};
use nanosp_core::message::Message;
use nanosp_core::options::SocketOptions;
use nanosp_core::protocol::{Domain, Protocol, NN_DONTWAIT};
use nanosp_core::transport::Stream;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::endpoint::{self, ConnectionSink, Endpoint, EndpointId};
use crate::pipe::{release_pending, PipeHandle, PipeId, PipeOwner, PipeQueues};

/// Poll interval while `close` lingers on unsent messages.
const LINGER_POLL: Duration = Duration::from_millis(1);

/// Lifecycle of a PAIR socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// No endpoints yet
    Unbound,
    /// At least one listener, no peer
    Listening,
    /// A dial is in flight
    Connecting,
    /// A peer is established
    Connected,
    /// The peer is gone and no listener remains
    ShuttingDown,
    /// Terminal
    Closed,
}

impl SocketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unbound => "unbound",
            Self::Listening => "listening",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ShuttingDown => "shutting down",
            Self::Closed => "closed",
        }
    }
}

/// The established connection and the endpoint it belongs to.
struct ActivePipe {
    endpoint: EndpointId,
    handle: PipeHandle,
}

struct Inner {
    state: SocketState,
    options: SocketOptions,
    endpoints: Vec<Endpoint>,
    next_endpoint: EndpointId,
    next_pipe: PipeId,
    dialing: bool,
    pipe: Option<ActivePipe>,

    inbound_tx: Sender<Bytes>,
    inbound_rx: Receiver<Bytes>,
    inbound_capacity: usize,
    outbound_tx: Sender<Bytes>,
    outbound_rx: Receiver<Bytes>,
    pending: Arc<AtomicUsize>,

    // Never sent on; replacing it disconnects `wake_rx` for waiters.
    _wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.state == SocketState::Closed {
            return Err(NanospError::InvalidDescriptor);
        }
        Ok(())
    }

    fn has_listener(&self) -> bool {
        self.endpoints.iter().any(Endpoint::is_listener)
    }

    fn has_endpoint(&self, id: EndpointId) -> bool {
        self.endpoints.iter().any(|ep| ep.id() == id)
    }

    /// State to fall back to once there is no peer and no dial in flight.
    fn idle_state(&self, prior: SocketState) -> SocketState {
        if self.has_listener() {
            SocketState::Listening
        } else {
            match prior {
                SocketState::Unbound => SocketState::Unbound,
                _ => SocketState::ShuttingDown,
            }
        }
    }

    /// Interrupt every blocked `send`/`recv`.
    fn wake_waiters(&mut self) {
        let (tx, rx) = flume::bounded(1);
        self._wake_tx = tx;
        self.wake_rx = rx;
    }

    /// Discard messages queued for a peer that is gone.
    fn discard_outbound(&mut self) -> usize {
        let dropped = self.outbound_rx.drain().count();
        if dropped > 0 {
            release_pending(&self.pending, dropped);
        }
        dropped
    }

    /// Detach the active pipe, leaving the state for the caller to settle.
    ///
    /// The outbound queue and its pending counter are replaced along with
    /// the pipe: a sender still holding the old queue detects it with
    /// [`Inner::is_current`] and gives up instead of feeding a dead pipe.
    fn take_pipe(&mut self) -> Option<ActivePipe> {
        let pipe = self.pipe.take()?;
        let dropped = self.discard_outbound();
        if dropped > 0 {
            debug!(
                pipe = pipe.handle.id(),
                dropped, "[PAIR] Discarded undelivered outbound messages"
            );
        }
        let (tx, rx) = flume::bounded(self.options.send_capacity());
        self.outbound_tx = tx;
        self.outbound_rx = rx;
        self.pending = Arc::new(AtomicUsize::new(0));
        self.wake_waiters();
        Some(pipe)
    }

    /// Whether `tx` still feeds the active pipe.
    fn is_current(&self, tx: &Sender<Bytes>) -> bool {
        self.pipe.is_some() && tx.same_channel(&self.outbound_tx)
    }

    /// Fresh queues for a new connection.
    ///
    /// The outbound queue is always rebuilt with the current `send_hwm`. The
    /// inbound queue keeps buffered messages and waiting receivers, so it is
    /// only rebuilt when it is empty and nobody else holds it.
    fn refresh_queues(&mut self) {
        let (tx, rx) = flume::bounded(self.options.send_capacity());
        self.outbound_tx = tx;
        self.outbound_rx = rx;

        let capacity = self.options.recv_capacity();
        if capacity != self.inbound_capacity
            && self.inbound_rx.is_empty()
            && self.inbound_rx.receiver_count() == 1
        {
            let (tx, rx) = flume::bounded(capacity);
            self.inbound_tx = tx;
            self.inbound_rx = rx;
            self.inbound_capacity = capacity;
        }
    }
}

/// PAIR socket for exclusive peer-to-peer communication.
///
/// Created behind an `Arc` so background threads can reach it through weak
/// references; every method takes `&self`.
///
/// # Example
///
/// ```rust
/// use nanosp_core::options::SocketOptions;
/// use nanosp_core::protocol::{Domain, Protocol};
/// use nanosp_proto::PairSocket;
///
/// # fn main() -> nanosp_core::error::Result<()> {
/// let server = PairSocket::new(Domain::Sp, Protocol::Pair, SocketOptions::default());
/// let client = PairSocket::new(Domain::Sp, Protocol::Pair, SocketOptions::default());
///
/// server.bind("inproc://pair-doc")?;
/// client.connect("inproc://pair-doc")?;
///
/// client.send("ping", 0)?;
/// assert_eq!(server.recv(0)?.as_bytes(), b"ping");
///
/// client.close()?;
/// server.close()?;
/// # Ok(())
/// # }
/// ```
pub struct PairSocket {
    domain: Domain,
    protocol: Protocol,
    inner: Mutex<Inner>,
    me: Weak<PairSocket>,
}

impl PairSocket {
    /// Create a socket with no endpoints.
    pub fn new(domain: Domain, protocol: Protocol, options: SocketOptions) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = flume::bounded(options.recv_capacity());
        let (outbound_tx, outbound_rx) = flume::bounded(options.send_capacity());
        let (wake_tx, wake_rx) = flume::bounded(1);
        let inbound_capacity = options.recv_capacity();

        debug!("[PAIR] Creating {} {} socket", domain, protocol);
        Arc::new_cyclic(|me| Self {
            domain,
            protocol,
            inner: Mutex::new(Inner {
                state: SocketState::Unbound,
                options,
                endpoints: Vec::new(),
                next_endpoint: 0,
                next_pipe: 0,
                dialing: false,
                pipe: None,
                inbound_tx,
                inbound_rx,
                inbound_capacity,
                outbound_tx,
                outbound_rx,
                pending: Arc::new(AtomicUsize::new(0)),
                _wake_tx: wake_tx,
                wake_rx,
            }),
            me: me.clone(),
        })
    }

    #[inline]
    pub fn domain(&self) -> Domain {
        self.domain
    }

    #[inline]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SocketState {
        self.inner.lock().state
    }

    /// Snapshot of the socket options.
    pub fn options(&self) -> SocketOptions {
        self.inner.lock().options.clone()
    }

    /// Replace the socket options.
    ///
    /// Timeouts apply to the next blocking call. Queue capacities and
    /// connection settings apply to connections established afterwards.
    pub fn set_options(&self, options: SocketOptions) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.options = options;
        Ok(())
    }

    /// Modify the socket options in place under the socket lock.
    pub fn update_options(&self, f: impl FnOnce(&mut SocketOptions)) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        f(&mut inner.options);
        Ok(())
    }

    /// Resolved address of endpoint `id` (the real port after binding port 0).
    pub fn endpoint_address(&self, id: EndpointId) -> Result<Address> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        inner
            .endpoints
            .iter()
            .find(|ep| ep.id() == id)
            .map(|ep| ep.address().clone())
            .ok_or_else(|| NanospError::invalid_argument(format!("unknown endpoint {id}")))
    }

    /// Listen on `address` for a peer.
    ///
    /// # Errors
    ///
    /// `InvalidAddress` for a malformed address, `AddressInUse` when it is
    /// taken, `InvalidState` while connected, `InvalidDescriptor` after close.
    pub fn bind(&self, address: &str) -> Result<EndpointId> {
        let address = Address::parse(address)?;
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if inner.state == SocketState::Connected {
            return Err(NanospError::InvalidState("PAIR socket already has a peer"));
        }

        let id = inner.next_endpoint;
        let endpoint = Endpoint::listen(
            id,
            &address,
            self.protocol,
            &inner.options,
            self.me.clone() as Weak<dyn ConnectionSink>,
        )?;
        inner.next_endpoint += 1;

        debug!(endpoint = id, address = %endpoint.address(), "[PAIR] Bound");
        inner.endpoints.push(endpoint);
        if inner.state != SocketState::Connecting {
            inner.state = SocketState::Listening;
        }
        Ok(id)
    }

    /// Dial `address` and establish the peer.
    ///
    /// Returns once the handshake has completed. The socket lock is not held
    /// while dialing, so other threads can still use the socket.
    ///
    /// # Errors
    ///
    /// `InvalidState` while connected or while another dial is in flight,
    /// `Transport` when the dial fails, `Protocol`/`Timeout` when the
    /// handshake does.
    pub fn connect(&self, address: &str) -> Result<EndpointId> {
        let address = Address::parse(address)?;

        let (prior, options) = {
            let mut inner = self.inner.lock();
            inner.ensure_open()?;
            match inner.state {
                SocketState::Connected => {
                    return Err(NanospError::InvalidState("PAIR socket already has a peer"))
                }
                _ if inner.dialing => {
                    return Err(NanospError::InvalidState("a connect is already in progress"))
                }
                _ => {}
            }
            let prior = inner.state;
            inner.dialing = true;
            inner.state = SocketState::Connecting;
            (prior, inner.options.clone())
        };

        debug!(address = %address, "[PAIR] Connecting");
        let dialed = endpoint::dial(&address, self.protocol, &options);

        let mut inner = self.inner.lock();
        inner.dialing = false;
        if inner.state == SocketState::Closed {
            if let Ok(stream) = dialed {
                let _ = stream.shutdown();
            }
            return Err(NanospError::Shutdown);
        }

        let stream = match dialed {
            Ok(stream) => stream,
            Err(e) => {
                if inner.state == SocketState::Connecting {
                    inner.state = inner.idle_state(prior);
                }
                debug!(address = %address, "[PAIR] Connect failed: {}", e);
                return Err(e);
            }
        };

        // An inbound peer may have won the race while we were dialing.
        if inner.pipe.is_some() {
            let _ = stream.shutdown();
            return Err(NanospError::InvalidState("PAIR socket already has a peer"));
        }

        let id = inner.next_endpoint;
        inner.next_endpoint += 1;
        inner.endpoints.push(Endpoint::connector(id, address));
        if let Err(e) = self.install_pipe(&mut inner, id, stream) {
            inner.endpoints.retain(|ep| ep.id() != id);
            inner.state = inner.idle_state(prior);
            return Err(e);
        }
        Ok(id)
    }

    /// Start a pipe for `stream` and mark the socket connected.
    fn install_pipe(&self, inner: &mut Inner, endpoint: EndpointId, stream: Box<dyn Stream>) -> Result<()> {
        inner.refresh_queues();
        let id = inner.next_pipe;
        inner.next_pipe += 1;

        let queues = PipeQueues {
            inbound: inner.inbound_tx.clone(),
            outbound: inner.outbound_rx.clone(),
            pending: inner.pending.clone(),
        };
        let handle = PipeHandle::spawn(
            id,
            stream,
            queues,
            &inner.options,
            self.me.clone() as Weak<dyn PipeOwner>,
        )?;

        debug!(pipe = id, endpoint, peer = handle.peer(), "[PAIR] Peer established");
        inner.pipe = Some(ActivePipe { endpoint, handle });
        inner.state = SocketState::Connected;
        Ok(())
    }

    /// Queue `msg` for the peer and return its length.
    ///
    /// With `NN_DONTWAIT` a full queue fails with `WouldBlock`; otherwise the
    /// call waits for room, up to `send_timeout`.
    pub fn send(&self, msg: impl Into<Message>, flags: i32) -> Result<usize> {
        let dontwait = parse_flags(flags)?;
        let payload = msg.into().into_bytes();
        let len = payload.len();

        let (tx, wake, pending, timeout) = {
            let inner = self.inner.lock();
            inner.ensure_open()?;
            if inner.pipe.is_none() {
                return Err(NanospError::NotConnected);
            }
            (
                inner.outbound_tx.clone(),
                inner.wake_rx.clone(),
                inner.pending.clone(),
                inner.options.send_timeout,
            )
        };

        // Counted before the writer can see it, so its decrement never
        // underflows.
        pending.fetch_add(1, Ordering::AcqRel);
        let outcome = match tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Disconnected(_)) => Err(NanospError::Shutdown),
            Err(flume::TrySendError::Full(_)) if dontwait => Err(NanospError::WouldBlock),
            Err(flume::TrySendError::Full(payload)) => wait_send(&tx, &wake, payload, timeout),
        };
        if let Err(e) = outcome {
            release_pending(&pending, 1);
            return Err(e);
        }

        // The peer may have been lost between taking the queue and queueing;
        // the message then sits in a queue no pipe will ever drain.
        if !self.inner.lock().is_current(&tx) {
            release_pending(&pending, 1);
            return Err(NanospError::Shutdown);
        }

        trace!(len, "[PAIR] Queued message");
        Ok(len)
    }

    /// Take the next message from the peer.
    ///
    /// With `NN_DONTWAIT` an empty queue fails with `WouldBlock`; otherwise the
    /// call waits up to `recv_timeout`. Messages that arrived before the peer
    /// went away can still be received.
    pub fn recv(&self, flags: i32) -> Result<Message> {
        let dontwait = parse_flags(flags)?;

        let (rx, wake, state, timeout) = {
            let inner = self.inner.lock();
            inner.ensure_open()?;
            (
                inner.inbound_rx.clone(),
                inner.wake_rx.clone(),
                inner.state,
                inner.options.recv_timeout,
            )
        };

        let payload = match rx.try_recv() {
            Ok(payload) => payload,
            Err(flume::TryRecvError::Disconnected) => return Err(NanospError::Shutdown),
            Err(flume::TryRecvError::Empty) if state == SocketState::ShuttingDown => {
                return Err(NanospError::NotConnected)
            }
            Err(flume::TryRecvError::Empty) if dontwait => return Err(NanospError::WouldBlock),
            Err(flume::TryRecvError::Empty) => wait_recv(&rx, &wake, timeout)?,
        };

        trace!(len = payload.len(), "[PAIR] Received message");
        Ok(Message::new(payload))
    }

    /// Remove endpoint `id`, closing its listener and any connection it owns.
    ///
    /// Blocked `send`/`recv` calls return `Shutdown`.
    pub fn shutdown(&self, id: EndpointId) -> Result<()> {
        let (mut endpoint, pipe) = {
            let mut inner = self.inner.lock();
            inner.ensure_open()?;
            let pos = inner
                .endpoints
                .iter()
                .position(|ep| ep.id() == id)
                .ok_or_else(|| NanospError::invalid_argument(format!("unknown endpoint {id}")))?;
            let endpoint = inner.endpoints.remove(pos);

            let owns_pipe = inner.pipe.as_ref().is_some_and(|p| p.endpoint == id);
            let pipe = if owns_pipe { inner.take_pipe() } else { None };
            inner.wake_waiters();

            let prior = inner.state;
            match prior {
                SocketState::Connected if inner.pipe.is_none() => {
                    inner.state = inner.idle_state(prior);
                }
                SocketState::Listening if !inner.has_listener() => {
                    inner.state = SocketState::ShuttingDown;
                }
                _ => {}
            }
            debug!(endpoint = id, state = inner.state.as_str(), "[PAIR] Endpoint shut down");
            (endpoint, pipe)
        };

        drop(pipe);
        join_acceptor(endpoint.terminate());
        Ok(())
    }

    /// Close the socket.
    ///
    /// Waits up to `linger` for queued messages to be written, then terminates
    /// every endpoint. Blocked calls return `Shutdown`; any later call
    /// returns `InvalidDescriptor`.
    pub fn close(&self) -> Result<()> {
        let (linger, pending) = {
            let inner = self.inner.lock();
            inner.ensure_open()?;
            let linger = if inner.pipe.is_some() {
                inner.options.linger_window()
            } else {
                None
            };
            (linger, inner.pending.clone())
        };

        if let Some(window) = linger {
            let deadline = Instant::now() + window;
            while pending.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
                thread::sleep(LINGER_POLL);
            }
            let left = pending.load(Ordering::Acquire);
            if left > 0 {
                warn!(left, "[PAIR] Linger expired with unsent messages");
            }
        }

        let (endpoints, pipe) = {
            let mut inner = self.inner.lock();
            inner.ensure_open()?;
            inner.state = SocketState::Closed;
            let pipe = inner.take_pipe();
            inner.wake_waiters();
            let _ = inner.inbound_rx.drain().count();
            (std::mem::take(&mut inner.endpoints), pipe)
        };

        drop(pipe);
        for mut endpoint in endpoints {
            join_acceptor(endpoint.terminate());
        }
        debug!("[PAIR] Socket closed");
        Ok(())
    }
}

impl PipeOwner for PairSocket {
    fn pipe_closed(&self, id: PipeId) {
        let pipe = {
            let mut inner = self.inner.lock();
            if inner.pipe.as_ref().map(|p| p.handle.id()) != Some(id) {
                return;
            }
            let pipe = inner.take_pipe();
            if inner.state == SocketState::Connected {
                inner.state = inner.idle_state(SocketState::Connected);
            }
            debug!(pipe = id, state = inner.state.as_str(), "[PAIR] Peer lost");
            pipe
        };
        drop(pipe);
    }
}

impl ConnectionSink for PairSocket {
    fn can_accept(&self, endpoint: EndpointId) -> bool {
        let inner = self.inner.lock();
        inner.state != SocketState::Closed && inner.has_endpoint(endpoint) && inner.pipe.is_none()
    }

    fn attach(&self, endpoint: EndpointId, stream: Box<dyn Stream>) {
        let mut inner = self.inner.lock();
        if inner.state == SocketState::Closed || !inner.has_endpoint(endpoint) {
            let _ = stream.shutdown();
            return;
        }
        if inner.pipe.is_some() {
            warn!(endpoint, peer = %stream.peer(), "[PAIR] Already paired, dropping extra peer");
            let _ = stream.shutdown();
            return;
        }
        if let Err(e) = self.install_pipe(&mut inner, endpoint, stream) {
            warn!(endpoint, "[PAIR] Cannot start pipe: {}", e);
        }
    }
}

impl Drop for PairSocket {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state != SocketState::Closed {
            inner.state = SocketState::Closed;
            inner.pipe = None;
            for mut endpoint in inner.endpoints.drain(..) {
                // Never join here: this may run on a pipe thread.
                let _ = endpoint.terminate();
            }
        }
    }
}

fn parse_flags(flags: i32) -> Result<bool> {
    if flags & !NN_DONTWAIT != 0 {
        return Err(NanospError::invalid_argument(format!("unknown flags {flags:#x}")));
    }
    Ok(flags & NN_DONTWAIT != 0)
}

fn join_acceptor(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            warn!("[PAIR] Accept thread panicked");
        }
    }
}

enum Waited<T> {
    Done(T),
    Interrupted,
}

fn wait_send(
    tx: &Sender<Bytes>,
    wake: &Receiver<()>,
    payload: Bytes,
    timeout: Option<Duration>,
) -> Result<()> {
    let selector = flume::Selector::new()
        .send(tx, payload, |res| match res {
            Ok(()) => Waited::Done(()),
            Err(_) => Waited::Interrupted,
        })
        .recv(wake, |_| Waited::Interrupted);
    let waited = match timeout {
        Some(timeout) => selector
            .wait_timeout(timeout)
            .map_err(|_| NanospError::Timeout)?,
        None => selector.wait(),
    };
    match waited {
        Waited::Done(()) => Ok(()),
        Waited::Interrupted => Err(NanospError::Shutdown),
    }
}

fn wait_recv(rx: &Receiver<Bytes>, wake: &Receiver<()>, timeout: Option<Duration>) -> Result<Bytes> {
    let selector = flume::Selector::new()
        .recv(rx, |res| match res {
            Ok(payload) => Waited::Done(payload),
            Err(_) => Waited::Interrupted,
        })
        .recv(wake, |_| Waited::Interrupted);
    let waited = match timeout {
        Some(timeout) => selector
            .wait_timeout(timeout)
            .map_err(|_| NanospError::Timeout)?,
        None => selector.wait(),
    };
    match waited {
        Waited::Done(payload) => Ok(payload),
        Waited::Interrupted => Err(NanospError::Shutdown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket() -> Arc<PairSocket> {
        PairSocket::new(Domain::Sp, Protocol::Pair, SocketOptions::default())
    }

    fn wait_for_state(s: &PairSocket, want: SocketState) -> SocketState {
        for _ in 0..400 {
            let state = s.state();
            if state == want {
                return state;
            }
            thread::sleep(Duration::from_millis(5));
        }
        s.state()
    }

    fn connected_pair(name: &str) -> (Arc<PairSocket>, Arc<PairSocket>) {
        let server = socket();
        let client = socket();
        let address = format!("inproc://{name}");
        server.bind(&address).unwrap();
        client.connect(&address).unwrap();
        assert_eq!(wait_for_state(&server, SocketState::Connected), SocketState::Connected);
        (server, client)
    }

    #[test]
    fn test_state_transitions() {
        let s = socket();
        assert_eq!(s.state(), SocketState::Unbound);
        let eid = s.bind("inproc://pair-states").unwrap();
        assert_eq!(eid, 0);
        assert_eq!(s.state(), SocketState::Listening);
        s.shutdown(eid).unwrap();
        assert_eq!(s.state(), SocketState::ShuttingDown);
        // A new bind is allowed from ShuttingDown.
        assert_eq!(s.bind("inproc://pair-states").unwrap(), 1);
        assert_eq!(s.state(), SocketState::Listening);
        s.close().unwrap();
        assert_eq!(s.state(), SocketState::Closed);
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let (server, client) = connected_pair("pair-order");
        for i in 0..100u32 {
            client.send(i.to_be_bytes().to_vec(), 0).unwrap();
        }
        for i in 0..100u32 {
            assert_eq!(server.recv(0).unwrap().as_bytes(), i.to_be_bytes());
        }
        server.send("back", 0).unwrap();
        assert_eq!(client.recv(0).unwrap().as_bytes(), b"back");
    }

    #[test]
    fn test_send_returns_full_length() {
        let (_server, client) = connected_pair("pair-length");
        assert_eq!(client.send(vec![0u8; 70_000], 0).unwrap(), 70_000);
        assert_eq!(client.send(Bytes::new(), 0).unwrap(), 0);
    }

    #[test]
    fn test_send_without_peer() {
        let s = socket();
        assert!(matches!(s.send("x", 0), Err(NanospError::NotConnected)));
        s.bind("inproc://pair-no-peer").unwrap();
        assert!(matches!(s.send("x", NN_DONTWAIT), Err(NanospError::NotConnected)));
    }

    #[test]
    fn test_second_bind_and_connect_on_connected() {
        let (server, client) = connected_pair("pair-second");
        assert!(matches!(
            client.connect("inproc://pair-second"),
            Err(NanospError::InvalidState(_))
        ));
        assert!(matches!(
            server.bind("inproc://pair-second-extra"),
            Err(NanospError::InvalidState(_))
        ));
        // The first connection still works.
        client.send("still here", 0).unwrap();
        assert_eq!(server.recv(0).unwrap().as_bytes(), b"still here");
    }

    #[test]
    fn test_extra_peer_is_refused() {
        let (server, client) = connected_pair("pair-extra");
        let intruder = socket();
        let err = intruder.connect("inproc://pair-extra").unwrap_err();
        assert!(matches!(err, NanospError::Protocol(_) | NanospError::Transport(_)));
        assert_eq!(intruder.state(), SocketState::Unbound);

        client.send("first", 0).unwrap();
        assert_eq!(server.recv(0).unwrap().as_bytes(), b"first");
        assert_eq!(server.state(), SocketState::Connected);
    }

    #[test]
    fn test_dontwait_on_empty_queue() {
        let (server, _client) = connected_pair("pair-dontwait");
        assert!(matches!(server.recv(NN_DONTWAIT), Err(NanospError::WouldBlock)));
    }

    #[test]
    fn test_dontwait_on_full_queue() {
        // TCP, so the stalled reader on the server side pushes back through
        // the kernel buffers all the way to our outbound queue.
        let server = socket();
        server
            .set_options(server.options().with_recv_hwm(1).with_max_msg_size(None))
            .unwrap();
        let client = socket();
        client
            .set_options(client.options().with_send_hwm(1).with_linger(None))
            .unwrap();
        let eid = server.bind("tcp://127.0.0.1:0").unwrap();
        let address = server.endpoint_address(eid).unwrap().to_string();
        client.connect(&address).unwrap();
        wait_for_state(&server, SocketState::Connected);

        let big = Bytes::from(vec![0u8; 1 << 20]);
        let mut saw_would_block = false;
        for _ in 0..256 {
            match client.send(big.clone(), NN_DONTWAIT) {
                Ok(_) => thread::sleep(Duration::from_millis(2)),
                Err(NanospError::WouldBlock) => {
                    saw_would_block = true;
                    break;
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert!(saw_would_block);

        // A rejected send leaves the pending count alone.
        let pending = client.inner.lock().pending.clone();
        let before = pending.load(Ordering::Acquire);
        assert!(matches!(
            client.send(big.clone(), NN_DONTWAIT),
            Err(NanospError::WouldBlock)
        ));
        assert_eq!(pending.load(Ordering::Acquire), before);

        client.close().unwrap();
        server.close().unwrap();
    }

    #[test]
    fn test_dontwait_on_full_queue_inproc() {
        let server = socket();
        server.set_options(server.options().with_recv_hwm(1)).unwrap();
        let client = socket();
        client
            .set_options(client.options().with_send_hwm(1).with_linger(None))
            .unwrap();
        server.bind("inproc://pair-full-inproc").unwrap();
        client.connect("inproc://pair-full-inproc").unwrap();
        wait_for_state(&server, SocketState::Connected);

        // The server never receives: its reader stalls, the byte pipe fills
        // and the client's writer stops draining the outbound queue.
        let chunk = Bytes::from(vec![0u8; 64 * 1024]);
        let mut accepted = 0;
        let mut saw_would_block = false;
        for _ in 0..256 {
            match client.send(chunk.clone(), NN_DONTWAIT) {
                Ok(_) => {
                    accepted += 1;
                    thread::sleep(Duration::from_millis(2));
                }
                Err(NanospError::WouldBlock) => {
                    saw_would_block = true;
                    break;
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert!(saw_would_block);
        assert!(accepted < 16, "{accepted} messages buffered before pushback");

        client.close().unwrap();
        server.close().unwrap();
    }

    #[test]
    fn test_send_racing_peer_loss_leaves_nothing_pending() {
        for round in 0..50 {
            let server = socket();
            let client = socket();
            client
                .set_options(client.options().with_linger(Some(Duration::from_secs(2))))
                .unwrap();
            let address = format!("inproc://pair-send-race-{round}");
            server.bind(&address).unwrap();
            client.connect(&address).unwrap();

            let sender = client.clone();
            let hammer = thread::spawn(move || loop {
                match sender.send("x", NN_DONTWAIT) {
                    Ok(_) => {}
                    Err(NanospError::WouldBlock) => thread::yield_now(),
                    Err(e) => return e,
                }
            });
            thread::sleep(Duration::from_millis(2));
            server.close().unwrap();
            let err = hammer.join().unwrap();
            assert!(matches!(err, NanospError::Shutdown | NanospError::NotConnected));
            assert_eq!(client.inner.lock().pending.load(Ordering::Acquire), 0);

            // A new peer, then close: nothing lost earlier may hold up the linger.
            let next = socket();
            let next_address = format!("inproc://pair-send-race-{round}-next");
            next.bind(&next_address).unwrap();
            client.connect(&next_address).unwrap();
            let start = Instant::now();
            client.close().unwrap();
            assert!(start.elapsed() < Duration::from_secs(1));
            next.close().unwrap();
        }
    }

    #[test]
    fn test_recv_timeout() {
        let (server, _client) = connected_pair("pair-timeout");
        server
            .set_options(server.options().with_recv_timeout(Duration::from_millis(30)))
            .unwrap();
        let start = Instant::now();
        assert!(matches!(server.recv(0), Err(NanospError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_shutdown_wakes_blocked_recv() {
        let (server, _client) = connected_pair("pair-wake");
        let waiter = server.clone();
        let handle = thread::spawn(move || waiter.recv(0));
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        server.shutdown(0).unwrap();
        let res = handle.join().unwrap();
        assert!(matches!(res, Err(NanospError::Shutdown)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_unknown_endpoint() {
        let s = socket();
        assert!(matches!(s.shutdown(5), Err(NanospError::InvalidArgument(_))));
    }

    #[test]
    fn test_peer_close_keeps_buffered_messages() {
        let server = socket();
        let client = socket();
        server.bind("inproc://pair-buffered").unwrap();
        client.connect("inproc://pair-buffered").unwrap();
        client.send("before close", 0).unwrap();
        client.close().unwrap();

        assert_eq!(server.recv(0).unwrap().as_bytes(), b"before close");
        // The listener remains, so the socket waits for a new peer.
        assert_eq!(wait_for_state(&server, SocketState::Listening), SocketState::Listening);
    }

    #[test]
    fn test_connector_falls_back_to_shutting_down() {
        let (server, client) = connected_pair("pair-fallback");
        server.close().unwrap();
        assert_eq!(
            wait_for_state(&client, SocketState::ShuttingDown),
            SocketState::ShuttingDown
        );
        assert!(matches!(client.recv(0), Err(NanospError::NotConnected)));
        assert!(matches!(client.send("x", 0), Err(NanospError::NotConnected)));
    }

    #[test]
    fn test_listener_accepts_new_peer_after_loss() {
        let (server, first) = connected_pair("pair-repeer");
        first.close().unwrap();
        wait_for_state(&server, SocketState::Listening);

        let second = socket();
        second.connect("inproc://pair-repeer").unwrap();
        wait_for_state(&server, SocketState::Connected);
        second.send("second peer", 0).unwrap();
        assert_eq!(server.recv(0).unwrap().as_bytes(), b"second peer");
    }

    #[test]
    fn test_failed_connect_restores_state() {
        let s = socket();
        let err = s.connect("inproc://pair-nobody-home").unwrap_err();
        assert!(matches!(err, NanospError::Transport(_)));
        assert_eq!(s.state(), SocketState::Unbound);
    }

    #[test]
    fn test_closed_socket_rejects_everything() {
        let s = socket();
        s.close().unwrap();
        assert!(matches!(s.close(), Err(NanospError::InvalidDescriptor)));
        assert!(matches!(s.bind("inproc://pair-closed"), Err(NanospError::InvalidDescriptor)));
        assert!(matches!(s.send("x", 0), Err(NanospError::InvalidDescriptor)));
        assert!(matches!(s.recv(0), Err(NanospError::InvalidDescriptor)));
    }

    #[test]
    fn test_unknown_flags_rejected() {
        let s = socket();
        assert!(matches!(s.recv(0x40), Err(NanospError::InvalidArgument(_))));
    }

    #[test]
    fn test_linger_flushes_before_close() {
        let (server, client) = connected_pair("pair-linger");
        for i in 0..50u8 {
            client.send(vec![i; 128], 0).unwrap();
        }
        client.close().unwrap();
        for i in 0..50u8 {
            assert_eq!(server.recv(0).unwrap().as_bytes(), vec![i; 128].as_slice());
        }
    }

    #[test]
    fn test_endpoint_address_after_bind() {
        let s = socket();
        let eid = s.bind("inproc://pair-address").unwrap();
        assert_eq!(s.endpoint_address(eid).unwrap().to_string(), "inproc://pair-address");
        assert!(matches!(s.endpoint_address(9), Err(NanospError::InvalidArgument(_))));
    }
}
