//! Endpoints: the bound and connected addresses of a socket.
//!
//! A listener endpoint owns an accept thread. Every accepted stream gets its
//! own short-lived handshake thread so one slow peer cannot hold up the
//! others; streams that pass the handshake are handed to the socket through
//! [`ConnectionSink::attach`].

use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nanosp_core::address::Address;
use nanosp_core::error::{NanospError, Result};
use nanosp_core::options::SocketOptions;
use nanosp_core::protocol::Protocol;
use nanosp_core::transport::{self, Listener, Stream};
use tracing::{debug, warn};

use crate::handshake::perform_handshake;

/// Endpoint identifier, unique within one socket.
pub type EndpointId = i32;

/// Pause after an accept failure that is not a shutdown (e.g. out of fds).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// How an endpoint was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    /// Created by `bind`
    Listener,
    /// Created by `connect`
    Connector,
}

/// Receives inbound streams that completed the handshake.
pub trait ConnectionSink: Send + Sync {
    /// Whether a stream accepted by `endpoint` could be attached right now.
    ///
    /// Asked before the handshake; a refused stream is closed without a
    /// connection header, so the dialer's handshake fails.
    fn can_accept(&self, endpoint: EndpointId) -> bool;

    /// Take ownership of an established stream accepted by `endpoint`.
    fn attach(&self, endpoint: EndpointId, stream: Box<dyn Stream>);
}

/// One bound or connected address of a socket.
pub struct Endpoint {
    id: EndpointId,
    role: EndpointRole,
    address: Address,
    listener: Option<Arc<dyn Listener>>,
    acceptor: Option<JoinHandle<()>>,
}

impl Endpoint {
    /// Listen on `address` and start accepting peers speaking `protocol`.
    pub fn listen(
        id: EndpointId,
        address: &Address,
        protocol: Protocol,
        options: &SocketOptions,
        sink: Weak<dyn ConnectionSink>,
    ) -> Result<Self> {
        let listener: Arc<dyn Listener> = transport::for_address(address)
            .listen(address, options)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AddrInUse => NanospError::AddressInUse(address.to_string()),
                _ => NanospError::Transport(e),
            })?
            .into();
        let local = listener.local_address();

        let accept = AcceptLoop {
            endpoint: id,
            listener: listener.clone(),
            protocol,
            handshake_timeout: options.handshake_timeout,
            sink,
        };
        let acceptor = match thread::Builder::new()
            .name(format!("nanosp-accept-{id}"))
            .spawn(move || accept.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                listener.close();
                return Err(e.into());
            }
        };

        debug!(endpoint = id, address = %local, "[ENDPOINT] Listening");
        Ok(Self {
            id,
            role: EndpointRole::Listener,
            address: local,
            listener: Some(listener),
            acceptor: Some(acceptor),
        })
    }

    /// Record a connected endpoint. The connection itself lives in a pipe.
    pub fn connector(id: EndpointId, address: Address) -> Self {
        Self {
            id,
            role: EndpointRole::Connector,
            address,
            listener: None,
            acceptor: None,
        }
    }

    #[inline]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    #[inline]
    pub fn role(&self) -> EndpointRole {
        self.role
    }

    /// Bound address for listeners (with the real port), dialed address for
    /// connectors.
    #[inline]
    pub fn address(&self) -> &Address {
        &self.address
    }

    #[inline]
    pub fn is_listener(&self) -> bool {
        self.role == EndpointRole::Listener
    }

    /// Stop listening. Returns the accept thread so the caller can join it
    /// once it no longer holds any lock the thread might need.
    pub fn terminate(&mut self) -> Option<JoinHandle<()>> {
        if let Some(listener) = self.listener.take() {
            listener.close();
            debug!(endpoint = self.id, address = %self.address, "[ENDPOINT] Closed");
        }
        self.acceptor.take()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        // The accept thread exits on its own once the listener is closed.
        let _ = self.terminate();
    }
}

/// Dial `address` and run the handshake as `protocol`.
pub fn dial(address: &Address, protocol: Protocol, options: &SocketOptions) -> Result<Box<dyn Stream>> {
    let mut stream = transport::for_address(address).dial(address, options)?;
    if let Err(e) = perform_handshake(stream.as_mut(), protocol, options.handshake_timeout) {
        let _ = stream.shutdown();
        return Err(e);
    }
    Ok(stream)
}

struct AcceptLoop {
    endpoint: EndpointId,
    listener: Arc<dyn Listener>,
    protocol: Protocol,
    handshake_timeout: Duration,
    sink: Weak<dyn ConnectionSink>,
}

impl AcceptLoop {
    fn run(self) {
        loop {
            match self.listener.accept() {
                Ok(stream) => self.spawn_handshake(stream),
                Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => break,
                Err(e) => {
                    if self.sink.strong_count() == 0 {
                        break;
                    }
                    warn!(endpoint = self.endpoint, "[ENDPOINT] Accept failed: {}", e);
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
        }
        debug!(endpoint = self.endpoint, "[ENDPOINT] Accept loop stopped");
    }

    fn spawn_handshake(&self, mut stream: Box<dyn Stream>) {
        let endpoint = self.endpoint;
        let protocol = self.protocol;
        let timeout = self.handshake_timeout;
        let sink = self.sink.clone();

        let spawned = thread::Builder::new()
            .name(format!("nanosp-handshake-{endpoint}"))
            .spawn(move || {
                let peer = stream.peer();
                if !sink.upgrade().is_some_and(|sink| sink.can_accept(endpoint)) {
                    debug!(endpoint, peer = %peer, "[ENDPOINT] Refusing peer");
                    let _ = stream.shutdown();
                    return;
                }
                match perform_handshake(stream.as_mut(), protocol, timeout) {
                    Ok(_) => match sink.upgrade() {
                        Some(sink) => sink.attach(endpoint, stream),
                        None => {
                            let _ = stream.shutdown();
                        }
                    },
                    Err(e) => {
                        warn!(endpoint, peer = %peer, "[ENDPOINT] Handshake failed: {}", e);
                        let _ = stream.shutdown();
                    }
                }
            });
        if let Err(e) = spawned {
            warn!(endpoint, "[ENDPOINT] Cannot spawn handshake thread: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Collector {
        attached: Mutex<Vec<(EndpointId, String)>>,
        full: AtomicBool,
    }

    impl ConnectionSink for Collector {
        fn can_accept(&self, _endpoint: EndpointId) -> bool {
            !self.full.load(Ordering::Acquire)
        }

        fn attach(&self, endpoint: EndpointId, stream: Box<dyn Stream>) {
            self.attached.lock().push((endpoint, stream.peer()));
        }
    }

    fn wait_attached(sink: &Collector, n: usize) -> usize {
        for _ in 0..200 {
            let len = sink.attached.lock().len();
            if len >= n {
                return len;
            }
            thread::sleep(Duration::from_millis(5));
        }
        sink.attached.lock().len()
    }

    #[test]
    fn test_accepted_peer_is_attached_after_handshake() {
        let sink = Arc::new(Collector::default());
        let weak: Weak<dyn ConnectionSink> = Arc::downgrade(&sink) as Weak<dyn ConnectionSink>;
        let address = Address::parse("inproc://endpoint-attach").unwrap();
        let opts = SocketOptions::default();

        let mut endpoint = Endpoint::listen(3, &address, Protocol::Pair, &opts, weak).unwrap();
        assert!(endpoint.is_listener());

        let _client = dial(&address, Protocol::Pair, &opts).unwrap();
        assert_eq!(wait_attached(&sink, 1), 1);
        assert_eq!(sink.attached.lock()[0].0, 3);

        let acceptor = endpoint.terminate().unwrap();
        acceptor.join().unwrap();
    }

    #[test]
    fn test_refused_peer_fails_its_handshake() {
        let sink = Arc::new(Collector::default());
        sink.full.store(true, Ordering::Release);
        let weak: Weak<dyn ConnectionSink> = Arc::downgrade(&sink) as Weak<dyn ConnectionSink>;
        let address = Address::parse("inproc://endpoint-refuse").unwrap();
        let opts = SocketOptions::default().with_handshake_timeout(Duration::from_secs(2));

        let mut endpoint = Endpoint::listen(0, &address, Protocol::Pair, &opts, weak).unwrap();
        let err = match dial(&address, Protocol::Pair, &opts) {
            Ok(_) => panic!("refused peer completed the handshake"),
            Err(e) => e,
        };
        assert!(matches!(err, NanospError::Protocol(_) | NanospError::Transport(_)));
        assert!(sink.attached.lock().is_empty());

        endpoint.terminate().unwrap().join().unwrap();
    }

    #[test]
    fn test_listen_resolves_port_zero() {
        let sink = Arc::new(Collector::default());
        let weak: Weak<dyn ConnectionSink> = Arc::downgrade(&sink) as Weak<dyn ConnectionSink>;
        let address = Address::parse("tcp://127.0.0.1:0").unwrap();

        let mut endpoint =
            Endpoint::listen(0, &address, Protocol::Pair, &SocketOptions::default(), weak).unwrap();
        match endpoint.address() {
            Address::Tcp(addr) => assert_ne!(addr.port(), 0),
            other => panic!("unexpected address {other}"),
        }
        endpoint.terminate().unwrap().join().unwrap();
    }

    #[test]
    fn test_address_in_use() {
        let sink = Arc::new(Collector::default());
        let weak: Weak<dyn ConnectionSink> = Arc::downgrade(&sink) as Weak<dyn ConnectionSink>;
        let address = Address::parse("inproc://endpoint-in-use").unwrap();
        let opts = SocketOptions::default();

        let _first = Endpoint::listen(0, &address, Protocol::Pair, &opts, weak.clone()).unwrap();
        let err = match Endpoint::listen(1, &address, Protocol::Pair, &opts, weak) {
            Ok(_) => panic!("second listener on the same name"),
            Err(e) => e,
        };
        assert!(matches!(err, NanospError::AddressInUse(_)));
    }

    #[test]
    fn test_dial_unbound_is_transport_error() {
        let address = Address::parse("inproc://endpoint-nobody").unwrap();
        let err = match dial(&address, Protocol::Pair, &SocketOptions::default()) {
            Ok(_) => panic!("dial to nothing succeeded"),
            Err(e) => e,
        };
        assert!(matches!(err, NanospError::Transport(_)));
    }
}
