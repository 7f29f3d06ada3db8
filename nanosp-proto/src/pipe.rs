//! Pipes: the I/O context of one established connection.
//!
//! A pipe owns two threads:
//!
//! - the **reader** pulls bytes from the stream, runs them through the
//!   [`FrameDecoder`] and pushes complete messages into the socket's inbound
//!   queue (blocking while it is full, which stops reading and lets the
//!   transport push back on the peer);
//! - the **writer** drains the outbound queue, frames every message and writes
//!   it out, batching whatever is already queued into one write.
//!
//! Both stop when the [`PipeHandle`] is dropped: the stop channel disconnects
//! and the stream is shut down. The reader reports the end of the connection
//! to its [`PipeOwner`] exactly once, whatever the cause.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use bytes::{Bytes, BytesMut};
use flume::{Receiver, Sender};
use nanosp_core::error::Result;
use nanosp_core::options::SocketOptions;
use nanosp_core::transport::Stream;
use tracing::{debug, trace, warn};

use crate::codec::{encode, FrameDecoder};

/// Identifies one connection over the lifetime of a socket.
pub type PipeId = u64;

/// Most messages the writer coalesces into a single write.
const MAX_WRITE_BATCH: usize = 64;

/// Byte budget for a coalesced write.
const MAX_WRITE_BATCH_BYTES: usize = 64 * 1024;

/// Subtract `n` from a pending counter, stopping at zero.
pub fn release_pending(pending: &AtomicUsize, n: usize) {
    let _ = pending.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
        Some(v.saturating_sub(n))
    });
}

/// Receives the end-of-connection notification.
pub trait PipeOwner: Send + Sync {
    /// Called from the reader thread when the connection is gone (peer EOF,
    /// I/O error, protocol violation or local termination).
    fn pipe_closed(&self, pipe: PipeId);
}

/// Socket-side queues a pipe is attached to.
pub struct PipeQueues {
    /// Decoded inbound messages.
    pub inbound: Sender<Bytes>,
    /// Messages waiting to be written.
    pub outbound: Receiver<Bytes>,
    /// Messages accepted by `send` and not yet handed to the transport.
    pub pending: Arc<AtomicUsize>,
}

/// Handle to a running pipe. Dropping it terminates the connection.
pub struct PipeHandle {
    id: PipeId,
    peer: String,
    control: Box<dyn Stream>,
    stop: Option<Sender<()>>,
}

impl PipeHandle {
    /// Start the reader and writer threads for an established stream.
    pub fn spawn(
        id: PipeId,
        stream: Box<dyn Stream>,
        queues: PipeQueues,
        options: &SocketOptions,
        owner: Weak<dyn PipeOwner>,
    ) -> Result<Self> {
        let peer = stream.peer();
        let control = stream.try_clone()?;
        let writer_stream = stream.try_clone()?;
        let (stop_tx, stop_rx) = flume::bounded::<()>(1);

        let reader = Reader {
            id,
            stream,
            inbound: queues.inbound,
            stop: stop_rx.clone(),
            decoder: FrameDecoder::new(options.max_msg_size),
            buf_size: options.read_buffer_size.max(1),
            owner,
        };
        let writer = Writer {
            id,
            stream: writer_stream,
            outbound: queues.outbound,
            stop: stop_rx,
            pending: queues.pending,
        };

        thread::Builder::new()
            .name(format!("nanosp-pipe-{id}-rx"))
            .spawn(move || reader.run())?;
        if let Err(e) = thread::Builder::new()
            .name(format!("nanosp-pipe-{id}-tx"))
            .spawn(move || writer.run())
        {
            // The reader is already running; shutting the stream down makes
            // it exit and report the pipe closed.
            let _ = control.shutdown();
            return Err(e.into());
        }

        debug!(pipe = id, peer = %peer, "[PIPE] Started");
        Ok(Self {
            id,
            peer,
            control,
            stop: Some(stop_tx),
        })
    }

    /// Pipe identifier.
    #[inline]
    pub fn id(&self) -> PipeId {
        self.id
    }

    /// Remote side of the connection.
    #[inline]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Stop both threads and close the connection. Idempotent.
    pub fn terminate(&mut self) {
        if self.stop.take().is_some() {
            if let Err(e) = self.control.shutdown() {
                debug!(pipe = self.id, "[PIPE] Shutdown error: {}", e);
            }
            debug!(pipe = self.id, peer = %self.peer, "[PIPE] Terminated");
        }
    }
}

impl Drop for PipeHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

enum Delivery {
    Delivered,
    Stopped,
}

struct Reader {
    id: PipeId,
    stream: Box<dyn Stream>,
    inbound: Sender<Bytes>,
    stop: Receiver<()>,
    decoder: FrameDecoder,
    buf_size: usize,
    owner: Weak<dyn PipeOwner>,
}

impl Reader {
    fn run(mut self) {
        match self.read_loop() {
            Ok(()) => debug!(pipe = self.id, "[PIPE] Connection closed"),
            Err(e) => warn!(pipe = self.id, "[PIPE] Connection dropped: {}", e),
        }
        let _ = self.stream.shutdown();
        if let Some(owner) = self.owner.upgrade() {
            owner.pipe_closed(self.id);
        }
    }

    fn read_loop(&mut self) -> io::Result<()> {
        let mut chunk = vec![0u8; self.buf_size];
        let mut buf = BytesMut::with_capacity(self.buf_size);

        loop {
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => {
                    if self.decoder.is_mid_frame() || !buf.is_empty() {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "peer closed the connection mid-frame",
                        ));
                    }
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            buf.extend_from_slice(&chunk[..n]);

            loop {
                let payload = match self.decoder.decode(&mut buf) {
                    Ok(Some(payload)) => payload,
                    Ok(None) => break,
                    Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
                };
                trace!(pipe = self.id, len = payload.len(), "[PIPE] Received message");
                if let Delivery::Stopped = self.deliver(payload) {
                    return Ok(());
                }
            }
        }
    }

    /// Push into the inbound queue, waiting while it is full unless the pipe
    /// is stopped in the meantime.
    fn deliver(&self, payload: Bytes) -> Delivery {
        let payload = match self.inbound.try_send(payload) {
            Ok(()) => return Delivery::Delivered,
            Err(flume::TrySendError::Disconnected(_)) => return Delivery::Stopped,
            Err(flume::TrySendError::Full(payload)) => payload,
        };
        trace!(pipe = self.id, "[PIPE] Inbound queue full, waiting");
        flume::Selector::new()
            .send(&self.inbound, payload, |res| match res {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Stopped,
            })
            .recv(&self.stop, |_| Delivery::Stopped)
            .wait()
    }
}

enum Wake {
    Message(Bytes),
    Stop,
}

struct Writer {
    id: PipeId,
    stream: Box<dyn Stream>,
    outbound: Receiver<Bytes>,
    stop: Receiver<()>,
    pending: Arc<AtomicUsize>,
}

impl Writer {
    fn run(mut self) {
        let mut buf = BytesMut::new();

        loop {
            let first = flume::Selector::new()
                .recv(&self.outbound, |res| match res {
                    Ok(msg) => Wake::Message(msg),
                    Err(_) => Wake::Stop,
                })
                .recv(&self.stop, |_| Wake::Stop)
                .wait();
            let Wake::Message(first) = first else {
                break;
            };

            buf.clear();
            encode(&first, &mut buf);
            let mut batched = 1;
            while batched < MAX_WRITE_BATCH && buf.len() < MAX_WRITE_BATCH_BYTES {
                match self.outbound.try_recv() {
                    Ok(msg) => {
                        encode(&msg, &mut buf);
                        batched += 1;
                    }
                    Err(_) => break,
                }
            }

            let written = self.stream.write_all(&buf);
            release_pending(&self.pending, batched);
            if let Err(e) = written {
                warn!(pipe = self.id, "[PIPE] Write failed: {}", e);
                // Wakes the reader, which reports the pipe closed.
                let _ = self.stream.shutdown();
                break;
            }
            trace!(pipe = self.id, messages = batched, bytes = buf.len(), "[PIPE] Flushed");
        }

        let unsent = self.outbound.drain().count();
        if unsent > 0 {
            release_pending(&self.pending, unsent);
        }
        debug!(pipe = self.id, unsent, "[PIPE] Writer stopped");
    }
}
