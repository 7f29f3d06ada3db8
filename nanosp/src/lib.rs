//! # nanosp
//!
//! Scalability-protocol sockets with a nanomsg-style call surface.
//!
//! ## Architecture
//!
//! nanosp is split into layers:
//!
//! - **`nanosp-core`**: errors and errno codes, addresses, options, the
//!   byte-stream transport trait with TCP and inproc implementations
//! - **`nanosp-proto`**: framing, the connection handshake, per-connection
//!   pipes and the PAIR socket state machine
//! - **`nanosp`**: the descriptor registry and public API (this crate)
//!
//! ## Quick Start
//!
//! ### Descriptor API
//!
//! ```rust
//! use nanosp::nn::{self, AF_SP, NN_PAIR};
//!
//! # fn main() -> nanosp::Result<()> {
//! let a = nn::socket(AF_SP, NN_PAIR)?;
//! let b = nn::socket(AF_SP, NN_PAIR)?;
//! nn::bind(a, "inproc://lib-doc")?;
//! nn::connect(b, "inproc://lib-doc")?;
//!
//! nn::send(b, b"hello", 0)?;
//! assert_eq!(&nn::recv(a, 0)?[..], b"hello");
//! nn::close(a)?;
//! nn::close(b)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Owned handle
//!
//! ```rust,no_run
//! use nanosp::Socket;
//!
//! # fn main() -> nanosp::Result<()> {
//! let socket = Socket::pair()?;
//! socket.connect("tcp://127.0.0.1:5555")?;
//! socket.send("hello", 0)?;
//! let reply = socket.recv(0)?;
//! println!("got {} bytes", reply.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Blocking model
//!
//! Every call blocks the calling thread (bounded by the send/recv timeouts)
//! unless `NN_DONTWAIT` is passed. Each connection is served by its own
//! reader and writer threads, and each listener by an accept thread.
//!
//! Set `RUST_LOG=nanosp_proto=debug` and call [`dev_tracing::init_tracing`]
//! to follow connection lifecycles.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod dev_tracing;
pub mod nn;
pub mod registry;
mod socket;

pub use socket::Socket;

// Re-export core types
pub use bytes::Bytes;
pub use nanosp_core::address::Address;
pub use nanosp_core::error::{NanospError, Result};
pub use nanosp_core::message::Message;
pub use nanosp_core::options::SocketOptions;
pub use nanosp_core::protocol::{Domain, Protocol};
pub use nanosp_proto::{EndpointId, SocketState};
