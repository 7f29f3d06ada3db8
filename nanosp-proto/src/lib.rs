//! # nanosp proto
//!
//! The scalability-protocol layer of nanosp.
//!
//! ## Overview
//!
//! - **codec**: length-prefixed message framing (8-byte big-endian size)
//! - **handshake**: the 8-byte connection header both peers exchange
//! - **pipe**: reader/writer threads for one established connection
//! - **endpoint**: bound and connected addresses, accept loops
//! - **pair**: the PAIR socket state machine
//!
//! Everything is blocking and thread-based: a socket is shared behind an
//! `Arc` and its background threads reach it through weak references, so
//! dropping the last handle tears the connection down.
//!
//! Use the `nanosp` crate for the descriptor API.

// Allow some pedantic lints
#![forbid(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]

pub mod codec;
pub mod endpoint;
pub mod handshake;
pub mod pair;
pub mod pipe;

pub use endpoint::EndpointId;
pub use pair::{PairSocket, SocketState};
