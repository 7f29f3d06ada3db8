//! nanosp Core
//!
//! This crate contains the protocol-agnostic building blocks:
//! - Error types and the errno-style code table (`error`, `errno`)
//! - Transport addressing (`address`)
//! - Socket options (`options`)
//! - Message payload type (`message`)
//! - Domain and protocol numbers (`protocol`)
//! - Byte-stream transports: the trait (`transport`), TCP (`tcp`) and
//!   in-process pipes (`inproc`)

#![forbid(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::new_without_default)]

pub mod address;
pub mod errno;
pub mod error;
pub mod inproc;
pub mod message;
pub mod options;
pub mod protocol;
pub mod tcp;
pub mod transport;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::address::Address;
    pub use crate::error::{NanospError, Result};
    pub use crate::message::Message;
    pub use crate::options::SocketOptions;
    pub use crate::protocol::{Domain, Protocol};
    pub use crate::transport::{Listener, Stream, Transport};
}
