//! Connection header exchange.
//!
//! Both sides write their 8-byte header and then read the peer's before any
//! message frame is sent:
//!
//! ```text
//! 00 'S' 'P' 00 <protocol: u16 BE> 00 00
//! ```
//!
//! The exchange runs on the connecting or accepting thread, so a pipe only
//! starts its reader and writer once the peer has been validated.

use std::io;
use std::time::Duration;

use nanosp_core::error::{NanospError, Result};
use nanosp_core::protocol::Protocol;
use nanosp_core::transport::{is_timeout, Stream};
use tracing::debug;

/// Length of the connection header.
pub const HEADER_LEN: usize = 8;

const MAGIC: [u8; 4] = [0x00, b'S', b'P', 0x00];

/// Build the header announcing `protocol`.
#[must_use]
pub fn build_header(protocol: Protocol) -> [u8; HEADER_LEN] {
    let id = protocol.wire_id().to_be_bytes();
    [MAGIC[0], MAGIC[1], MAGIC[2], MAGIC[3], id[0], id[1], 0x00, 0x00]
}

/// Validate a received header and extract the peer's protocol.
pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<Protocol> {
    if header[..4] != MAGIC {
        return Err(NanospError::protocol(format!(
            "bad connection header magic {:02x?}",
            &header[..4]
        )));
    }
    if header[6..] != [0x00, 0x00] {
        return Err(NanospError::protocol("reserved header bytes are not zero"));
    }
    let id = u16::from_be_bytes([header[4], header[5]]);
    Protocol::from_wire(id)
        .ok_or_else(|| NanospError::protocol(format!("unknown peer protocol {id}")))
}

/// Exchange headers on `stream`.
///
/// The peer's header must arrive within `timeout`. Returns the peer's
/// protocol once it is known to be compatible with `local`. The stream's read
/// timeout is cleared again on success.
pub fn perform_handshake(
    stream: &mut dyn Stream,
    local: Protocol,
    timeout: Duration,
) -> Result<Protocol> {
    debug!(
        "[HANDSHAKE] Starting handshake with {} as {}",
        stream.peer(),
        local
    );

    stream.set_read_timeout(Some(timeout))?;
    stream.write_all(&build_header(local))?;

    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).map_err(|e| match e {
        e if is_timeout(&e) => NanospError::Timeout,
        e if e.kind() == io::ErrorKind::UnexpectedEof => {
            NanospError::protocol("peer closed the connection during the handshake")
        }
        e => NanospError::Transport(e),
    })?;

    let peer = parse_header(&header)?;
    if !local.is_compatible(peer) {
        return Err(NanospError::protocol(format!(
            "{local} socket cannot talk to a {peer} peer"
        )));
    }

    stream.set_read_timeout(None)?;
    debug!("[HANDSHAKE] Handshake complete, peer speaks {}", peer);
    Ok(peer)
}
