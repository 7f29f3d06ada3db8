//! Length-prefixed message framing.
//!
//! Wire format of one message:
//!
//! ```text
//! +----------------------------+------------------+
//! | length: u64, big-endian    | payload (length) |
//! +----------------------------+------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use nanosp_core::error::NanospError;
use thiserror::Error;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 8;

/// Upper bound on what the decoder reserves up front for a fragmented frame.
///
/// The staging buffer grows with the bytes that actually arrive, so a peer
/// announcing a huge frame cannot make us allocate for it in advance.
pub const STAGING_RESERVE_CAP: usize = 64 * 1024;

/// Framing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    SizeTooLarge { size: u64, max: usize },
}

impl From<FrameError> for NanospError {
    fn from(err: FrameError) -> Self {
        NanospError::protocol(err.to_string())
    }
}

/// Result type alias for framing operations
pub type Result<T> = std::result::Result<T, FrameError>;

/// Append one framed message to `out`.
pub fn encode(payload: &[u8], out: &mut BytesMut) {
    out.reserve(LENGTH_PREFIX_LEN + payload.len());
    out.put_u64(payload.len() as u64);
    out.extend_from_slice(payload);
}

/// Stateful frame decoder
///
/// Fast path:
/// - Entire frame present → zero-copy slice of the input
///
/// Slow path:
/// - Fragmented frame → reassemble into `BytesMut` across calls
#[derive(Debug)]
pub struct FrameDecoder {
    max_msg_size: Option<usize>,
    // Fragmentation state
    expected_body_len: Option<usize>,
    staging: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder rejecting frames larger than `max_msg_size`.
    #[must_use]
    pub fn new(max_msg_size: Option<usize>) -> Self {
        Self {
            max_msg_size,
            expected_body_len: None,
            staging: BytesMut::new(),
        }
    }

    /// True while a frame has been started but not completed.
    #[inline]
    pub fn is_mid_frame(&self) -> bool {
        self.expected_body_len.is_some()
    }

    /// Decode a single message from `src`
    ///
    /// Returns:
    /// - Ok(Some(payload)) → message decoded
    /// - Ok(None) → need more data (everything in `src` has been consumed
    ///   or is too short to hold a prefix)
    /// - Err → the prefix exceeds the size limit
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        // === Reassembly mode ===
        if let Some(expected) = self.expected_body_len {
            let needed = expected - self.staging.len();
            let take = needed.min(src.len());
            self.staging.extend_from_slice(&src.split_to(take));

            if self.staging.len() < expected {
                return Ok(None);
            }

            self.expected_body_len = None;
            return Ok(Some(self.staging.split().freeze()));
        }

        // === Prefix parsing ===
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let size = (&src[..LENGTH_PREFIX_LEN]).get_u64();

        if let Some(max) = self.max_msg_size {
            if size > max as u64 {
                return Err(FrameError::SizeTooLarge { size, max });
            }
        }
        let body_len = usize::try_from(size).map_err(|_| FrameError::SizeTooLarge {
            size,
            max: usize::MAX,
        })?;

        // === Fast path: entire frame present ===
        if src.len() - LENGTH_PREFIX_LEN >= body_len {
            src.advance(LENGTH_PREFIX_LEN);
            return Ok(Some(src.split_to(body_len).freeze()));
        }

        // === Slow path: fragmentation ===
        src.advance(LENGTH_PREFIX_LEN);
        self.expected_body_len = Some(body_len);
        self.staging.clear();
        self.staging.reserve(body_len.min(STAGING_RESERVE_CAP));

        let available = src.len();
        self.staging.extend_from_slice(&src.split_to(available));

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(payload: &[u8]) -> BytesMut {
        let mut out = BytesMut::new();
        encode(payload, &mut out);
        out
    }

    #[test]
    fn test_wire_layout() {
        let out = framed(b"hello");
        assert_eq!(hex::encode(&out), "000000000000000568656c6c6f");
    }

    #[test]
    fn test_empty_message() {
        let mut src = framed(b"");
        let mut decoder = FrameDecoder::new(None);
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(Bytes::new()));
        assert!(src.is_empty());
    }

    #[test]
    fn test_back_to_back_frames_in_order() {
        let mut src = framed(b"first");
        src.extend_from_slice(&framed(b"second"));
        let mut decoder = FrameDecoder::new(Some(64));

        assert_eq!(decoder.decode(&mut src).unwrap().unwrap(), "first");
        assert_eq!(decoder.decode(&mut src).unwrap().unwrap(), "second");
        assert_eq!(decoder.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn test_fragmented_across_prefix_and_body() {
        let wire = framed(b"fragmented payload");
        let mut decoder = FrameDecoder::new(None);
        let mut src = BytesMut::new();

        // Feed one byte at a time: nothing completes until the last byte.
        for (i, byte) in wire.iter().enumerate() {
            src.extend_from_slice(&[*byte]);
            let out = decoder.decode(&mut src).unwrap();
            if i + 1 < wire.len() {
                assert_eq!(out, None, "completed early at byte {i}");
            } else {
                assert_eq!(out.unwrap(), "fragmented payload");
            }
        }
        assert!(!decoder.is_mid_frame());
    }

    #[test]
    fn test_oversized_prefix_rejected_without_allocation() {
        let mut src = BytesMut::new();
        src.put_u64(u64::MAX / 2);
        src.extend_from_slice(b"tiny");

        let mut decoder = FrameDecoder::new(Some(1024));
        let err = decoder.decode(&mut src).unwrap_err();
        assert_eq!(
            err,
            FrameError::SizeTooLarge {
                size: u64::MAX / 2,
                max: 1024
            }
        );
        assert_eq!(decoder.staging.capacity(), 0);
        assert!(matches!(
            NanospError::from(err),
            NanospError::Protocol(_)
        ));
    }

    #[test]
    fn test_unbounded_claim_reserves_capped_amount() {
        let mut src = BytesMut::new();
        src.put_u64(1 << 40);
        src.extend_from_slice(b"only a few bytes");

        let mut decoder = FrameDecoder::new(None);
        assert_eq!(decoder.decode(&mut src).unwrap(), None);
        assert!(decoder.is_mid_frame());
        assert!(decoder.staging.capacity() <= 2 * STAGING_RESERVE_CAP);
    }

    #[test]
    fn test_limit_is_inclusive() {
        let mut src = framed(&[7u8; 16]);
        let mut decoder = FrameDecoder::new(Some(16));
        assert_eq!(decoder.decode(&mut src).unwrap().unwrap().len(), 16);
    }
}
