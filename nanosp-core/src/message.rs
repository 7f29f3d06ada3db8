//! Single-part message type.
//!
//! A `Message` is an immutable byte payload. It is built once by the sender
//! and moved, never copied, through the outbound queue, the framer, the
//! inbound queue and finally to the receiver.

use bytes::Bytes;
use std::fmt;

/// An immutable message payload.
///
/// # Examples
///
/// ```
/// use nanosp_core::message::Message;
///
/// let msg = Message::from("hello");
/// assert_eq!(msg.len(), 5);
/// assert_eq!(msg.as_bytes(), b"hello");
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Message {
    payload: Bytes,
}

impl Message {
    /// Create a message from any type that can be converted to `Bytes`.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Borrow the payload.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload out of the message.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.payload
    }
}

impl From<Bytes> for Message {
    fn from(payload: Bytes) -> Self {
        Self { payload }
    }
}

impl From<Vec<u8>> for Message {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<&'static [u8]> for Message {
    fn from(payload: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(payload))
    }
}

impl From<&'static str> for Message {
    fn from(payload: &'static str) -> Self {
        Self::new(Bytes::from_static(payload.as_bytes()))
    }
}

impl From<String> for Message {
    fn from(payload: String) -> Self {
        Self::new(payload)
    }
}

impl From<Message> for Bytes {
    fn from(msg: Message) -> Self {
        msg.payload
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.payload.len())
            .field("payload", &self.payload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_matches_payload() {
        let msg = Message::from(vec![1u8, 2, 3]);
        assert_eq!(msg.len(), 3);
        assert!(!msg.is_empty());
        assert!(Message::default().is_empty());
    }

    #[test]
    fn test_into_bytes_does_not_copy() {
        let payload = Bytes::from_static(b"zero-copy");
        let ptr = payload.as_ptr();
        let msg = Message::from(payload);
        assert_eq!(msg.into_bytes().as_ptr(), ptr);
    }
}
