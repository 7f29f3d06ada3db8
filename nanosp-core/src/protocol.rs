//! Socket domains and protocol numbers.
//!
//! Numbers follow nanomsg: a protocol id is `family * 16 + role`, so PAIR
//! (family 1, single role) is 16.

use std::fmt;

use crate::error::{NanospError, Result};

/// Standard scalability-protocol socket domain.
pub const AF_SP: i32 = 1;
/// Raw socket domain (no pattern-level processing on top of the pipe).
pub const AF_SP_RAW: i32 = 2;

/// PAIR protocol number.
pub const NN_PAIR: i32 = 16;

/// Send/recv flag: fail with `WouldBlock` instead of waiting.
pub const NN_DONTWAIT: i32 = 1;

/// Socket domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Domain {
    /// Full pattern semantics (`AF_SP`)
    Sp = AF_SP,
    /// Raw sockets (`AF_SP_RAW`)
    SpRaw = AF_SP_RAW,
}

impl Domain {
    /// Map a raw domain number.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            AF_SP => Ok(Self::Sp),
            AF_SP_RAW => Ok(Self::SpRaw),
            other => Err(NanospError::InvalidDomain(other)),
        }
    }

    /// Raw domain number.
    #[inline]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Name as it appears in the symbol table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sp => "AF_SP",
            Self::SpRaw => "AF_SP_RAW",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Messaging pattern spoken by a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Protocol {
    /// PAIR socket for exclusive bidirectional communication
    Pair = NN_PAIR as u16,
}

impl Protocol {
    /// Map a raw protocol number.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            NN_PAIR => Ok(Self::Pair),
            other => Err(NanospError::InvalidProtocol(other)),
        }
    }

    /// Map the protocol id carried in a connection header.
    pub fn from_wire(id: u16) -> Option<Self> {
        Self::from_raw(i32::from(id)).ok()
    }

    /// Protocol id as carried in a connection header.
    #[inline]
    pub const fn wire_id(self) -> u16 {
        self as u16
    }

    /// Raw protocol number.
    #[inline]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Get the protocol as a string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pair => "PAIR",
        }
    }

    /// Check if this protocol can talk to the given peer protocol.
    pub fn is_compatible(&self, peer: Protocol) -> bool {
        matches!((self, peer), (Self::Pair, Self::Pair))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Pair.to_string(), "PAIR");
        assert_eq!(Domain::Sp.to_string(), "AF_SP");
    }

    #[test]
    fn test_raw_numbers() {
        assert_eq!(Protocol::from_raw(NN_PAIR).unwrap(), Protocol::Pair);
        assert_eq!(Protocol::Pair.wire_id(), 16);
        assert_eq!(Domain::from_raw(AF_SP_RAW).unwrap().as_raw(), 2);
        assert!(matches!(
            Protocol::from_raw(32),
            Err(NanospError::InvalidProtocol(32))
        ));
        assert!(matches!(
            Domain::from_raw(0),
            Err(NanospError::InvalidDomain(0))
        ));
    }

    #[test]
    fn test_protocol_compatibility() {
        assert!(Protocol::Pair.is_compatible(Protocol::Pair));
        assert_eq!(Protocol::from_wire(16), Some(Protocol::Pair));
        assert_eq!(Protocol::from_wire(0x21), None);
    }
}
