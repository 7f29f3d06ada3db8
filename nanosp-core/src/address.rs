//! Transport-agnostic socket addressing.
//!
//! Parses the URI-style addresses handed to `bind`/`connect` into the
//! transport they select.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;

/// Transport address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// TCP transport: `tcp://host:port`
    Tcp(SocketAddr),
    /// In-process transport: `inproc://name`
    Inproc(String),
}

impl Address {
    /// Parse an address from a string.
    ///
    /// Supported formats:
    /// - `tcp://127.0.0.1:5555`
    /// - `tcp://[::1]:5555` (IPv6)
    /// - `tcp://*:5555` (all IPv4 interfaces, bind only)
    /// - `inproc://name`
    ///
    /// # Examples
    ///
    /// ```
    /// use nanosp_core::address::Address;
    ///
    /// let address = Address::parse("tcp://127.0.0.1:5555").unwrap();
    /// assert!(matches!(address, Address::Tcp(_)));
    ///
    /// let address = Address::parse("inproc://my-endpoint").unwrap();
    /// assert!(matches!(address, Address::Inproc(_)));
    /// ```
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        s.parse()
    }

    /// Scheme prefix without the `://` separator.
    pub fn scheme(&self) -> &'static str {
        match self {
            Address::Tcp(_) => "tcp",
            Address::Inproc(_) => "inproc",
        }
    }

    /// Returns true if this is a TCP address.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Address::Tcp(_))
    }

    /// Returns true if this is an inproc address.
    pub fn is_inproc(&self) -> bool {
        matches!(self, Address::Inproc(_))
    }
}

fn parse_tcp(addr: &str) -> Result<SocketAddr, AddressError> {
    if let Some(port) = addr.strip_prefix("*:") {
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::InvalidTcpAddress(addr.to_string()))?;
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }
    addr.parse::<SocketAddr>()
        .map_err(|_| AddressError::InvalidTcpAddress(addr.to_string()))
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            Ok(Address::Tcp(parse_tcp(addr)?))
        } else if let Some(name) = s.strip_prefix("inproc://") {
            if name.is_empty() {
                Err(AddressError::InvalidInprocName(
                    "inproc name cannot be empty".to_string(),
                ))
            } else {
                Ok(Address::Inproc(name.to_string()))
            }
        } else {
            Err(AddressError::InvalidScheme(s.to_string()))
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp(addr) => write!(f, "tcp://{}", addr),
            Address::Inproc(name) => write!(f, "inproc://{}", name),
        }
    }
}

/// Errors that can occur when parsing addresses.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid scheme in address: {0} (expected tcp:// or inproc://)")]
    InvalidScheme(String),

    #[error("Invalid TCP address: {0}")]
    InvalidTcpAddress(String),

    #[error("Invalid inproc name: {0}")]
    InvalidInprocName(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_ipv4() {
        let address = Address::parse("tcp://127.0.0.1:5555").unwrap();
        assert!(address.is_tcp());
        assert_eq!(address.to_string(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn test_parse_tcp_ipv6() {
        let address = Address::parse("tcp://[::1]:5555").unwrap();
        assert!(matches!(address, Address::Tcp(_)));
    }

    #[test]
    fn test_parse_tcp_wildcard() {
        let address = Address::parse("tcp://*:6000").unwrap();
        assert_eq!(address.to_string(), "tcp://0.0.0.0:6000");
        assert!(Address::parse("tcp://*:nope").is_err());
    }

    #[test]
    fn test_invalid_scheme() {
        let result = Address::parse("ipc:///tmp/test.sock");
        assert!(matches!(result, Err(AddressError::InvalidScheme(_))));
    }

    #[test]
    fn test_invalid_tcp_address() {
        let result = Address::parse("tcp://invalid:port");
        assert!(matches!(result, Err(AddressError::InvalidTcpAddress(_))));
    }

    #[test]
    fn test_parse_inproc() {
        let address = Address::parse("inproc://my-endpoint").unwrap();
        assert!(address.is_inproc());
        assert_eq!(address.scheme(), "inproc");
        assert_eq!(address.to_string(), "inproc://my-endpoint");
    }

    #[test]
    fn test_invalid_inproc_empty() {
        let result = Address::parse("inproc://");
        assert!(matches!(result, Err(AddressError::InvalidInprocName(_))));
    }
}
