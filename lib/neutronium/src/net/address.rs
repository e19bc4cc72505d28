//! Wire-friendly socket address. Thin wrapper over `std::net::SocketAddr` that accepts the
//! engine's `IP4:`/`IP6:` prefixed text form on parse (grounded on the original C++
//! `address.cpp` parser) but always prints the bare form, matching the original's
//! asymmetric parse/print behavior.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::net::error::NetError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Address(SocketAddr);

impl Address {
    #[inline]
    pub fn new(addr: SocketAddr) -> Address {
        Address(addr)
    }

    #[inline]
    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    #[inline]
    pub fn is_ipv4(&self) -> bool {
        self.0.is_ipv4()
    }

    /// Resolves a `host:port` string (optionally prefixed with `IP4:`/`IP6:`) into an
    /// `Address`, taking the first result the resolver returns.
    pub fn resolve(text: &str) -> Result<Address, NetError> {
        let stripped = strip_prefix(text);

        stripped
            .to_socket_addrs()
            .map_err(|_| NetError::AddrParse)?
            .next()
            .map(Address)
            .ok_or(NetError::AddrParse)
    }
}

fn strip_prefix(text: &str) -> &str {
    if let Some(rest) = text.strip_prefix("IP4:") {
        rest
    } else if let Some(rest) = text.strip_prefix("IP6:") {
        rest
    } else {
        text
    }
}

impl FromStr for Address {
    type Err = NetError;

    #[inline]
    fn from_str(text: &str) -> Result<Address, NetError> {
        strip_prefix(text).parse::<SocketAddr>().map(Address).map_err(|e| e.into())
    }
}

impl fmt::Display for Address {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bare form only; the prefixed form is accepted on parse but never produced.
        write!(f, "{}", self.0)
    }
}

impl From<SocketAddr> for Address {
    #[inline]
    fn from(addr: SocketAddr) -> Address {
        Address(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_v4() {
        let addr: Address = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_parse_prefixed_v4() {
        let addr: Address = "IP4:127.0.0.1:9000".parse().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_parse_prefixed_v6() {
        let addr: Address = "IP6:[::1]:9000".parse().unwrap();
        assert!(!addr.is_ipv4());
    }

    #[test]
    fn test_parse_invalid() {
        assert!("not-an-address".parse::<Address>().is_err());
    }
}
