//! Error vocabulary for the messaging core. Builds on `flux::shared`'s `Wait`/`Fatal` split,
//! adding the fatal conditions specific to framing, fragmentation and replication.

use std::io;
use std::net::AddrParseError;

#[derive(Debug)]
pub enum NetError {
    /// Nothing went wrong, but the operation could not complete without blocking.
    Wait,
    Corruption(&'static str),
    UnknownPacketType(u8),
    BadMagic,
    ChecksumMismatch,
    MessageTooLarge(usize),
    DictionaryMiss(u32),
    UnknownConnection(u64),
    Timeout,
    AddrParse,
    Io(io::ErrorKind),
}

pub type NetResult<T> = Result<T, NetError>;

impl From<io::Error> for NetError {
    #[inline]
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => NetError::Wait,
            kind => NetError::Io(kind),
        }
    }
}

impl From<AddrParseError> for NetError {
    #[inline]
    fn from(_: AddrParseError) -> Self {
        NetError::AddrParse
    }
}

impl From<flux::NetworkError> for NetError {
    #[inline]
    fn from(err: flux::NetworkError) -> Self {
        match err {
            flux::NetworkError::Wait => NetError::Wait,
            flux::NetworkError::Fatal(flux::ErrorType::Io(kind)) => NetError::Io(kind),
            flux::NetworkError::Fatal(flux::ErrorType::AddrParse) => NetError::AddrParse,
            flux::NetworkError::Fatal(_) => NetError::Corruption("replicator serialization error"),
        }
    }
}

/// Whether an error should close the connection it came from (`Fatal`) or can simply be
/// retried on the next poll (`Wait`).
pub trait ErrorSeverity {
    fn is_fatal(&self) -> bool;
}

impl ErrorSeverity for NetError {
    #[inline]
    fn is_fatal(&self) -> bool {
        !matches!(self, NetError::Wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_would_block_is_not_fatal() {
        let err: NetError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(matches!(err, NetError::Wait));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_other_io_is_fatal() {
        let err: NetError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(err.is_fatal());
    }
}
