//! Error types
//!
//! Every failure that can cross the control boundary is a variant of [`Error`].
//! Module-level errors convert into it so `?` works end to end.

use std::fmt;
use std::io;

use crate::lifecycle::PlatformError;
use crate::registry::RegistryError;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error surfaced by the control façade and the layers below it
#[derive(Debug)]
pub enum Error {
    /// A session is already running in this process
    AlreadyActive,
    /// No host answered discovery for the requested live match
    DiscoveryTimeout(String),
    /// The host could not be reached or refused the join
    ConnectionRefused(String),
    /// An established connection dropped mid-session
    ConnectionLost(String),
    /// Unknown or unsupported action
    NotImplemented(String),
    /// A platform keep-alive resource could not be acquired (non-fatal)
    PlatformResourceUnavailable(String),
    /// Missing or ill-typed command argument
    InvalidArgument(String),
    /// The session was stopped while it was still starting
    SessionCancelled,
    /// Malformed data on the wire
    Protocol(ProtocolError),
    /// Underlying I/O failure
    Io(io::Error),
}

impl Error {
    /// Stable code used when replying across a method-channel boundary
    pub fn code(&self) -> &'static str {
        match self {
            Error::AlreadyActive => "ALREADY_ACTIVE",
            Error::DiscoveryTimeout(_) => "DISCOVERY_TIMEOUT",
            Error::ConnectionRefused(_) => "CONNECTION_REFUSED",
            Error::ConnectionLost(_) => "CONNECTION_LOST",
            Error::NotImplemented(_) => "NOT_IMPLEMENTED",
            Error::PlatformResourceUnavailable(_) => "PLATFORM_RESOURCE_UNAVAILABLE",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::SessionCancelled => "SESSION_CANCELLED",
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the error ends the operation that produced it
    ///
    /// Platform resource failures only degrade the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::PlatformResourceUnavailable(_))
    }

    /// Re-create an equivalent error for fan-out to several listeners
    ///
    /// `io::Error` is not `Clone`, so its kind and message are carried over.
    pub fn duplicate(&self) -> Error {
        match self {
            Error::AlreadyActive => Error::AlreadyActive,
            Error::DiscoveryTimeout(s) => Error::DiscoveryTimeout(s.clone()),
            Error::ConnectionRefused(s) => Error::ConnectionRefused(s.clone()),
            Error::ConnectionLost(s) => Error::ConnectionLost(s.clone()),
            Error::NotImplemented(s) => Error::NotImplemented(s.clone()),
            Error::PlatformResourceUnavailable(s) => Error::PlatformResourceUnavailable(s.clone()),
            Error::InvalidArgument(s) => Error::InvalidArgument(s.clone()),
            Error::SessionCancelled => Error::SessionCancelled,
            Error::Protocol(e) => Error::Protocol(e.clone()),
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AlreadyActive => write!(f, "A live session is already active"),
            Error::DiscoveryTimeout(id) => write!(f, "No host found for live match {}", id),
            Error::ConnectionRefused(msg) => write!(f, "Connection refused: {}", msg),
            Error::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Error::NotImplemented(what) => write!(f, "Not implemented: {}", what),
            Error::PlatformResourceUnavailable(msg) => {
                write!(f, "Platform resource unavailable: {}", msg)
            }
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::SessionCancelled => write!(f, "Session was stopped while starting"),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Protocol(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        match &e {
            RegistryError::AlreadyActive => Error::AlreadyActive,
            RegistryError::StaleHandle(_) => Error::SessionCancelled,
            RegistryError::PeerLimit(_) => Error::ConnectionRefused(e.to_string()),
        }
    }
}

impl From<PlatformError> for Error {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::Unsupported(what) => Error::NotImplemented(what),
            other => Error::PlatformResourceUnavailable(other.to_string()),
        }
    }
}

/// Wire-level decoding failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Packet kind byte not recognised
    UnknownPacket(u8),
    /// Declared payload exceeds the configured maximum
    PacketTooLarge { size: usize, max: usize },
    /// Payload ended before a field was complete
    Truncated(&'static str),
    /// String field is not UTF-8
    InvalidUtf8(&'static str),
    /// String field does not fit its 16-bit length prefix
    FieldTooLong(&'static str),
    /// Event body is not valid JSON
    InvalidEvent(String),
    /// A packet arrived that is not legal at this point of the exchange
    UnexpectedPacket(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownPacket(kind) => write!(f, "unknown packet kind 0x{:02x}", kind),
            ProtocolError::PacketTooLarge { size, max } => {
                write!(f, "packet of {} bytes exceeds limit of {}", size, max)
            }
            ProtocolError::Truncated(field) => write!(f, "truncated field: {}", field),
            ProtocolError::InvalidUtf8(field) => write!(f, "invalid UTF-8 in {}", field),
            ProtocolError::FieldTooLong(field) => write!(f, "field too long: {}", field),
            ProtocolError::InvalidEvent(msg) => write!(f, "invalid event body: {}", msg),
            ProtocolError::UnexpectedPacket(what) => write!(f, "unexpected packet: {}", what),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::AlreadyActive.code(), "ALREADY_ACTIVE");
        assert_eq!(Error::DiscoveryTimeout("LM2".into()).code(), "DISCOVERY_TIMEOUT");
        assert_eq!(Error::NotImplemented("x".into()).code(), "NOT_IMPLEMENTED");
    }

    #[test]
    fn test_platform_errors_are_not_fatal() {
        assert!(!Error::PlatformResourceUnavailable("wake lock".into()).is_fatal());
        assert!(Error::ConnectionLost("reset".into()).is_fatal());
    }

    #[test]
    fn test_duplicate_io_keeps_kind() {
        let err = Error::Io(io::Error::new(io::ErrorKind::AddrInUse, "busy"));
        match err.duplicate() {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::AddrInUse),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_registry_error_conversion() {
        let err: Error = RegistryError::AlreadyActive.into();
        assert!(matches!(err, Error::AlreadyActive));
    }
}
