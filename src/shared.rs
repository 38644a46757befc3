use std::io;
use std::net;

/// Size of the frame header on the wire: a `u32` total length (header
/// inclusive) followed by a `u32` correlation id, both little-endian.
pub const HEADER_SIZE: usize = 8;

/// Opaque id the client uses to match a reply to a request; echoed back by
/// the server unchanged.
pub type CorrelationId = u32;

/// Id of a live connection within one role's lifetime. Never reused.
pub type ConnectionId = usize;

pub type TransportResult<T> = Result<T, TransportError>;

/// The facade is in at most one active role at a time; roles switch only
/// through `close`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Idle,
    Client,
    Server,
}

#[derive(Debug, Eq, PartialEq)]
pub enum TransportError {
    /// Invalid argument supplied by the caller, surfaced synchronously.
    BadArgument(&'static str),
    /// A role-scoped operation was invoked in the wrong role.
    StateMisuse { required: Role, current: Role },
    /// Failure in the underlying socket operations.
    Io(io::ErrorKind),
    /// The data stream or the correlation discipline is broken.
    Protocol(ProtocolError),
    /// The operation was unblocked because the connection went away.
    Canceled,
}

#[derive(Debug, Eq, PartialEq)]
pub enum ProtocolError {
    /// A second registration for an id with an outstanding request.
    DuplicateCorrelation(CorrelationId),
    /// The wire length field does not even cover the header.
    FrameTooShort(u32),
}

impl From<io::Error> for TransportError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        TransportError::Io(io_error.kind())
    }
}

impl From<net::AddrParseError> for TransportError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        TransportError::BadArgument("endpoint address")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_folds_to_kind() {
        let error: TransportError = io::Error::new(io::ErrorKind::ConnectionReset, "boom").into();

        assert_eq!(error, TransportError::Io(io::ErrorKind::ConnectionReset));
    }

    #[test]
    fn test_addr_parse_error_is_bad_argument() {
        let result = "not-an-endpoint".parse::<net::SocketAddr>();
        let error: TransportError = result.unwrap_err().into();

        assert_eq!(error, TransportError::BadArgument("endpoint address"));
    }
}
