//! Error types for the frame bus
//!
//! Fatal errors (`Bind`, `RelayIo`) end the relay loop and are surfaced to the
//! process supervisor. `MalformedFrame` is only ever counted and logged by the
//! relay loop; it is a public variant so producers can validate frames before
//! sending them.

use std::fmt;
use std::io;

/// Result type alias for frame bus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which side of the bus proxy an error or event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Producers attach here and send data frames
    Ingress,
    /// Consumers attach here, send intents and receive frames
    Egress,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Ingress => f.write_str("ingress"),
            Side::Egress => f.write_str("egress"),
        }
    }
}

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An endpoint could not be bound (address in use, unresolvable, ...)
    #[error("failed to bind {side} endpoint {addr}: {source}")]
    Bind {
        side: Side,
        addr: String,
        #[source]
        source: io::Error,
    },

    /// An endpoint failed while the relay loop was running
    #[error("{side} endpoint failed: {source}")]
    RelayIo {
        side: Side,
        #[source]
        source: io::Error,
    },

    /// A frame had no segments and cannot be routed
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// Wire protocol violation
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Frame metadata segment is not a valid JSON object
    #[error("invalid frame metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic I/O error on a single connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Wire-level decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Message declared more segments than allowed
    #[error("too many segments: {count} (max {max})")]
    TooManySegments { count: usize, max: usize },

    /// A single segment exceeded the size limit
    #[error("segment too large: {len} bytes (max {max})")]
    SegmentTooLarge { len: usize, max: usize },

    /// Frame did not have the expected layout
    #[error("unexpected frame layout: {0}")]
    UnexpectedLayout(String),
}

impl Error {
    /// Whether this error should terminate the relay loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Bind { .. } | Error::RelayIo { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let err = Error::Bind {
            side: Side::Ingress,
            addr: "0.0.0.0:5555".into(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(
            err.to_string(),
            "failed to bind ingress endpoint 0.0.0.0:5555: in use"
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_malformed_is_not_fatal() {
        let err = Error::MalformedFrame("zero segments");
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "malformed frame: zero segments");
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: Error = ProtocolError::TooManySegments { count: 20, max: 16 }.into();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(err.to_string(), "too many segments: 20 (max 16)");
    }
}
