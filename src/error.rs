//! Error types for bufsock.
//!
//! Every variant maps onto an [`io::ErrorKind`], so a [`SocketError`] can be
//! handed to code that only speaks `std::io` without losing its category.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Main error type for all socket and framing operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Transport-level I/O error, including "would block" in non-blocking mode.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A deadline elapsed before the operation completed.
    ///
    /// Any bytes read so far are still in the receive buffer; for sends, the
    /// unsent remainder is still queued.
    #[error("socket operation timed out after {timeout:?}: {detail}")]
    Timeout {
        /// Time allotted to the operation.
        timeout: Duration,
        /// What was accomplished before the deadline.
        detail: String,
    },

    /// The peer closed the stream while more bytes were required.
    #[error("connection closed after reading {bytes_read} bytes: {detail}")]
    ConnectionClosed {
        /// Bytes buffered when the close was observed.
        bytes_read: usize,
        /// What the operation was waiting for.
        detail: String,
    },

    /// A size- or delimiter-bounded read exceeded its cap.
    #[error("message exceeded maximum size of {max_size} bytes{}", delimiter_note(.delimiter))]
    MessageTooLong {
        /// The bound that was exceeded.
        max_size: usize,
        /// Delimiter being searched for, if any.
        delimiter: Option<Bytes>,
    },

    /// The netstring length prefix is not a non-negative decimal integer.
    #[error("netstring message size must be a valid non-negative integer, not {prefix:?}")]
    NetstringInvalidSize {
        /// Raw prefix bytes as received.
        prefix: Bytes,
    },

    /// A netstring length exceeds the configured per-message cap.
    #[error("netstring message length exceeds configured maximum: {size} > {limit}")]
    NetstringMessageTooLong {
        /// Announced or outgoing payload length (saturated at `u64::MAX`).
        size: u64,
        /// Configured maximum payload length.
        limit: usize,
    },

    /// Structural netstring violation, e.g. a missing trailing `,`.
    #[error("netstring protocol error: {detail}")]
    NetstringProtocolError {
        /// Description of the violation.
        detail: String,
    },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

fn delimiter_note(delimiter: &Option<Bytes>) -> String {
    match delimiter {
        Some(d) => format!(" while searching for delimiter {d:?}"),
        None => String::new(),
    }
}

impl SocketError {
    /// The `std::io` category this error belongs to.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::Io(e) => e.kind(),
            Self::Timeout { .. } => io::ErrorKind::TimedOut,
            Self::ConnectionClosed { .. } => io::ErrorKind::UnexpectedEof,
            Self::InvalidConfig(_) => io::ErrorKind::InvalidInput,
            Self::MessageTooLong { .. }
            | Self::NetstringInvalidSize { .. }
            | Self::NetstringMessageTooLong { .. }
            | Self::NetstringProtocolError { .. }
            | Self::Json(_)
            | Self::MsgPackEncode(_)
            | Self::MsgPackDecode(_) => io::ErrorKind::InvalidData,
        }
    }

    /// True for [`SocketError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True for [`SocketError::ConnectionClosed`].
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. })
    }

    /// True for the netstring framing variants.
    ///
    /// After one of these the stream is no longer aligned with the peer and
    /// the connection should be closed.
    pub fn is_netstring_error(&self) -> bool {
        matches!(
            self,
            Self::NetstringInvalidSize { .. }
                | Self::NetstringMessageTooLong { .. }
                | Self::NetstringProtocolError { .. }
        )
    }
}

impl From<SocketError> for io::Error {
    fn from(err: SocketError) -> Self {
        match err {
            SocketError::Io(e) => e,
            other => io::Error::new(other.kind(), other),
        }
    }
}

/// Result type alias using SocketError.
pub type Result<T> = std::result::Result<T, SocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let timeout = SocketError::Timeout {
            timeout: Duration::from_millis(100),
            detail: "read 0 of 4 bytes".to_string(),
        };
        assert_eq!(timeout.kind(), io::ErrorKind::TimedOut);
        assert!(timeout.is_timeout());

        let closed = SocketError::ConnectionClosed {
            bytes_read: 4,
            detail: "wanted 10 bytes".to_string(),
        };
        assert_eq!(closed.kind(), io::ErrorKind::UnexpectedEof);
        assert!(closed.is_connection_closed());

        let proto = SocketError::NetstringProtocolError {
            detail: "expected trailing ','".to_string(),
        };
        assert_eq!(proto.kind(), io::ErrorKind::InvalidData);
        assert!(proto.is_netstring_error());
    }

    #[test]
    fn test_io_passthrough_keeps_kind() {
        let err = SocketError::from(io::Error::from(io::ErrorKind::WouldBlock));
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        let back: io::Error = err.into();
        assert_eq!(back.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_message_too_long_display() {
        let err = SocketError::MessageTooLong {
            max_size: 7,
            delimiter: Some(Bytes::from_static(b":")),
        };
        let msg = err.to_string();
        assert!(msg.contains("maximum size of 7 bytes"));
        assert!(msg.contains("delimiter"));

        let err = SocketError::MessageTooLong {
            max_size: 7,
            delimiter: None,
        };
        assert!(!err.to_string().contains("delimiter"));
    }

    #[test]
    fn test_into_io_error_wraps_socket_error() {
        let err: io::Error = SocketError::NetstringMessageTooLong { size: 10, limit: 5 }.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("10 > 5"));
    }
}
