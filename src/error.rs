//! Error types for the IRC client runtime.
//!
//! This module defines error types for wire-codec failures, line framing
//! failures, and connection-level errors.

use thiserror::Error;

/// Convenience type alias for Results using [`ClientError`].
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Errors produced by the wire codec (parsing or assembling a single line).
///
/// These are reported synchronously to the caller and are never fatal to
/// the connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The line was empty, or became empty after stripping tags or prefix.
    #[error("line is empty")]
    LineEmpty,

    /// The line contained NUL, CR, or LF inside its logical content.
    #[error("line contains a forbidden character: {0:?}")]
    LineContainsBadChar(char),

    /// A tag name failed the `[+][vendor/]name` grammar, or a tag value
    /// contained content that cannot appear on the wire.
    #[error("invalid tag name or value: {0}")]
    InvalidTagContent(String),

    /// A non-final parameter was empty, contained a space, or began with `:`.
    #[error("invalid parameter before the final position: {0:?}")]
    BadParam(String),

    /// The message had no command.
    #[error("message has no command")]
    CommandMissing,

    /// The assembled tag section exceeded its byte budget.
    #[error("tag section too long: {0} bytes")]
    TagsTooLong(usize),

    /// The assembled body exceeded its byte budget. Carries the line as
    /// truncated on a UTF-8 boundary, so callers that opt into truncation
    /// can still send it.
    #[error("message body exceeded the length limit")]
    BodyTooLong(Vec<u8>),
}

impl ProtocolError {
    /// Consume a [`ProtocolError::BodyTooLong`], yielding the truncated
    /// wire bytes. Returns `Err(self)` unchanged for any other variant.
    pub fn into_truncated(self) -> std::result::Result<Vec<u8>, ProtocolError> {
        match self {
            ProtocolError::BodyTooLong(bytes) => Ok(bytes),
            other => Err(other),
        }
    }
}

/// Errors produced by the line reader while framing a byte stream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LineError {
    /// A single line exceeded the reader's hard maximum. The reader
    /// discards through the next line terminator and remains usable.
    #[error("line too long: exceeded {0} bytes")]
    TooLong(usize),

    /// The underlying stream failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-level errors surfaced by the client runtime.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// No server address was configured.
    #[error("no server address configured")]
    NoServer,

    /// The keepalive interval must be at least the I/O timeout.
    #[error("keepalive interval must be at least the timeout")]
    KeepAliveTooShort,

    /// Could not send because the client is disconnected.
    #[error("client is disconnected")]
    Disconnected,

    /// The bounded outbound queue is full; the write loop has stalled.
    #[error("outbound queue is full")]
    SendQueueFull,

    /// The server did not respond within the expected time.
    #[error("server did not respond in time")]
    ServerTimedOut,

    /// The connection was shut down before the operation completed.
    #[error("disconnected by server")]
    ServerDisconnected,

    /// SASL authentication failed or was not available.
    #[error("SASL failed: {0}")]
    SaslFailed(String),

    /// The IRCv3 capability required for this operation was not negotiated.
    #[error("required IRCv3 capability was not negotiated")]
    CapabilityNotNegotiated,

    /// The server failed to send a labeled response to the command.
    #[error("no labeled response from server")]
    NoLabeledResponse,

    /// The server ignored our QUIT for longer than the timeout.
    #[error("server did not respond to QUIT")]
    ServerDidNotQuit,

    /// `quit` was called; the supervisor will not reconnect.
    #[error("client has quit")]
    HasQuit,

    /// Dialing the server failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A wire-codec error on a send path.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::TagsTooLong(9000);
        assert_eq!(format!("{}", err), "tag section too long: 9000 bytes");

        let err = ClientError::Disconnected;
        assert_eq!(format!("{}", err), "client is disconnected");
    }

    #[test]
    fn test_into_truncated() {
        let bytes = ProtocolError::BodyTooLong(b"PING hi\r\n".to_vec())
            .into_truncated()
            .unwrap();
        assert_eq!(bytes, b"PING hi\r\n");

        assert!(ProtocolError::CommandMissing.into_truncated().is_err());
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let client_err: ClientError = io_err.into();
        assert!(matches!(client_err, ClientError::Io(_)));

        let proto_err = ProtocolError::CommandMissing;
        let client_err: ClientError = proto_err.into();
        assert!(matches!(
            client_err,
            ClientError::Protocol(ProtocolError::CommandMissing)
        ));
    }
}
