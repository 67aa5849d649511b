//! Error types for the echo server

use std::io;

use thiserror::Error;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Server error types
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(io::Error),
    /// Invalid WebSocket frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),
    /// Invalid UTF-8 in text message
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,
    /// Protocol violation
    #[error("Protocol error: {0}")]
    Protocol(&'static str),
    /// Message too large
    #[error("Message too large")]
    MessageTooLarge,
    /// Frame too large
    #[error("Frame too large")]
    FrameTooLarge,
    /// Handshake failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(&'static str),
    /// Would block (non-blocking I/O)
    #[error("Would block")]
    WouldBlock,
    /// Connection reset by peer
    #[error("Connection reset by peer")]
    ConnectionReset,
    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
    /// Invalid close code
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),
    /// Raw read/write callback failed for a reason other than would-block
    #[error("Transport callback failed: {0}")]
    CallbackFailure(&'static str),
}

impl Error {
    /// Close status code to send when this error ends a WebSocket session
    pub fn close_code(&self) -> u16 {
        match self {
            Error::InvalidUtf8 => CloseReason::INVALID_PAYLOAD,
            Error::MessageTooLarge | Error::FrameTooLarge => CloseReason::TOO_BIG,
            _ => CloseReason::PROTOCOL_ERROR,
        }
    }
}

/// Close frame reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code
    pub code: u16,
    /// Optional reason string
    pub reason: String,
}

impl CloseReason {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Going away (e.g., server shutdown)
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Invalid frame payload
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Message too big
    pub const TOO_BIG: u16 = 1009;

    /// Create a new close reason
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Check if the close code may appear on the wire per RFC 6455
    pub fn is_valid_code(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => Error::WouldBlock,
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            _ => Error::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_would_block_maps_to_dedicated_variant() {
        let err: Error = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(matches!(err, Error::WouldBlock));
    }

    #[test]
    fn test_other_io_errors_are_wrapped() {
        let err: Error = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_broken_pipe_keeps_io_kind() {
        let err: Error = io::Error::from(io::ErrorKind::BrokenPipe).into();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(Error::InvalidUtf8.close_code(), CloseReason::INVALID_PAYLOAD);
        assert_eq!(Error::FrameTooLarge.close_code(), CloseReason::TOO_BIG);
        assert_eq!(
            Error::Protocol("bad").close_code(),
            CloseReason::PROTOCOL_ERROR
        );
    }

    #[test]
    fn test_valid_close_codes() {
        assert!(CloseReason::is_valid_code(1000));
        assert!(CloseReason::is_valid_code(4000));
        assert!(!CloseReason::is_valid_code(1005));
        assert!(!CloseReason::is_valid_code(999));
    }
}
