//! Domain-specific error types for the gfxwire pipeline.
//!
//! All fallible operations return `Result<T, WireError>`.
//! No panics on malformed input: every decoder failure is typed and
//! recoverable, and the pipeline decides per variant whether the
//! connection survives it.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the wire protocol and streaming pipeline.
#[derive(Debug, Error)]
pub enum WireError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// The first four bytes do not name any known message family.
    #[error("invalid magic bytes: {0:?}")]
    InvalidMagic([u8; 4]),

    /// The buffer ended before the fixed header of a message.
    #[error("{message} truncated: need {expected} bytes, got {actual}")]
    Truncated {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A payload length field disagrees with the bytes that follow it.
    #[error("{message} length mismatch: header declares {declared} payload bytes, {actual} remain")]
    LengthMismatch {
        message: &'static str,
        declared: usize,
        actual: usize,
    },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// An engine value does not fit the wire field that carries it.
    #[error("{field} out of range for the wire format: {value}")]
    FieldOutOfRange { field: &'static str, value: i64 },

    /// A command carries a rectangle with zero width or height.
    #[error("{message} has a degenerate rectangle ({width}x{height})")]
    DegenerateRect {
        message: &'static str,
        width: u32,
        height: u32,
    },

    /// A payload exceeds what its length field can describe.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A message arrived out of order or in the wrong direction.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Collaborator Errors ──────────────────────────────────────
    /// The transport sink failed; fatal to the connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The session engine reported a failure.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Serialization Errors ─────────────────────────────────────
    /// JSON encoding of a control notification failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl WireError {
    /// Whether this error must tear the connection down.
    ///
    /// Transport failures and fatal session conditions propagate to the
    /// supervisor; everything else is recovered locally.
    pub fn is_fatal(&self) -> bool {
        match self {
            WireError::Transport(_) | WireError::ChannelClosed => true,
            WireError::Session(e) => e.is_fatal(),
            _ => false,
        }
    }
}

// ── SessionError ──────────────────────────────────────────────────

/// Errors reported by the session engine behind a [`SessionHandle`].
///
/// [`SessionHandle`]: crate::session::SessionHandle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The engine can no longer serve this session (remote closed,
    /// protocol failure inside the engine, …).
    #[error("session failed: {0}")]
    Fatal(String),

    /// A glitch worth retrying, e.g. a torn audio read.
    #[error("transient session error: {0}")]
    Transient(String),

    /// The output buffer handed to a read was too small for the next item.
    #[error("buffer too small: need {needed} bytes")]
    BufferTooSmall { needed: usize },

    /// The session has already been released.
    #[error("session not connected")]
    NotConnected,
}

impl SessionError {
    /// Whether the condition ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Fatal(_) | SessionError::NotConnected)
    }
}

// ── TransportError ────────────────────────────────────────────────

/// Errors raised by a [`TransportSink`].
///
/// [`TransportSink`]: crate::transport::TransportSink
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer or the local side already closed the channel.
    #[error("transport closed")]
    Closed,

    /// The underlying socket reported an error.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame exceeded the configured limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame header carried an unknown kind byte.
    #[error("unknown frame kind: {0:#x}")]
    UnknownFrameKind(u8),

    /// A text frame was not valid UTF-8.
    #[error("invalid utf-8 in text frame")]
    InvalidUtf8,
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for WireError {
    fn from(s: String) -> Self {
        WireError::Other(s)
    }
}

impl From<&str> for WireError {
    fn from(s: &str) -> Self {
        WireError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for WireError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        WireError::ChannelClosed
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TransportError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TransportError::Closed
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = WireError::InvalidMagic(*b"NOPE");
        assert!(e.to_string().contains("magic"));

        let e = WireError::Truncated {
            message: "SolidFill",
            expected: 22,
            actual: 9,
        };
        assert!(e.to_string().contains("SolidFill"));
        assert!(e.to_string().contains("22"));
        assert!(e.to_string().contains('9'));
    }

    #[test]
    fn from_string() {
        let e: WireError = "something broke".into();
        assert!(matches!(e, WireError::Other(_)));
    }

    #[test]
    fn transport_errors_are_fatal() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: WireError = TransportError::from(io_err).into();
        assert!(matches!(e, WireError::Transport(TransportError::Io(_))));
        assert!(e.is_fatal());
    }

    #[test]
    fn only_fatal_session_errors_propagate() {
        let fatal: WireError = SessionError::Fatal("remote closed".into()).into();
        let transient: WireError = SessionError::Transient("short read".into()).into();
        assert!(fatal.is_fatal());
        assert!(!transient.is_fatal());
        assert!(!WireError::ProtocolViolation("EndFrame while idle").is_fatal());
    }
}
