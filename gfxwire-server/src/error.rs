//! Errors raised by the bridge service.

use gfxwire_core::{SessionError, TransportError, WireError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The configuration file could not be read or written.
    #[error("config error: {0}")]
    Config(String),

    /// The security policy file is not valid JSON of the expected shape.
    #[error("invalid security policy: {0}")]
    Policy(String),

    /// The destination is not on the allowlist; carries the user-facing
    /// reason.
    #[error("{0}")]
    DestinationDenied(String),

    /// Every registry slot is taken.
    #[error("session limit reached ({max} concurrent sessions)")]
    CapacityExceeded { max: usize },

    /// This connection already streams a session.
    #[error("a session is already active on this connection")]
    AlreadyConnected,

    /// The session engine could not open the session.
    #[error("failed to connect to remote host: {0}")]
    Connect(#[from] SessionError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Errors answered with an `error` control message while the
    /// connection stays open for another attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::DestinationDenied(_)
                | BridgeError::CapacityExceeded { .. }
                | BridgeError::AlreadyConnected
                | BridgeError::Connect(_)
        )
    }
}
