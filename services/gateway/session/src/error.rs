//! Session error types.

use gateway_wire::WireError;
use thiserror::Error;

/// A close the service issued with a fatal code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("gateway closed the session with fatal code {code} ({reason})")]
pub struct FatalClose {
    /// Close code
    pub code: u16,
    /// Reason text sent with the close, or the code's description
    pub reason: String,
}

/// Gateway session errors
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Network or I/O failure; the session reconnects
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected frame; the frame is dropped
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),

    /// Authentication or protocol version rejected; the session is closed
    #[error(transparent)]
    Auth(#[from] FatalClose),

    /// `register` was called with an alias already in use
    #[error("a session with alias '{0}' already exists")]
    DuplicateAlias(String),

    /// No session with this alias
    #[error("could not find a session for alias '{0}'")]
    UnknownAlias(String),

    /// The session has no live, handshaken transport
    #[error("session '{0}' is not ready")]
    NotReady(String),

    /// The operation was interrupted by a stop
    #[error("session stopped")]
    Cancelled,
}

impl GatewayError {
    /// Wrap any displayable transport failure
    pub fn transport(err: impl std::fmt::Display) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

/// Failure of a single handler invocation. Reported, never propagated.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The registration's parser rejected the event body
    #[error("parser failed for {event}: {message}")]
    Parse {
        /// Event name
        event: String,
        /// Parser error
        message: String,
    },

    /// The handler returned an error
    #[error("handler failed for {event}: {error:#}")]
    Failed {
        /// Event name
        event: String,
        /// Handler error
        error: anyhow::Error,
    },

    /// The handler panicked
    #[error("handler panicked for {event}")]
    Panicked {
        /// Event name
        event: String,
    },
}

/// Convenience alias for results in this crate
pub type Result<T> = std::result::Result<T, GatewayError>;
