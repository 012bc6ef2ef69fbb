//! Session states and the public snapshot of a session.

use crate::error::FatalClose;
use gateway_wire::Intents;
use serde_json::Value;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Connection state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Opening a transport
    Connecting,
    /// Transport open, waiting for Hello or for READY/RESUMED
    Handshaking,
    /// READY or RESUMED received
    Ready,
    /// Waiting out the backoff before reconnecting
    Reconnecting,
    /// Waiting out the invalid session delay before resuming
    Resuming,
    /// Stopped, or closed with a fatal code
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Resuming => "resuming",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a session. The token is never included.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Session alias
    pub alias: String,
    /// Requested intents
    pub intents: Intents,
    /// Current state
    pub state: SessionState,
    /// Session id from READY
    pub session_id: Option<String>,
    /// Last sequence number seen
    pub sequence: Option<u64>,
    /// Endpoint for resume attempts
    pub resume_url: Option<String>,
    /// Heartbeat interval of the current handshake
    pub heartbeat_interval: Option<Duration>,
    /// When the last HeartbeatAck arrived
    pub last_heartbeat_ack: Option<SystemTime>,
    /// Round trip of the last acknowledged heartbeat
    pub latency: Option<Duration>,
    /// Current reconnect backoff step
    pub backoff: Duration,
    /// Transports opened after the first one
    pub reconnects: u64,
    /// Consecutive failed connect attempts
    pub connect_failures: u32,
    /// Last recoverable failure
    pub last_error: Option<String>,
    /// Raw READY body of the current session
    pub ready: Option<Value>,
    /// Why the session closed, when it closed fatally
    pub error: Option<FatalClose>,
}

impl SessionSnapshot {
    pub(crate) fn new(alias: impl Into<String>, intents: Intents, backoff: Duration) -> Self {
        Self {
            alias: alias.into(),
            intents,
            state: SessionState::Connecting,
            session_id: None,
            sequence: None,
            resume_url: None,
            heartbeat_interval: None,
            last_heartbeat_ack: None,
            latency: None,
            backoff,
            reconnects: 0,
            connect_failures: 0,
            last_error: None,
            ready: None,
            error: None,
        }
    }

    /// Whether application sends are accepted
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Whether the session has stopped for good
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Whether the next handshake will be a Resume
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }
}
