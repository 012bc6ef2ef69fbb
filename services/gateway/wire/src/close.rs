//! Transport close codes and their classification.
//!
//! Which codes are fatal is service specific, so the classification is data
//! ([`ClosePolicy`]) rather than a hardcoded match. The defaults follow the
//! service's published close code table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Normal closure; used for explicit stop. The service discards the session.
pub const CLOSE_NORMAL: u16 = 1000;
/// Going away; also discards the session server-side
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Non-clean code the client uses when it wants to resume afterwards
pub const CLOSE_RESUMABLE: u16 = 4000;

/// What a close means for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Reconnect and resume if resume data exists
    Resumable,
    /// Reconnect with a fresh Identify; resume data is stale
    Reidentify,
    /// Do not reconnect
    Fatal,
}

/// Close code classification table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosePolicy {
    /// Codes after which reconnecting cannot succeed
    pub fatal: BTreeSet<u16>,
    /// Codes after which the session can no longer be resumed
    pub invalidates_session: BTreeSet<u16>,
}

impl Default for ClosePolicy {
    fn default() -> Self {
        Self {
            // authentication failed, invalid shard, sharding required,
            // invalid api version, invalid intents, disallowed intents
            fatal: [4004, 4010, 4011, 4012, 4013, 4014].into_iter().collect(),
            // invalid seq, session timed out
            invalidates_session: [4007, 4009].into_iter().collect(),
        }
    }
}

impl ClosePolicy {
    /// Classify a close received from the server. `None` means the stream
    /// ended without a close frame.
    pub fn classify(&self, code: Option<u16>) -> CloseKind {
        match code {
            Some(code) if self.fatal.contains(&code) => CloseKind::Fatal,
            Some(code) if self.invalidates_session.contains(&code) => CloseKind::Reidentify,
            _ => CloseKind::Resumable,
        }
    }
}

/// Whether a close sent by the client makes the server drop the session
pub fn client_close_discards_session(code: u16) -> bool {
    code == CLOSE_NORMAL || code == CLOSE_GOING_AWAY
}

/// Human readable name of a close code, for logs
pub fn describe(code: u16) -> &'static str {
    match code {
        1000 => "normal closure",
        1001 => "going away",
        1006 => "abnormal closure",
        1011 => "internal error",
        4000 => "unknown error",
        4001 => "unknown opcode",
        4002 => "decode error",
        4003 => "not authenticated",
        4004 => "authentication failed",
        4005 => "already authenticated",
        4007 => "invalid seq",
        4008 => "rate limited",
        4009 => "session timed out",
        4010 => "invalid shard",
        4011 => "sharding required",
        4012 => "invalid api version",
        4013 => "invalid intents",
        4014 => "disallowed intents",
        _ => "unrecognized close code",
    }
}
