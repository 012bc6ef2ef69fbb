//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Frame body was not valid JSON or did not match the envelope
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Opcode outside the known set
    #[error("unknown opcode {0}")]
    UnknownOpcode(u64),

    /// Frame exceeds the configured size limit
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Required field absent from a payload
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Structurally wrong frame (e.g. binary that is not UTF-8)
    #[error("malformed frame: {0}")]
    Malformed(String),
}
