//! Gateway payload envelope, opcodes, close codes, intents and event models.
//!
//! This crate provides the wire level of the gateway protocol: the JSON
//! envelope exchanged over the websocket, the handshake bodies, the close code
//! classification table and typed models for common dispatch events.
//!
//! ## Wire Format
//!
//! ```text
//! { "op": 0,                 opcode
//!   "d":  { ... },           data body (any JSON)
//!   "s":  42,                sequence, dispatch only
//!   "t":  "MESSAGE_CREATE" } event name, dispatch only
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod close;
pub mod error;
pub mod event;
pub mod frame;
pub mod opcode;
pub mod payload;

// Re-export main types
pub use close::{
    client_close_discards_session, CloseKind, ClosePolicy, CLOSE_GOING_AWAY, CLOSE_NORMAL,
    CLOSE_RESUMABLE,
};
pub use error::WireError;
pub use event::{GatewayEvent, Message, PresenceUpdate, Ready, User};
pub use frame::{FrameCodec, GatewayFrame, DEFAULT_MAX_FRAME_SIZE};
pub use opcode::OpCode;
pub use payload::{ConnectionProperties, Hello, Identify, Intents, Resume};

/// Gateway protocol version
pub const GATEWAY_VERSION: u8 = 10;

/// Default gateway endpoint
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Append the version and encoding query to a gateway endpoint. Keys the
/// endpoint already carries are left as they are.
pub fn gateway_url(base: &str, version: u8, encoding: &str) -> String {
    let (path, query) = match base.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query)),
        None => (format!("{}/", base.trim_end_matches('/')), None),
    };
    let has_key = |key: &str| {
        query
            .into_iter()
            .flat_map(|q| q.split('&'))
            .any(|pair| pair.split('=').next() == Some(key))
    };

    let mut params: Vec<String> = query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter(|pair| !pair.is_empty())
        .map(str::to_string)
        .collect();
    if !has_key("v") {
        params.push(format!("v={}", version));
    }
    if !has_key("encoding") {
        params.push(format!("encoding={}", encoding));
    }
    format!("{}?{}", path, params.join("&"))
}
