//! Payload envelope and the codec that moves it on and off the transport.
//!
//! Every transport message is one JSON object `{ op, d, s, t }`. `s` and `t`
//! are only meaningful on dispatch frames and are `null` everywhere else.

use crate::opcode::OpCode;
use crate::payload::{Hello, Identify, Resume};
use crate::WireError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum accepted frame size (the service caps payloads well below this)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One gateway payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    /// Opcode
    pub op: OpCode,
    /// Data body
    #[serde(default)]
    pub d: Value,
    /// Sequence number (dispatch only)
    #[serde(default)]
    pub s: Option<u64>,
    /// Event name (dispatch only)
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayFrame {
    /// Create a non-dispatch frame
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// Create a dispatch frame
    pub fn dispatch(event_name: impl Into<String>, sequence: Option<u64>, d: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d,
            s: sequence,
            t: Some(event_name.into()),
        }
    }

    /// Heartbeat carrying the last seen sequence (`null` before the first dispatch)
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::new(OpCode::Heartbeat, sequence.map(Value::from).unwrap_or(Value::Null))
    }

    /// Heartbeat acknowledgment
    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck, Value::Null)
    }

    /// Hello with the interval in milliseconds
    pub fn hello(heartbeat_interval_ms: u64) -> Self {
        Self::new(
            OpCode::Hello,
            serde_json::json!({ "heartbeat_interval": heartbeat_interval_ms }),
        )
    }

    /// Server request to reconnect
    pub fn reconnect() -> Self {
        Self::new(OpCode::Reconnect, Value::Null)
    }

    /// Invalid session with its resumable flag
    pub fn invalid_session(resumable: bool) -> Self {
        Self::new(OpCode::InvalidSession, Value::Bool(resumable))
    }

    /// Identify handshake
    pub fn identify(identify: &Identify) -> Result<Self, WireError> {
        Ok(Self::new(OpCode::Identify, serde_json::to_value(identify)?))
    }

    /// Resume handshake
    pub fn resume(resume: &Resume) -> Result<Self, WireError> {
        Ok(Self::new(OpCode::Resume, serde_json::to_value(resume)?))
    }

    /// Event name of a dispatch frame
    pub fn event_name(&self) -> Option<&str> {
        self.t.as_deref()
    }

    /// Parse the body of a Hello frame
    pub fn hello_body(&self) -> Result<Hello, WireError> {
        Ok(serde_json::from_value(self.d.clone())?)
    }

    /// Parse the body of a Resume frame
    pub fn resume_body(&self) -> Result<Resume, WireError> {
        Ok(serde_json::from_value(self.d.clone())?)
    }

    /// Parse the body of an Identify frame
    pub fn identify_body(&self) -> Result<Identify, WireError> {
        Ok(serde_json::from_value(self.d.clone())?)
    }

    /// Resumable flag of an InvalidSession frame (absent means not resumable)
    pub fn resumable(&self) -> bool {
        self.d.as_bool().unwrap_or(false)
    }
}

/// JSON codec between [`GatewayFrame`] and transport text messages
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec with the default size limit
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Override the size limit
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Encode a frame to its text form
    pub fn encode(&self, frame: &GatewayFrame) -> Result<String, WireError> {
        let text = serde_json::to_string(frame)?;
        if text.len() > self.max_frame_size {
            return Err(WireError::Size(text.len()));
        }
        Ok(text)
    }

    /// Decode one text message
    pub fn decode(&self, text: &str) -> Result<GatewayFrame, WireError> {
        if text.len() > self.max_frame_size {
            return Err(WireError::Size(text.len()));
        }
        if text.trim().is_empty() {
            return Err(WireError::Malformed("empty frame".to_string()));
        }

        let frame: GatewayFrame = serde_json::from_str(text)?;
        if frame.op == OpCode::Dispatch && frame.t.is_none() {
            return Err(WireError::MissingField("t"));
        }
        Ok(frame)
    }

    /// Decode a binary message carrying uncompressed JSON
    pub fn decode_binary(&self, bytes: &[u8]) -> Result<GatewayFrame, WireError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| WireError::Malformed(format!("binary frame is not utf-8: {}", e)))?;
        self.decode(text)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{ConnectionProperties, Intents};
    use serde_json::json;

    #[test]
    fn test_decode_dispatch() {
        let codec = FrameCodec::new();
        let frame = codec
            .decode(r#"{"op":0,"d":{"content":"hi"},"s":42,"t":"MESSAGE_CREATE"}"#)
            .unwrap();

        assert_eq!(frame.op, OpCode::Dispatch);
        assert_eq!(frame.s, Some(42));
        assert_eq!(frame.event_name(), Some("MESSAGE_CREATE"));
        assert_eq!(frame.d["content"], "hi");
    }

    #[test]
    fn test_decode_control_frame_with_missing_fields() {
        let codec = FrameCodec::new();
        let frame = codec.decode(r#"{"op":11}"#).unwrap();
        assert_eq!(frame.op, OpCode::HeartbeatAck);
        assert_eq!(frame.d, Value::Null);
        assert_eq!(frame.s, None);
        assert_eq!(frame.t, None);
    }

    #[test]
    fn test_decode_hello() {
        let codec = FrameCodec::new();
        let frame = codec
            .decode(r#"{"op":10,"d":{"heartbeat_interval":41250},"s":null,"t":null}"#)
            .unwrap();
        let hello = frame.hello_body().unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let codec = FrameCodec::new();
        assert!(matches!(codec.decode("not json"), Err(WireError::Json(_))));
        assert!(matches!(codec.decode("   "), Err(WireError::Malformed(_))));
        assert!(codec.decode(r#"{"op":99,"d":null}"#).is_err());
        assert!(matches!(
            codec.decode(r#"{"op":0,"d":{},"s":1}"#),
            Err(WireError::MissingField("t"))
        ));
    }

    #[test]
    fn test_size_limit() {
        let codec = FrameCodec::new().with_max_frame_size(32);
        let frame = GatewayFrame::dispatch("EVENT", Some(1), json!({ "body": "x".repeat(64) }));
        assert!(matches!(codec.encode(&frame), Err(WireError::Size(_))));
    }

    #[test]
    fn test_encode_identify() {
        let codec = FrameCodec::new();
        let identify = Identify {
            token: "secret".to_string(),
            intents: Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT,
            properties: ConnectionProperties::default(),
        };
        let text = codec.encode(&GatewayFrame::identify(&identify).unwrap()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["op"], 2);
        assert_eq!(value["d"]["token"], "secret");
        assert_eq!(value["d"]["intents"], (1u64 << 9) | (1u64 << 15));
        assert!(value["d"]["properties"]["os"].is_string());
    }

    #[test]
    fn test_heartbeat_carries_sequence() {
        assert_eq!(GatewayFrame::heartbeat(Some(7)).d, json!(7));
        assert_eq!(GatewayFrame::heartbeat(None).d, Value::Null);
    }

    #[test]
    fn test_binary_frame() {
        let codec = FrameCodec::new();
        let frame = codec.decode_binary(br#"{"op":9,"d":true}"#).unwrap();
        assert_eq!(frame.op, OpCode::InvalidSession);
        assert!(frame.resumable());
        assert!(codec.decode_binary(&[0xff, 0xfe]).is_err());
    }
}
