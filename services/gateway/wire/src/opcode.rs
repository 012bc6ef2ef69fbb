//! Gateway opcodes.
//!
//! Every frame carries an `op` integer selecting its control purpose. Only
//! [`OpCode::Dispatch`] frames carry a sequence number and an event name.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Frame opcodes as defined by the gateway protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Server → client named event
    Dispatch = 0,
    /// Liveness ping (both directions)
    Heartbeat = 1,
    /// Client handshake for a fresh session
    Identify = 2,
    /// Client presence change
    PresenceUpdate = 3,
    /// Client voice state change
    VoiceStateUpdate = 4,
    /// Client handshake re-attaching to an earlier session
    Resume = 6,
    /// Server asks the client to reconnect and resume
    Reconnect = 7,
    /// Client request for guild members
    RequestGuildMembers = 8,
    /// Server rejected the session; `d` says whether it can be resumed
    InvalidSession = 9,
    /// First server frame, carries the heartbeat interval
    Hello = 10,
    /// Server acknowledgment of a heartbeat
    HeartbeatAck = 11,
}

impl OpCode {
    /// Numeric value on the wire
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the server is allowed to send this opcode
    pub fn is_server_op(self) -> bool {
        matches!(
            self,
            OpCode::Dispatch
                | OpCode::Heartbeat
                | OpCode::Reconnect
                | OpCode::InvalidSession
                | OpCode::Hello
                | OpCode::HeartbeatAck
        )
    }
}

impl TryFrom<u64> for OpCode {
    type Error = crate::WireError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OpCode::Dispatch),
            1 => Ok(OpCode::Heartbeat),
            2 => Ok(OpCode::Identify),
            3 => Ok(OpCode::PresenceUpdate),
            4 => Ok(OpCode::VoiceStateUpdate),
            6 => Ok(OpCode::Resume),
            7 => Ok(OpCode::Reconnect),
            8 => Ok(OpCode::RequestGuildMembers),
            9 => Ok(OpCode::InvalidSession),
            10 => Ok(OpCode::Hello),
            11 => Ok(OpCode::HeartbeatAck),
            _ => Err(crate::WireError::UnknownOpcode(value)),
        }
    }
}

impl Serialize for OpCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for OpCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u64::deserialize(deserializer)?;
        OpCode::try_from(raw).map_err(serde::de::Error::custom)
    }
}
