//! Handshake payload bodies and the intents bitmask.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

bitflags! {
    /// Event categories a session subscribes to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Intents: u64 {
        /// Guild create/update/delete, roles, channels, threads
        const GUILDS = 1 << 0;
        /// Member add/update/remove (privileged)
        const GUILD_MEMBERS = 1 << 1;
        /// Bans and audit log entries
        const GUILD_MODERATION = 1 << 2;
        /// Emojis, stickers and soundboard
        const GUILD_EXPRESSIONS = 1 << 3;
        /// Integration updates
        const GUILD_INTEGRATIONS = 1 << 4;
        /// Webhook updates
        const GUILD_WEBHOOKS = 1 << 5;
        /// Invite create/delete
        const GUILD_INVITES = 1 << 6;
        /// Voice state updates
        const GUILD_VOICE_STATES = 1 << 7;
        /// Presence updates (privileged)
        const GUILD_PRESENCES = 1 << 8;
        /// Guild message create/update/delete
        const GUILD_MESSAGES = 1 << 9;
        /// Guild message reactions
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        /// Guild typing start
        const GUILD_MESSAGE_TYPING = 1 << 11;
        /// Direct message create/update/delete
        const DIRECT_MESSAGES = 1 << 12;
        /// Direct message reactions
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        /// Direct message typing start
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        /// Message content in message events (privileged)
        const MESSAGE_CONTENT = 1 << 15;
        /// Scheduled events
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        /// Auto moderation rule changes
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        /// Auto moderation actions
        const AUTO_MODERATION_EXECUTION = 1 << 21;
    }
}

impl Intents {
    /// Intents that must be enabled for the application before use
    pub fn privileged() -> Self {
        Intents::GUILD_MEMBERS | Intents::GUILD_PRESENCES | Intents::MESSAGE_CONTENT
    }
}

// The wire carries the raw integer, not flag names.
impl Serialize for Intents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Intents::from_bits_retain(u64::deserialize(deserializer)?))
    }
}

/// Hello body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

impl Hello {
    /// Heartbeat interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }
}

/// Client identification sent with Identify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    /// Operating system
    pub os: String,
    /// Library name
    pub browser: String,
    /// Library name
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "redb-gateway".to_string(),
            device: "redb-gateway".to_string(),
        }
    }
}

/// Identify body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    /// Authentication token
    pub token: String,
    /// Subscribed intents
    pub intents: Intents,
    /// Connection properties
    pub properties: ConnectionProperties,
}

/// Resume body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    /// Authentication token
    pub token: String,
    /// Session being resumed
    pub session_id: String,
    /// Last sequence number received
    pub seq: u64,
}
