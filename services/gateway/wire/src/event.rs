//! Typed models for the dispatch events the service layer cares about.
//!
//! Anything not modelled here stays as raw JSON in [`GatewayEvent::Unknown`].

use crate::WireError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names with a typed model
pub mod names {
    /// Identify succeeded
    pub const READY: &str = "READY";
    /// Resume succeeded; replayed events follow
    pub const RESUMED: &str = "RESUMED";
    /// A message was posted
    pub const MESSAGE_CREATE: &str = "MESSAGE_CREATE";
    /// A user's presence changed
    pub const PRESENCE_UPDATE: &str = "PRESENCE_UPDATE";
}

/// User object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Snowflake id
    pub id: String,
    /// Username
    #[serde(default)]
    pub username: String,
    /// Legacy discriminator ("0" for migrated accounts)
    #[serde(default)]
    pub discriminator: Option<String>,
    /// Display name
    #[serde(default)]
    pub global_name: Option<String>,
    /// Whether the user is a bot
    #[serde(default)]
    pub bot: bool,
}

impl User {
    /// `name#1234`, or just the name for accounts without a discriminator
    pub fn unique_username(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }
}

/// READY body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ready {
    /// Protocol version
    #[serde(default)]
    pub v: Option<u8>,
    /// Session id to use for resuming
    pub session_id: String,
    /// Endpoint to use for resuming
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    /// The connected user
    #[serde(default)]
    pub user: Option<User>,
}

/// MESSAGE_CREATE body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message id
    pub id: String,
    /// Channel the message was posted in
    pub channel_id: String,
    /// Guild, absent for direct messages
    #[serde(default)]
    pub guild_id: Option<String>,
    /// Text content (empty without the message content intent)
    #[serde(default)]
    pub content: String,
    /// Author
    pub author: User,
}

impl Message {
    /// Whether the message was sent outside a guild
    pub fn is_direct(&self) -> bool {
        self.guild_id.is_none()
    }
}

/// Partial user carried by presence updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialUser {
    /// Snowflake id
    pub id: String,
    /// Username when included
    #[serde(default)]
    pub username: Option<String>,
}

/// One activity of a presence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity name
    pub name: String,
    /// Activity type
    #[serde(rename = "type", default)]
    pub kind: u8,
}

/// PRESENCE_UPDATE body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// Whose presence changed
    pub user: PartialUser,
    /// Guild the update relates to
    #[serde(default)]
    pub guild_id: Option<String>,
    /// online, idle, dnd or offline
    #[serde(default)]
    pub status: Option<String>,
    /// Current activities
    #[serde(default)]
    pub activities: Vec<Activity>,
}

/// A dispatch event decoded by name
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// READY
    Ready(Ready),
    /// RESUMED
    Resumed,
    /// MESSAGE_CREATE
    MessageCreate(Message),
    /// PRESENCE_UPDATE
    PresenceUpdate(PresenceUpdate),
    /// Any other event, body left undecoded
    Unknown {
        /// Event name as received
        name: String,
        /// Raw body
        data: Value,
    },
}

impl GatewayEvent {
    /// Decode `data` according to `name` (matched case-insensitively)
    pub fn parse(name: &str, data: Value) -> Result<Self, WireError> {
        let upper = name.to_ascii_uppercase();
        let event = match upper.as_str() {
            names::READY => GatewayEvent::Ready(serde_json::from_value(data)?),
            names::RESUMED => GatewayEvent::Resumed,
            names::MESSAGE_CREATE => GatewayEvent::MessageCreate(serde_json::from_value(data)?),
            names::PRESENCE_UPDATE => GatewayEvent::PresenceUpdate(serde_json::from_value(data)?),
            _ => GatewayEvent::Unknown {
                name: name.to_string(),
                data,
            },
        };
        Ok(event)
    }

    /// Whether the event relates to a guild
    pub fn is_guild_related(&self) -> bool {
        match self {
            GatewayEvent::MessageCreate(message) => message.guild_id.is_some(),
            GatewayEvent::PresenceUpdate(presence) => presence.guild_id.is_some(),
            GatewayEvent::Unknown { data, .. } => data.get("guild_id").is_some(),
            GatewayEvent::Ready(_) | GatewayEvent::Resumed => false,
        }
    }
}
