//! WebSocket protocol message definitions
//! These are the wire types for client-server communication.
//!
//! Every frame is a JSON envelope `{"event": <name>, "data": <payload>}`.
//! Client payloads are read loosely: fields of the wrong type are coerced to
//! safe defaults rather than rejecting the frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::{ConnId, InputCommand, RoomId};

/// Raw envelope as it arrives from a client
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    /// Announce a display name; the server replies with the session identity
    Identify { name: Option<String> },
    /// Change display name; `None` when the payload was not text
    Rename { name: Option<String> },
    /// Ask to be placed in a room
    Join,
    /// Movement command for the next tick
    Input(InputCommand),
    /// Room chat; `None` when the payload was not text
    Chat { message: Option<String> },
    /// Latency check, echoed back verbatim
    Ping { token: Value },
    /// Leave current room
    Leave,
}

impl ClientMsg {
    /// Parse a text frame into a client message
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_event(&envelope.event, envelope.data)
    }

    /// Build a client message from an event name and its payload
    pub fn from_event(event: &str, data: Value) -> Result<Self, ProtocolError> {
        let msg = match event {
            "identify" => ClientMsg::Identify {
                name: text_field(&data, "name"),
            },
            "rename" => ClientMsg::Rename {
                name: text_field(&data, "name"),
            },
            "join" => ClientMsg::Join,
            "input" => ClientMsg::Input(InputCommand::from_payload(&data)),
            "chat" => ClientMsg::Chat {
                message: text_field(&data, "message"),
            },
            "ping" => ClientMsg::Ping {
                token: data.get("token").cloned().unwrap_or(Value::Null),
            },
            "leave" => ClientMsg::Leave,
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(msg)
    }
}

fn text_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMsg {
    /// Reply to `identify`
    #[serde(rename_all = "camelCase")]
    IdentifyOk {
        id: ConnId,
        name: String,
        tick_rate: u32,
        snapshot_rate: u32,
        world: WorldInfo,
    },

    /// Confirmation of room join, sent to the joining connection only
    #[serde(rename_all = "camelCase")]
    Joined { room_id: RoomId },

    /// Room membership notices
    System(SystemNotice),

    /// Chat line relayed to the whole room
    #[serde(rename_all = "camelCase")]
    Chat {
        sender_id: ConnId,
        sender_name: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client token
        token: Value,
    },

    /// Room state snapshot (sent at the snapshot rate)
    #[serde(rename_all = "camelCase")]
    State {
        room_id: RoomId,
        /// Server time in Unix milliseconds
        t: u64,
        players: Vec<PlayerSnapshot>,
    },
}

impl ServerMsg {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WorldInfo {
    pub width: u32,
    pub height: u32,
}

/// Membership notice payload of the `system` event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SystemNotice {
    #[serde(rename_all = "camelCase")]
    Join { player_id: ConnId, name: String },

    #[serde(rename_all = "camelCase")]
    Leave { player_id: ConnId },

    #[serde(rename_all = "camelCase")]
    Rename {
        player_id: ConnId,
        old_name: String,
        new_name: String,
    },

    Count { count: usize },
}

/// Player state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: ConnId,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    /// Last processed input sequence
    pub last_seq: i32,
}

/// Frame-level protocol errors. Never reported back to the client.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}
