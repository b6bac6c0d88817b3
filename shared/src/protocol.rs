//! Wire message taxonomy for the drone rescue coordination protocol.
//!
//! Every message is a single JSON object carrying a `type` field. Decoding a
//! line happens in two steps: first as a generic `serde_json::Value` so we
//! can classify the `type` field before committing to a concrete shape (this
//! is what lets us distinguish "missing type", "unknown type" and "known
//! type, malformed body" into the distinct `ERROR` responses the protocol
//! calls for), then as the concrete [`ClientMessage`] variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A grid coordinate. Bounds are enforced by the grid, not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to another coordinate. Never negative.
    pub fn manhattan(&self, other: Coord) -> i64 {
        (self.x as i64 - other.x as i64).abs() + (self.y as i64 - other.y as i64).abs()
    }
}

/// Advisory hardware capabilities reported at handshake time.
#[derive(Debug, Clone, Deserialize)]
pub struct Capabilities {
    pub max_speed: i64,
    pub battery_capacity: i64,
    pub payload: String,
}

/// The drone's self-reported busy/idle state on the wire (`"idle"`/`"busy"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DroneStatusWire {
    Idle,
    Busy,
}

/// Messages the server accepts from a connected drone.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "HANDSHAKE")]
    Handshake {
        drone_id: String,
        capabilities: Capabilities,
    },
    #[serde(rename = "STATUS_UPDATE")]
    StatusUpdate {
        drone_id: String,
        timestamp: i64,
        location: Coord,
        status: DroneStatusWire,
        battery: i64,
        speed: i64,
    },
    #[serde(rename = "MISSION_COMPLETE")]
    MissionComplete {
        drone_id: String,
        mission_id: String,
        timestamp: i64,
        success: bool,
        #[serde(default)]
        details: String,
    },
    #[serde(rename = "HEARTBEAT_RESPONSE")]
    HeartbeatResponse { drone_id: String, timestamp: i64 },
}

impl ClientMessage {
    /// The wire `type` string for this message, used for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Handshake { .. } => "HANDSHAKE",
            ClientMessage::StatusUpdate { .. } => "STATUS_UPDATE",
            ClientMessage::MissionComplete { .. } => "MISSION_COMPLETE",
            ClientMessage::HeartbeatResponse { .. } => "HEARTBEAT_RESPONSE",
        }
    }
}

/// Config echoed back in `HANDSHAKE_ACK`.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeConfig {
    pub status_update_interval: u64,
    pub heartbeat_interval: u64,
}

/// Messages the server sends to a connected drone.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "HANDSHAKE_ACK")]
    HandshakeAck {
        session_id: String,
        config: HandshakeConfig,
    },
    #[serde(rename = "ASSIGN_MISSION")]
    AssignMission {
        mission_id: String,
        priority: String,
        target: Coord,
        expiry: i64,
        checksum: String,
    },
    #[serde(rename = "HEARTBEAT")]
    Heartbeat { timestamp: i64 },
    #[serde(rename = "ERROR")]
    Error { code: u16, message: String },
}

impl ServerMessage {
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}

/// Errors produced while classifying or decoding one line of the protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Bad JSON")]
    BadJson,
    #[error("Missing message type")]
    MissingType,
    #[error("Invalid message type")]
    UnknownType(String),
}

impl ProtocolError {
    /// The `ERROR` response code for this failure. Every protocol-level
    /// decode failure is a 400 in this taxonomy; see the server crate for the
    /// connection-level failures (duplicate id, admission cap) that use
    /// other codes.
    pub fn code(&self) -> u16 {
        400
    }
}

const KNOWN_TYPES: &[&str] = &[
    "HANDSHAKE",
    "STATUS_UPDATE",
    "MISSION_COMPLETE",
    "HEARTBEAT_RESPONSE",
];

/// Decode one line of the wire protocol into a [`ClientMessage`].
///
/// Classifies the `type` field before attempting a full decode so that a
/// missing type, an unknown type, and a known type with a malformed body
/// produce the distinct `ERROR` responses the protocol calls for.
pub fn decode_client_message(line: &str) -> Result<ClientMessage, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|_| ProtocolError::BadJson)?;

    let type_field = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::MissingType)?;

    if !KNOWN_TYPES.contains(&type_field) {
        return Err(ProtocolError::UnknownType(type_field.to_string()));
    }

    serde_json::from_value(value).map_err(|_| ProtocolError::BadJson)
}

/// Encode a [`ServerMessage`] as a single JSON line (no trailing newline).
pub fn encode_server_message(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
