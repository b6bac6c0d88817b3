//! Shared protocol types and codec for the drone rescue coordination server
//!
//! This crate provides the wire message taxonomy, JSON-lines framing, and a
//! handful of timing constants shared between the coordination server and
//! anything that speaks its protocol (a drone client, a test harness).

pub mod codec;
pub mod protocol;

use std::time::{SystemTime, UNIX_EPOCH};

pub use protocol::{
    Capabilities, ClientMessage, Coord, DroneStatusWire, HandshakeConfig, ProtocolError,
    ServerMessage,
};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing and sizing constants for the coordination server
pub mod timing {
    /// Heartbeat interval in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 10_000;

    /// A drone with no inbound traffic for this long is marked DISCONNECTED
    pub const HEARTBEAT_TIMEOUT_MS: u64 = 3 * HEARTBEAT_INTERVAL_MS;

    /// Matcher tick interval
    pub const MATCHER_TICK_MS: u64 = 100;

    /// Lifetime of an ASSIGN_MISSION before it is auto-released
    pub const MISSION_EXPIRY_SECS: i64 = 3600;

    /// Survivor generator wakeup interval bounds (uniform random within)
    pub const GENERATOR_MIN_INTERVAL_SECS: u64 = 2;
    pub const GENERATOR_MAX_INTERVAL_SECS: u64 = 4;

    /// Placeholder checksum carried on every ASSIGN_MISSION: opaque metadata,
    /// no verification algorithm defined.
    pub const MISSION_CHECKSUM_PLACEHOLDER: &str = "a1b2c3";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_nonzero() {
        assert!(now_ms() > 0);
    }
}
