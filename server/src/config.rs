//! In-process server configuration.
//!
//! No file format and no flag parser: callers construct a [`ServerConfig`]
//! in code and override whichever fields they need, the same shape the rest
//! of this lineage uses for its connection/relay configs.

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address, e.g. `"0.0.0.0:8080"`.
    pub bind_addr: String,
    /// Grid width (number of columns).
    pub grid_width: i32,
    /// Grid height (number of rows).
    pub grid_height: i32,
    /// Hard admission cap on simultaneously connected drones.
    pub max_drones: usize,
    /// Survivor generator wakeup interval lower bound.
    pub generator_min_interval_secs: u64,
    /// Survivor generator wakeup interval upper bound.
    pub generator_max_interval_secs: u64,
    /// Interval on which the server emits `HEARTBEAT` to every drone.
    pub heartbeat_interval_ms: u64,
    /// A drone silent for this long is marked `DISCONNECTED`.
    pub heartbeat_timeout_ms: u64,
    /// Matcher tick interval.
    pub matcher_tick_ms: u64,
    /// Lifetime of an `ASSIGN_MISSION` before it is auto-released.
    pub mission_expiry_secs: i64,
    /// Value echoed in `HANDSHAKE_ACK.config.status_update_interval`.
    pub status_update_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            grid_width: 40,
            grid_height: 30,
            max_drones: 10,
            generator_min_interval_secs: rescue_proto::timing::GENERATOR_MIN_INTERVAL_SECS,
            generator_max_interval_secs: rescue_proto::timing::GENERATOR_MAX_INTERVAL_SECS,
            heartbeat_interval_ms: rescue_proto::timing::HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: rescue_proto::timing::HEARTBEAT_TIMEOUT_MS,
            matcher_tick_ms: rescue_proto::timing::MATCHER_TICK_MS,
            mission_expiry_secs: rescue_proto::timing::MISSION_EXPIRY_SECS,
            status_update_interval_secs: 5,
        }
    }
}
