//! Drone registry.

use rescue_proto::protocol::{Capabilities, Coord, DroneStatusWire};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroneState {
    Idle,
    OnMission,
}

impl From<DroneStatusWire> for DroneState {
    /// A `STATUS_UPDATE` only ever reports idle/busy; it can move a drone
    /// from `ON_MISSION` back to `IDLE` early (client-reported) but it
    /// cannot itself put a drone `ON_MISSION` — only `assign_mission` does.
    fn from(wire: DroneStatusWire) -> Self {
        match wire {
            DroneStatusWire::Idle => DroneState::Idle,
            DroneStatusWire::Busy => DroneState::OnMission,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DroneRecord {
    pub id: String,
    pub capabilities: Capabilities,
    pub location: Coord,
    pub state: DroneState,
    pub battery: i64,
    pub speed: i64,
    pub current_mission: Option<String>,
    pub last_heartbeat_ms: u64,
    pub connected_at_ms: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DroneError {
    #[error("drone id already in use")]
    DuplicateId,
    #[error("unknown drone id")]
    NotFound,
    #[error("connected-drone count has reached the admission cap")]
    AtCapacity,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned,
    NotFound,
    NotIdle,
}

/// Tracks every connected drone. Keyed by the id presented at handshake;
/// ids are freed as soon as the drone disconnects, so a reconnecting drone
/// may reuse its previous id.
pub struct DroneRegistry {
    drones: RwLock<HashMap<String, DroneRecord>>,
}

impl DroneRegistry {
    pub fn new() -> Self {
        Self {
            drones: RwLock::new(HashMap::new()),
        }
    }

    pub async fn count(&self) -> usize {
        self.drones.read().await.len()
    }

    /// Register a newly-handshaken drone. Fails if `id` is already in use
    /// by another connected drone, or if the registry is already at
    /// `max_drones` (checked under the same write lock as the insert so two
    /// concurrent handshakes can't both slip past the cap).
    pub async fn register(
        &self,
        id: String,
        capabilities: Capabilities,
        now_ms: u64,
        max_drones: usize,
    ) -> Result<(), DroneError> {
        let mut drones = self.drones.write().await;
        if drones.contains_key(&id) {
            return Err(DroneError::DuplicateId);
        }
        if drones.len() >= max_drones {
            return Err(DroneError::AtCapacity);
        }
        drones.insert(
            id.clone(),
            DroneRecord {
                id,
                capabilities,
                location: Coord::new(0, 0),
                state: DroneState::Idle,
                battery: 100,
                speed: 0,
                current_mission: None,
                last_heartbeat_ms: now_ms,
                connected_at_ms: now_ms,
            },
        );
        Ok(())
    }

    /// Remove a drone entirely, e.g. on disconnect. Returns the last known
    /// record so the caller can release any in-flight mission.
    pub async fn remove(&self, id: &str) -> Option<DroneRecord> {
        self.drones.write().await.remove(id)
    }

    pub async fn update_status(
        &self,
        id: &str,
        location: Coord,
        status: DroneStatusWire,
        battery: i64,
        speed: i64,
    ) -> Result<(), DroneError> {
        let mut drones = self.drones.write().await;
        let drone = drones.get_mut(id).ok_or(DroneError::NotFound)?;
        drone.location = location;
        drone.battery = battery;
        drone.speed = speed;
        // A client-reported IDLE always wins; a client-reported BUSY only
        // matters if the server doesn't already consider it ON_MISSION
        // (the server's own assignment is authoritative either way).
        if status == DroneStatusWire::Idle {
            drone.state = DroneState::Idle;
            drone.current_mission = None;
        }
        Ok(())
    }

    pub async fn touch_heartbeat(&self, id: &str, now_ms: u64) -> Result<(), DroneError> {
        let mut drones = self.drones.write().await;
        let drone = drones.get_mut(id).ok_or(DroneError::NotFound)?;
        drone.last_heartbeat_ms = now_ms;
        Ok(())
    }

    /// Find the idle drone closest to `target` by Manhattan distance,
    /// breaking ties by ascending drone id for determinism.
    pub async fn find_idle_closest(&self, target: Coord) -> Option<(String, Coord)> {
        let drones = self.drones.read().await;
        drones
            .values()
            .filter(|d| d.state == DroneState::Idle)
            .min_by(|a, b| {
                let da = a.location.manhattan(target);
                let db = b.location.manhattan(target);
                da.cmp(&db).then_with(|| a.id.cmp(&b.id))
            })
            .map(|d| (d.id.clone(), d.location))
    }

    /// Mark a drone `ON_MISSION`. Fails if it's unknown or no longer idle
    /// (e.g. a concurrent `STATUS_UPDATE` moved it busy first).
    pub async fn assign_mission(&self, id: &str, mission_id: &str) -> AssignOutcome {
        let mut drones = self.drones.write().await;
        match drones.get_mut(id) {
            None => AssignOutcome::NotFound,
            Some(d) if d.state != DroneState::Idle => AssignOutcome::NotIdle,
            Some(d) => {
                d.state = DroneState::OnMission;
                d.current_mission = Some(mission_id.to_string());
                AssignOutcome::Assigned
            }
        }
    }

    /// Return a drone to `IDLE`, clearing any in-flight mission. Used on
    /// `MISSION_COMPLETE`, mission expiry, and disconnect-driven release.
    /// A no-op if the drone no longer exists.
    pub async fn release_mission(&self, id: &str) {
        if let Some(d) = self.drones.write().await.get_mut(id) {
            d.state = DroneState::Idle;
            d.current_mission = None;
        }
    }

    /// Ids whose last heartbeat response is older than `timeout_ms`.
    pub async fn stale_heartbeats(&self, now_ms: u64, timeout_ms: u64) -> Vec<String> {
        self.drones
            .read()
            .await
            .values()
            .filter(|d| now_ms.saturating_sub(d.last_heartbeat_ms) >= timeout_ms)
            .map(|d| d.id.clone())
            .collect()
    }

    /// Consistent read of every connected drone, for the visualizer.
    pub async fn snapshot(&self) -> Vec<DroneRecord> {
        self.drones.read().await.values().cloned().collect()
    }
}

impl Default for DroneRegistry {
    fn default() -> Self {
        Self::new()
    }
}
