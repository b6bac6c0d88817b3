//! Matcher: pairs `WAITING` survivors with `IDLE` drones on a fixed tick,
//! and tracks in-flight missions for expiry.

use crate::config::ServerConfig;
use crate::session::manager::ConnectionRegistry;
use crate::world::World;
use rescue_proto::protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Duration};
use tracing::{info, warn};

struct PendingMission {
    drone_id: String,
    assigned_at_ms: u64,
}

/// Table of in-flight missions (survivor id -> assigned drone + time),
/// mirroring the lineage's pending-command/timeout-tracker pattern so that
/// `ASSIGN_MISSION.expiry` is actually honoured rather than advisory.
pub struct PendingMissions {
    table: RwLock<HashMap<String, PendingMission>>,
}

impl PendingMissions {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn insert(&self, mission_id: String, drone_id: String, now_ms: u64) {
        self.table.write().await.insert(
            mission_id,
            PendingMission {
                drone_id,
                assigned_at_ms: now_ms,
            },
        );
    }

    /// Remove the entry for `mission_id` only if it is still assigned to
    /// `drone_id`; a completion from any other drone is stale and ignored.
    async fn remove_if_owned_by(&self, mission_id: &str, drone_id: &str) -> bool {
        let mut table = self.table.write().await;
        match table.get(mission_id) {
            Some(p) if p.drone_id == drone_id => {
                table.remove(mission_id);
                true
            }
            _ => false,
        }
    }

    /// Remove and return the mission currently assigned to `drone_id`, if
    /// any. Used on disconnect and heartbeat-timeout release paths.
    pub async fn take_for_drone(&self, drone_id: &str) -> Option<String> {
        let mut table = self.table.write().await;
        let mission_id = table
            .iter()
            .find(|(_, p)| p.drone_id == drone_id)
            .map(|(id, _)| id.clone())?;
        table.remove(&mission_id);
        Some(mission_id)
    }

    async fn sweep_expired(&self, now_ms: u64, expiry_ms: u64) -> Vec<(String, String)> {
        let mut table = self.table.write().await;
        let expired: Vec<String> = table
            .iter()
            .filter(|(_, p)| now_ms.saturating_sub(p.assigned_at_ms) >= expiry_ms)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .map(|id| {
                let p = table.remove(&id).expect("just observed in the same lock");
                (id, p.drone_id)
            })
            .collect()
    }
}

impl Default for PendingMissions {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the matcher loop: on each tick, attempt exactly one
/// survivor-to-drone pairing, then sweep expired missions. Terminates when
/// `shutdown` reports `false`.
pub async fn run_matcher(
    world: Arc<World>,
    connections: Arc<ConnectionRegistry>,
    pending: Arc<PendingMissions>,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(Duration::from_millis(config.matcher_tick_ms));

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.changed() => {}
        }
        if !*shutdown.borrow() {
            break;
        }

        assign_one(&world, &connections, &pending, &config).await;
        sweep_expired(&world, &pending, &config).await;
    }
}

/// Attempt a single pairing: the first waiting survivor against its
/// closest idle drone. A no-op if either side is empty. With several
/// survivors waiting at once, later ones simply wait for subsequent ticks
/// rather than all being dispatched in the same tick.
async fn assign_one(
    world: &World,
    connections: &ConnectionRegistry,
    pending: &PendingMissions,
    config: &ServerConfig,
) {
    let Some(survivor_id) = world.survivors.peek_waiting().await else {
        return;
    };
    let Some(survivor) = world.survivors.get(&survivor_id).await else {
        return;
    };
    let Some((drone_id, _)) = world.drones.find_idle_closest(survivor.coord).await else {
        return;
    };

    if world.survivors.claim(&survivor_id).await != crate::world::survivors::ClaimOutcome::Claimed {
        return;
    }
    if world.drones.assign_mission(&drone_id, &survivor_id).await
        != crate::world::drones::AssignOutcome::Assigned
    {
        world.survivors.release(&survivor_id).await;
        return;
    }

    let now = rescue_proto::now_ms();
    let expiry = (now / 1000) as i64 + config.mission_expiry_secs;
    pending.insert(survivor_id.clone(), drone_id.clone(), now).await;

    let message = ServerMessage::AssignMission {
        mission_id: survivor_id.clone(),
        priority: "high".into(),
        target: survivor.coord,
        expiry,
        checksum: rescue_proto::timing::MISSION_CHECKSUM_PLACEHOLDER.into(),
    };

    match connections.get(&drone_id).await {
        Some(handle) if handle.send(&message).await.is_ok() => {
            info!(mission_id = %survivor_id, drone_id = %drone_id, "assigned mission");
        }
        _ => {
            // Drone vanished between find_idle_closest and send; unwind.
            warn!(mission_id = %survivor_id, drone_id = %drone_id, "assignment target disappeared, releasing");
            pending.take_for_drone(&drone_id).await;
            world.drones.release_mission(&drone_id).await;
            world.survivors.release(&survivor_id).await;
        }
    }
}

async fn sweep_expired(world: &World, pending: &PendingMissions, config: &ServerConfig) {
    let now = rescue_proto::now_ms();
    let expired = pending
        .sweep_expired(now, (config.mission_expiry_secs as u64) * 1000)
        .await;
    for (mission_id, drone_id) in expired {
        warn!(mission_id = %mission_id, drone_id = %drone_id, "mission expired, releasing");
        world.survivors.release(&mission_id).await;
        world.drones.release_mission(&drone_id).await;
    }
}

/// Handle a `MISSION_COMPLETE` from `drone_id`. A completion that doesn't
/// match the mission currently on record for that drone is stale and
/// discarded, per the ordering guarantees in the concurrency model.
pub async fn complete_mission(
    world: &World,
    pending: &PendingMissions,
    drone_id: &str,
    mission_id: &str,
    ts_ms: u64,
) {
    if !pending.remove_if_owned_by(mission_id, drone_id).await {
        warn!(mission_id = %mission_id, drone_id = %drone_id, "stale or unknown mission completion, discarding");
        return;
    }
    world.drones.release_mission(drone_id).await;
    match world.survivors.complete(mission_id, ts_ms).await {
        crate::world::survivors::CompleteOutcome::Completed => {
            info!(mission_id = %mission_id, drone_id = %drone_id, "mission completed");
        }
        outcome => {
            warn!(mission_id = %mission_id, drone_id = %drone_id, ?outcome, "mission completion for survivor in unexpected state, ignoring");
        }
    }
}

/// Release whatever mission is currently assigned to `drone_id`, e.g. on
/// disconnect or heartbeat timeout.
pub async fn release_for_drone(world: &World, pending: &PendingMissions, drone_id: &str) {
    if let Some(mission_id) = pending.take_for_drone(drone_id).await {
        world.survivors.release(&mission_id).await;
    }
}
