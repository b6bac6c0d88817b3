//! Heartbeat emission and liveness sweep.

use crate::config::ServerConfig;
use crate::matcher::{self, PendingMissions};
use crate::session::manager::ConnectionRegistry;
use crate::world::World;
use rescue_proto::protocol::ServerMessage;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

/// Sends `HEARTBEAT{timestamp}` to every connected drone on a fixed
/// interval. Terminates when `shutdown` reports `false`.
pub async fn run_heartbeat_emitter(
    connections: Arc<ConnectionRegistry>,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(Duration::from_millis(config.heartbeat_interval_ms));

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.changed() => {}
        }
        if !*shutdown.borrow() {
            break;
        }

        let now = rescue_proto::now_ms();
        let message = ServerMessage::Heartbeat {
            timestamp: (now / 1000) as i64,
        };
        for id in connections.connected_ids().await {
            if let Some(handle) = connections.get(&id).await {
                if let Err(e) = handle.send(&message).await {
                    warn!(drone_id = %id, error = %e, "failed to send heartbeat");
                }
            }
        }
    }
}

/// Marks any drone whose last inbound message is older than
/// `heartbeat_timeout_ms` as disconnected, releasing its in-flight mission.
pub async fn run_liveness_sweep(
    world: Arc<World>,
    connections: Arc<ConnectionRegistry>,
    pending: Arc<PendingMissions>,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(Duration::from_millis(config.heartbeat_interval_ms));

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.changed() => {}
        }
        if !*shutdown.borrow() {
            break;
        }

        let now = rescue_proto::now_ms();
        let stale = world
            .drones
            .stale_heartbeats(now, config.heartbeat_timeout_ms)
            .await;

        for drone_id in stale {
            info!(drone_id = %drone_id, "heartbeat timeout, marking disconnected");
            world.drones.remove(&drone_id).await;
            connections.unregister(&drone_id).await;
            matcher::release_for_drone(&world, &pending, &drone_id).await;
        }
    }
}
