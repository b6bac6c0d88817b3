//! World state: the grid-backed survivor registry and the drone registry,
//! bundled behind a shared handle.

pub mod drones;
pub mod grid;
pub mod survivors;

pub use drones::{DroneRecord, DroneRegistry, DroneState};
pub use grid::{Grid, OutOfBounds};
pub use survivors::{Survivor, SurvivorRegistry, SurvivorStatus};

use crate::config::ServerConfig;
use std::sync::Arc;

/// Consistent, read-only snapshot of the whole world for the visualizer
/// interface.
#[derive(Debug, Clone)]
pub struct WorldSnapshot {
    pub survivors: Vec<(String, rescue_proto::Coord, SurvivorStatus)>,
    pub drones: Vec<DroneRecord>,
}

/// The two registries a connection handler and the matcher both need.
/// Lock ordering when both are touched in the same operation: survivors
/// before drones (see the matcher, the only place that locks both).
pub struct World {
    pub survivors: Arc<SurvivorRegistry>,
    pub drones: Arc<DroneRegistry>,
}

impl World {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            survivors: Arc::new(SurvivorRegistry::new(config.grid_width, config.grid_height)),
            drones: Arc::new(DroneRegistry::new()),
        }
    }

    pub async fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            survivors: self.survivors.snapshot().await,
            drones: self.drones.snapshot().await,
        }
    }
}
