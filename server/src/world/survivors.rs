//! Survivor registry and background generator.

use super::grid::{Grid, OutOfBounds};
use rescue_proto::{now_ms, Coord};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurvivorStatus {
    Waiting,
    Assigned,
    Helped,
}

#[derive(Debug, Clone)]
pub struct Survivor {
    pub id: String,
    pub coord: Coord,
    pub discovery_time_ms: u64,
    pub status: SurvivorStatus,
    pub helped_time_ms: Option<u64>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    NotFound,
    NotWaiting,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed,
    NotFound,
    WrongState,
}

struct Inner {
    grid: Grid,
    active: HashMap<String, Survivor>,
    /// Insertion-order queue used to approximate FIFO fairness in
    /// `peek_waiting`. Entries for survivors that have since left the
    /// `Waiting` state are skipped rather than eagerly pruned.
    order: VecDeque<String>,
    helped: Vec<Survivor>,
}

/// Owns every `Survivor` record for its lifetime, plus the grid's per-cell
/// survivor index, which must stay consistent with the active set
/// (invariant: a survivor is in the cell index iff it is in the active
/// registry). Keeping both behind the same lock makes that invariant free.
pub struct SurvivorRegistry {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
}

impl SurvivorRegistry {
    pub fn new(grid_width: i32, grid_height: i32) -> Self {
        Self {
            inner: RwLock::new(Inner {
                grid: Grid::new(grid_width, grid_height),
                active: HashMap::new(),
                order: VecDeque::new(),
                helped: Vec::new(),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    /// Create a new survivor at `coord` with status `WAITING`.
    pub async fn create(&self, coord: Coord) -> Result<String, OutOfBounds> {
        let id = format!("SURV-{:04}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut inner = self.inner.write().await;
        inner.grid.place(&id, coord)?;
        inner.active.insert(
            id.clone(),
            Survivor {
                id: id.clone(),
                coord,
                discovery_time_ms: now_ms(),
                status: SurvivorStatus::Waiting,
                helped_time_ms: None,
            },
        );
        inner.order.push_back(id.clone());
        Ok(id)
    }

    /// Atomically transition `WAITING -> ASSIGNED`.
    pub async fn claim(&self, id: &str) -> ClaimOutcome {
        let mut inner = self.inner.write().await;
        match inner.active.get_mut(id) {
            None => ClaimOutcome::NotFound,
            Some(s) if s.status != SurvivorStatus::Waiting => ClaimOutcome::NotWaiting,
            Some(s) => {
                s.status = SurvivorStatus::Assigned;
                ClaimOutcome::Claimed
            }
        }
    }

    /// Atomically transition `ASSIGNED -> WAITING`. Used when an assignment
    /// cannot be delivered (no idle drone, disconnect, or mission expiry).
    /// A no-op if the survivor is not currently `ASSIGNED` or no longer
    /// exists (already helped, e.g.).
    pub async fn release(&self, id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(s) = inner.active.get_mut(id) {
            if s.status == SurvivorStatus::Assigned {
                s.status = SurvivorStatus::Waiting;
                inner.order.push_back(id.to_string());
            }
        }
    }

    /// Transition `ASSIGNED -> HELPED`, move the record to the historical
    /// list, and drop it from the cell index.
    pub async fn complete(&self, id: &str, ts_ms: u64) -> CompleteOutcome {
        let mut inner = self.inner.write().await;
        let status_ok = matches!(
            inner.active.get(id),
            Some(s) if s.status == SurvivorStatus::Assigned
        );
        if !inner.active.contains_key(id) {
            return CompleteOutcome::NotFound;
        }
        if !status_ok {
            return CompleteOutcome::WrongState;
        }

        let mut survivor = inner.active.remove(id).expect("checked above");
        let _ = inner.grid.remove(id, survivor.coord);
        survivor.status = SurvivorStatus::Helped;
        survivor.helped_time_ms = Some(ts_ms);
        inner.helped.push(survivor);
        CompleteOutcome::Completed
    }

    /// Return the id of some `WAITING` survivor, insertion-order preferred.
    /// Returns `None` immediately if there are none; never blocks.
    pub async fn peek_waiting(&self) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .find(|id| {
                inner
                    .active
                    .get(id.as_str())
                    .map(|s| s.status == SurvivorStatus::Waiting)
                    .unwrap_or(false)
            })
            .cloned()
    }

    /// Fetch a clone of one active survivor's record, if it still exists.
    pub async fn get(&self, id: &str) -> Option<Survivor> {
        self.inner.read().await.active.get(id).cloned()
    }

    /// Consistent read of every active survivor, for the visualizer.
    pub async fn snapshot(&self) -> Vec<(String, Coord, SurvivorStatus)> {
        let inner = self.inner.read().await;
        inner
            .active
            .values()
            .map(|s| (s.id.clone(), s.coord, s.status))
            .collect()
    }

    /// Historical list of helped survivors, for the visualizer.
    pub async fn helped_snapshot(&self) -> Vec<Survivor> {
        self.inner.read().await.helped.clone()
    }

    /// Read-only view of which survivor ids occupy a cell.
    pub async fn cell(&self, coord: Coord) -> Result<Vec<String>, OutOfBounds> {
        let inner = self.inner.read().await;
        inner.grid.cell(coord).map(|set| set.iter().cloned().collect())
    }
}

/// Background task that injects survivors at a bounded rate. Wakes every
/// `min_interval_secs..=max_interval_secs` (uniform random), generates a
/// random coord inside the grid, and creates a survivor there. Terminates
/// cleanly when `shutdown` reports `false`.
pub async fn run_generator(
    registry: Arc<SurvivorRegistry>,
    grid_width: i32,
    grid_height: i32,
    min_interval_secs: u64,
    max_interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let sleep_secs = {
            use rand::Rng;
            rand::thread_rng().gen_range(min_interval_secs..=max_interval_secs)
        };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => {}
            _ = shutdown.changed() => {}
        }
        if !*shutdown.borrow() {
            break;
        }

        let coord = {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            Coord::new(rng.gen_range(0..grid_width), rng.gen_range(0..grid_height))
        };

        match registry.create(coord).await {
            Ok(id) => info!(survivor_id = %id, x = coord.x, y = coord.y, "generated survivor"),
            Err(e) => debug!(error = %e, "generator produced an out-of-bounds coord, skipping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_peek_returns_waiting_survivor() {
        let reg = SurvivorRegistry::new(10, 10);
        let id = reg.create(Coord::new(3, 4)).await.unwrap();
        assert_eq!(reg.peek_waiting().await, Some(id));
    }

    #[tokio::test]
    async fn peek_waiting_on_empty_registry_returns_none() {
        let reg = SurvivorRegistry::new(10, 10);
        assert_eq!(reg.peek_waiting().await, None);
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let reg = SurvivorRegistry::new(10, 10);
        let id = reg.create(Coord::new(1, 1)).await.unwrap();
        assert_eq!(reg.claim(&id).await, ClaimOutcome::Claimed);
        // A second claim on the same survivor fails: at-most-one-assignment.
        assert_eq!(reg.claim(&id).await, ClaimOutcome::NotWaiting);
        assert_eq!(reg.peek_waiting().await, None);
    }

    #[tokio::test]
    async fn release_returns_survivor_to_waiting() {
        let reg = SurvivorRegistry::new(10, 10);
        let id = reg.create(Coord::new(1, 1)).await.unwrap();
        reg.claim(&id).await;
        reg.release(&id).await;
        assert_eq!(reg.peek_waiting().await, Some(id));
    }

    #[tokio::test]
    async fn complete_moves_survivor_to_history_and_cell_index() {
        let reg = SurvivorRegistry::new(10, 10);
        let coord = Coord::new(2, 2);
        let id = reg.create(coord).await.unwrap();
        reg.claim(&id).await;
        assert_eq!(reg.complete(&id, 1234).await, CompleteOutcome::Completed);

        let snapshot = reg.snapshot().await;
        assert!(snapshot.iter().all(|(sid, ..)| sid != &id));
        assert!(reg.cell(coord).await.unwrap().is_empty());

        let helped = reg.helped_snapshot().await;
        assert_eq!(helped.len(), 1);
        assert_eq!(helped[0].id, id);
        assert_eq!(helped[0].coord, coord);
    }

    #[tokio::test]
    async fn complete_is_idempotent() {
        let reg = SurvivorRegistry::new(10, 10);
        let id = reg.create(Coord::new(0, 0)).await.unwrap();
        reg.claim(&id).await;
        assert_eq!(reg.complete(&id, 1).await, CompleteOutcome::Completed);
        // Duplicated MISSION_COMPLETE for the same id has no further effect.
        assert_eq!(reg.complete(&id, 2).await, CompleteOutcome::NotFound);
        assert_eq!(reg.helped_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn complete_on_waiting_survivor_is_wrong_state() {
        let reg = SurvivorRegistry::new(10, 10);
        let id = reg.create(Coord::new(0, 0)).await.unwrap();
        assert_eq!(reg.complete(&id, 1).await, CompleteOutcome::WrongState);
    }

    #[tokio::test]
    async fn generator_always_produces_in_bounds_coords() {
        let reg = Arc::new(SurvivorRegistry::new(5, 5));
        let (_tx, rx) = watch::channel(true);
        // Exercise create() directly across the full coordinate space rather
        // than waiting on the generator's random sleep.
        for x in 0..5 {
            for y in 0..5 {
                assert!(reg.create(Coord::new(x, y)).await.is_ok());
            }
        }
        drop(rx);
    }
}
