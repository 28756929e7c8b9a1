//! In-memory status snapshots and restart counters

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Lifecycle state of one instance as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Running,
    Exited,
    Dead,
    Removing,
    Paused,
    NotFound,
    Unknown,
}

impl InstanceStatus {
    /// Whether the state means the container has terminated or is on the
    /// way out. A `running -> terminating` observation bumps the restart
    /// counter.
    pub fn indicates_termination(self) -> bool {
        matches!(self, Self::Exited | Self::Dead | Self::Removing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Removing => "removing",
            Self::Paused => "paused",
            Self::NotFound => "not_found",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest reconciler observation for one instance.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusSnapshot {
    pub status: InstanceStatus,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub updated: u64,
}

impl StatusSnapshot {
    /// A snapshot with zero telemetry, as seeded on create.
    pub fn seed(status: InstanceStatus) -> Self {
        Self {
            status,
            cpu_percent: 0.0,
            memory_bytes: 0,
            updated: epoch_secs(),
        }
    }
}

/// Result of recording one observation.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    /// Snapshot state before this observation, if any.
    pub previous: Option<InstanceStatus>,

    /// Whether the restart counter was bumped.
    pub restart_detected: bool,
}

/// Snapshot and restart-counter maps, always locked together.
#[derive(Debug, Default)]
struct BoardState {
    snapshots: HashMap<String, StatusSnapshot>,
    restarts: HashMap<String, u64>,
}

/// Shared board of snapshots and restart counters.
///
/// One mutex guards both maps, so readers never see a bumped counter next
/// to a stale snapshot. The lock is held only for map operations; no
/// runtime call ever runs under it.
#[derive(Debug, Default)]
pub struct SnapshotBoard {
    state: Mutex<BoardState>,
}

impl SnapshotBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot for an instance.
    pub fn get(&self, id: &str) -> Option<StatusSnapshot> {
        self.state.lock().snapshots.get(id).copied()
    }

    /// Seed the snapshot after a create or restart decision.
    pub fn seed(&self, id: &str, status: InstanceStatus) {
        self.state
            .lock()
            .snapshots
            .insert(id.to_string(), StatusSnapshot::seed(status));
    }

    /// Drop the snapshot so the next reconciler pass refreshes it.
    pub fn invalidate(&self, id: &str) {
        self.state.lock().snapshots.remove(id);
    }

    /// Forget an instance entirely: snapshot and restart counter.
    pub fn remove(&self, id: &str) {
        let mut state = self.state.lock();
        state.snapshots.remove(id);
        state.restarts.remove(id);
    }

    /// Prune snapshot entries for ids no longer in the store.
    pub fn retain_ids(&self, ids: &HashSet<String>) {
        self.state.lock().snapshots.retain(|id, _| ids.contains(id));
    }

    /// Record an observed status with telemetry, applying the restart
    /// counter rule. Counter and snapshot move together under one lock
    /// acquisition.
    pub fn observe(
        &self,
        id: &str,
        status: InstanceStatus,
        cpu_percent: f64,
        memory_bytes: u64,
    ) -> Observation {
        let mut state = self.state.lock();
        let previous = state.snapshots.get(id).map(|snapshot| snapshot.status);

        let restart_detected =
            previous == Some(InstanceStatus::Running) && status.indicates_termination();
        if restart_detected {
            *state.restarts.entry(id.to_string()).or_insert(0) += 1;
        }

        state.snapshots.insert(
            id.to_string(),
            StatusSnapshot {
                status,
                cpu_percent,
                memory_bytes,
                updated: epoch_secs(),
            },
        );

        Observation {
            previous,
            restart_detected,
        }
    }

    /// Times the instance was seen dying while expected to run.
    pub fn restart_count(&self, id: &str) -> u64 {
        self.state.lock().restarts.get(id).copied().unwrap_or(0)
    }

    /// Number of instances whose snapshot says `running`.
    pub fn running_count(&self) -> usize {
        self.state
            .lock()
            .snapshots
            .values()
            .filter(|snapshot| snapshot.status == InstanceStatus::Running)
            .count()
    }

    #[cfg(test)]
    pub fn snapshot_ids(&self) -> HashSet<String> {
        self.state.lock().snapshots.keys().cloned().collect()
    }
}

/// Wall-clock seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(InstanceStatus::NotFound).unwrap(),
            serde_json::Value::String("not_found".to_string())
        );
        assert_eq!(InstanceStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_restart_counter_bumps_on_running_to_terminating() {
        let board = SnapshotBoard::new();

        board.observe("i1", InstanceStatus::Running, 1.0, 10);
        assert_eq!(board.restart_count("i1"), 0);

        let obs = board.observe("i1", InstanceStatus::Exited, 0.0, 0);
        assert!(obs.restart_detected);
        assert_eq!(obs.previous, Some(InstanceStatus::Running));
        assert_eq!(board.restart_count("i1"), 1);
    }

    #[test]
    fn test_restart_counter_ignores_other_transitions() {
        let board = SnapshotBoard::new();

        board.observe("i1", InstanceStatus::Exited, 0.0, 0);
        board.observe("i1", InstanceStatus::Exited, 0.0, 0);
        board.observe("i1", InstanceStatus::Dead, 0.0, 0);
        assert_eq!(board.restart_count("i1"), 0);

        // Back to running then paused is not a termination.
        board.observe("i1", InstanceStatus::Running, 0.0, 0);
        board.observe("i1", InstanceStatus::Paused, 0.0, 0);
        assert_eq!(board.restart_count("i1"), 0);
    }

    #[test]
    fn test_restart_counter_is_monotonic() {
        let board = SnapshotBoard::new();

        for _ in 0..3 {
            board.observe("i1", InstanceStatus::Running, 0.0, 0);
            board.observe("i1", InstanceStatus::Dead, 0.0, 0);
        }
        assert_eq!(board.restart_count("i1"), 3);
    }

    #[test]
    fn test_retain_ids_prunes_stale_entries() {
        let board = SnapshotBoard::new();
        board.seed("keep", InstanceStatus::Starting);
        board.seed("drop", InstanceStatus::Running);

        let keep: HashSet<String> = ["keep".to_string()].into_iter().collect();
        board.retain_ids(&keep);

        assert_eq!(board.snapshot_ids(), keep);
    }

    #[test]
    fn test_remove_clears_counter() {
        let board = SnapshotBoard::new();
        board.observe("i1", InstanceStatus::Running, 0.0, 0);
        board.observe("i1", InstanceStatus::Exited, 0.0, 0);
        assert_eq!(board.restart_count("i1"), 1);

        board.remove("i1");
        assert_eq!(board.restart_count("i1"), 0);
        assert!(board.get("i1").is_none());
    }

    #[test]
    fn test_seed_has_zero_telemetry() {
        let board = SnapshotBoard::new();
        board.seed("i1", InstanceStatus::Starting);

        let snapshot = board.get("i1").unwrap();
        assert_eq!(snapshot.status, InstanceStatus::Starting);
        assert_eq!(snapshot.cpu_percent, 0.0);
        assert_eq!(snapshot.memory_bytes, 0);
        assert!(snapshot.updated > 0);
    }
}
