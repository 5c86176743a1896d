//! Status and telemetry records shared across components.
//!
//! `NodePhase` is the lifecycle state machine; the transition table here is
//! the single source of truth and every phase change goes through it.
//!
//! Phase transitions:
//! - Stopped -> Starting (start)
//! - Starting -> Syncing (engine up, not caught up)
//! - Starting -> Running (engine up, already caught up)
//! - Syncing -> Running (progress reached 100)
//! - Starting/Syncing/Running -> Stopping (stop)
//! - Stopping -> Stopped (engine down)
//! - any -> Error (engine or poll failure beyond threshold)
//! - Error -> Starting (retry)

use serde::{Deserialize, Serialize};

/// Lifecycle phase of the node stack. No phase is terminal; Error is
/// recoverable via start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodePhase {
    Stopped,
    Starting,
    Syncing,
    Running,
    Stopping,
    Error,
}

impl NodePhase {
    /// Whether the state machine permits moving from `self` to `next`.
    /// Replacing a status without changing phase is always allowed.
    pub fn can_transition_to(self, next: NodePhase) -> bool {
        use NodePhase::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Syncing)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Syncing, Running)
                | (Syncing, Stopping)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Error, Starting)
                | (_, Error)
        )
    }

    /// Phases during which the sync monitor polls the node's query interface
    pub fn is_active(self) -> bool {
        matches!(
            self,
            NodePhase::Starting | NodePhase::Syncing | NodePhase::Running
        )
    }
}

impl std::fmt::Display for NodePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodePhase::Stopped => "stopped",
            NodePhase::Starting => "starting",
            NodePhase::Syncing => "syncing",
            NodePhase::Running => "running",
            NodePhase::Stopping => "stopping",
            NodePhase::Error => "error",
        };
        f.write_str(s)
    }
}

/// Aggregated node status. Recomputed on every monitor tick and every
/// lifecycle transition; replaced wholesale, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub phase: NodePhase,
    /// Percentage in [0, 100]
    pub sync_progress: f32,
    pub current_block: u64,
    pub target_block: u64,
    pub peers_count: u32,
    pub error_message: Option<String>,
}

impl NodeStatus {
    /// Status for a stopped stack, seeded with the last known chain position
    pub fn stopped(last_known_block: u64) -> Self {
        Self {
            phase: NodePhase::Stopped,
            sync_progress: 0.0,
            current_block: last_known_block,
            target_block: 0,
            peers_count: 0,
            error_message: None,
        }
    }
}

/// Compute sync progress from a reported block pair, clamping into [0, 100].
///
/// A momentarily stale target below the current block clamps to 100 rather
/// than letting progress regress; a zero target means there is nothing left
/// to catch up to.
pub fn sync_progress(current_block: u64, target_block: u64) -> f32 {
    if target_block == 0 || current_block >= target_block {
        return 100.0;
    }
    let pct = (current_block as f64 / target_block as f64) * 100.0;
    pct.clamp(0.0, 100.0) as f32
}

/// Latest resource sample; no history is retained
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_mb: u64,
    pub memory_total_mb: u64,
    pub disk_used_gb: f32,
    pub disk_total_gb: f32,
}

impl Default for ResourceUsage {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_mb: 0,
            memory_total_mb: 0,
            disk_used_gb: 0.0,
            disk_total_gb: 0.0,
        }
    }
}

/// Up/down flag for one service of the stack, as reported by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceState {
    pub name: String,
    pub running: bool,
}

/// On-demand aggregate built from live engine, chain and port probes.
/// Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedStatus {
    pub services: Vec<ServiceState>,
    pub current_block: u64,
    pub target_block: u64,
    pub sync_percentage: f32,
    pub connected_peers: u32,
    pub rpc_reachable: bool,
    pub p2p_reachable: bool,
    pub data_size: String,
    pub recent_error_count: usize,
    pub last_error: Option<String>,
}

/// Result of the host capability check performed before first setup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemRequirements {
    pub has_engine: bool,
    pub engine_running: bool,
    pub ram_gb: u64,
    pub available_disk_gb: u64,
    pub is_sufficient: bool,
    pub missing_requirements: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        use NodePhase::*;
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Syncing));
        assert!(Starting.can_transition_to(Running));
        assert!(Syncing.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(Error.can_transition_to(Starting));
        // Any phase may fail into Error
        for phase in [Stopped, Starting, Syncing, Running, Stopping] {
            assert!(phase.can_transition_to(Error));
        }
    }

    #[test]
    fn test_illegal_transitions() {
        use NodePhase::*;
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Syncing));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Running.can_transition_to(Syncing));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Error.can_transition_to(Running));
        assert!(!Error.can_transition_to(Syncing));
    }

    #[test]
    fn test_same_phase_replacement_allowed() {
        for phase in [
            NodePhase::Stopped,
            NodePhase::Syncing,
            NodePhase::Running,
            NodePhase::Error,
        ] {
            assert!(phase.can_transition_to(phase));
        }
    }

    #[test]
    fn test_sync_progress_clamping() {
        assert_eq!(sync_progress(500, 1000), 50.0);
        assert_eq!(sync_progress(0, 0), 100.0);
        assert_eq!(sync_progress(1000, 1000), 100.0);
        // Stale target below current clamps to 100 instead of regressing
        assert_eq!(sync_progress(1200, 1000), 100.0);
        assert_eq!(sync_progress(0, 1000), 0.0);
    }
}
