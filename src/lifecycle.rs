//! Lifecycle controller for the node service stack.
//!
//! Owns the status state machine and delegates container operations to the
//! orchestration engine. Transitions fully serialize through one mutex; a
//! concurrent duplicate start/stop/restart returns the in-progress status
//! instead of issuing a second engine call. Status reads never block on
//! external calls: the last-computed snapshot is published through a watch
//! channel.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::config::EngineConfig;
use crate::engine::OrchestrationEngine;
use crate::error::{NodeError, NodeResult};
use crate::events::EventHub;
use crate::store::StateStore;
use crate::types::{sync_progress, NodePhase, NodeStatus};

pub struct LifecycleController {
    engine: Arc<dyn OrchestrationEngine>,
    events: Arc<EventHub>,
    store: Arc<StateStore>,
    status_tx: watch::Sender<NodeStatus>,
    /// Serializes start/stop/restart; duplicates use try_lock and bail
    transition: tokio::sync::Mutex<()>,
    /// When the current Starting phase began, for the stuck-start deadline
    starting_since: Mutex<Option<Instant>>,
    stop_grace_secs: u64,
}

impl LifecycleController {
    pub fn new(
        engine: Arc<dyn OrchestrationEngine>,
        events: Arc<EventHub>,
        store: Arc<StateStore>,
        config: &EngineConfig,
    ) -> Self {
        let initial = NodeStatus::stopped(store.get().last_known_block);
        let (status_tx, _) = watch::channel(initial);

        Self {
            engine,
            events,
            store,
            status_tx,
            transition: tokio::sync::Mutex::new(()),
            starting_since: Mutex::new(None),
            stop_grace_secs: config.stop_grace_secs,
        }
    }

    /// Last-computed status snapshot; never blocks on external calls
    pub fn status(&self) -> NodeStatus {
        self.status_tx.borrow().clone()
    }

    /// Subscribe to status updates; notified on every transition and every
    /// active monitor tick.
    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.status_tx.subscribe()
    }

    /// How long the stack has been in Starting, if it is
    pub fn starting_since(&self) -> Option<Instant> {
        *self.starting_since.lock()
    }

    /// Start the service stack.
    ///
    /// Fails with `NotInitialized` unless setup has completed. Idempotent: a
    /// call while the stack is already starting, syncing or running returns
    /// the current status without invoking the engine again.
    pub async fn start(&self) -> NodeResult<NodeStatus> {
        let Ok(_guard) = self.transition.try_lock() else {
            return Ok(self.status());
        };
        self.start_locked().await
    }

    async fn start_locked(&self) -> NodeResult<NodeStatus> {
        let current = self.status();
        if current.phase.is_active() {
            tracing::debug!(phase = %current.phase, "start requested while already up, no-op");
            return Ok(current);
        }

        if !self.store.get().initialized {
            return Err(NodeError::NotInitialized);
        }

        self.set_phase(NodePhase::Starting, None);
        *self.starting_since.lock() = Some(Instant::now());
        self.events.info("Starting node stack", None);

        if let Err(err) = self.engine.up().await {
            self.events
                .error("Engine failed to start the stack", Some(err.to_string()));
            tracing::error!(error = %err, "engine start failed");
            self.set_phase(NodePhase::Error, Some(err.to_string()));
            return Err(match err {
                NodeError::Timeout { .. } => err,
                other => NodeError::EngineFailure {
                    message: other.to_string(),
                },
            });
        }

        if let Err(err) = self.store.touch_last_run() {
            tracing::warn!(error = %err, "failed to record last run timestamp");
        }

        // If the last known figures already show a caught-up node, promote
        // immediately; otherwise the monitor's first sample decides between
        // Syncing and Running.
        let status = self.status();
        if status.target_block > 0 && status.current_block >= status.target_block {
            self.set_phase(NodePhase::Running, None);
        }

        self.events.info("Node stack started", None);
        Ok(self.status())
    }

    /// Stop the service stack, best-effort.
    ///
    /// If the engine does not report teardown within the grace period the
    /// status is force-set to Stopped anyway: status tracks reality, not a
    /// hung subordinate.
    pub async fn stop(&self) -> NodeResult<NodeStatus> {
        let Ok(_guard) = self.transition.try_lock() else {
            return Ok(self.status());
        };
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> NodeResult<NodeStatus> {
        let current = self.status();
        if current.phase == NodePhase::Stopped {
            return Ok(current);
        }

        if current.phase.is_active() {
            self.set_phase(NodePhase::Stopping, None);
        }
        self.events.info("Stopping node stack", None);

        let grace = std::time::Duration::from_secs(self.stop_grace_secs);
        match timeout(grace, self.engine.down()).await {
            Ok(Ok(())) => {
                tracing::info!("engine reported stack down");
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "engine stop failed, forcing status to stopped");
                self.events
                    .warn("Engine stop failed, forcing stopped", Some(err.to_string()));
            }
            Err(_) => {
                tracing::warn!(
                    grace_secs = self.stop_grace_secs,
                    "engine did not confirm teardown within grace period, forcing status to stopped"
                );
                self.events.warn(
                    "Engine did not confirm teardown in time, forcing stopped",
                    None,
                );
            }
        }

        *self.starting_since.lock() = None;
        self.force_stopped();
        self.events.info("Node stack stopped", None);
        Ok(self.status())
    }

    /// Composite stop-then-start. A stop failure that leaves the stack
    /// partially down still attempts start; only a start failure escalates.
    pub async fn restart(&self) -> NodeResult<NodeStatus> {
        let Ok(_guard) = self.transition.try_lock() else {
            return Ok(self.status());
        };

        if let Err(err) = self.stop_locked().await {
            tracing::warn!(error = %err, "stop during restart failed, attempting start anyway");
        }
        self.start_locked().await
    }

    /// Apply a monitor sample: recompute the status wholesale.
    ///
    /// `target_block` of `None` reuses the last known target. Starting
    /// resolves to Syncing or Running depending on progress; Running never
    /// regresses to Syncing on a growing target. The active-phase check and
    /// the publish happen atomically under the channel lock, so a sample
    /// racing a concurrent stop cannot resurrect an active status.
    pub fn apply_sync_sample(&self, current_block: u64, target_block: Option<u64>, peers: u32) {
        let mut applied = None;
        self.status_tx.send_if_modified(|status| {
            if !status.phase.is_active() {
                return false;
            }

            // Stale target below current clamps rather than regressing
            let target = target_block.unwrap_or(status.target_block).max(current_block);
            let progress = sync_progress(current_block, target);

            let phase = match status.phase {
                NodePhase::Starting | NodePhase::Syncing => {
                    if progress >= 100.0 {
                        NodePhase::Running
                    } else {
                        NodePhase::Syncing
                    }
                }
                other => other,
            };
            if status.phase != phase {
                tracing::info!(from = %status.phase, to = %phase, "status transition");
            }

            *status = NodeStatus {
                phase,
                sync_progress: progress,
                current_block,
                target_block: target,
                peers_count: peers,
                error_message: None,
            };
            applied = Some(phase);
            true
        });

        let Some(phase) = applied else {
            return;
        };
        if phase != NodePhase::Starting {
            *self.starting_since.lock() = None;
        }
        if let Err(err) = self.store.set_last_known_block(current_block) {
            tracing::warn!(error = %err, "failed to persist last known block");
        }
    }

    /// Escalate to Error carrying the last underlying failure text
    pub fn escalate_error(&self, message: String) {
        self.events.error("Node stack error", Some(message.clone()));
        tracing::error!(message = %message, "escalating to error status");
        *self.starting_since.lock() = None;
        self.set_phase(NodePhase::Error, Some(message));
    }

    /// Validate against the transition table and publish; the check and the
    /// publish are atomic under the channel lock.
    fn set_phase(&self, phase: NodePhase, error_message: Option<String>) {
        self.status_tx.send_if_modified(|status| {
            if !status.phase.can_transition_to(phase) {
                tracing::warn!(
                    from = %status.phase,
                    to = %phase,
                    "illegal phase transition suppressed"
                );
                return false;
            }
            if status.phase != phase {
                tracing::info!(from = %status.phase, to = %phase, "status transition");
            }
            status.phase = phase;
            status.error_message = error_message;
            true
        });
    }

    /// Reality override used by stop: the stack is down regardless of what
    /// phase the state machine was in.
    fn force_stopped(&self) {
        self.status_tx.send_if_modified(|status| {
            if status.phase != NodePhase::Stopped {
                tracing::info!(from = %status.phase, to = %NodePhase::Stopped, "status transition");
            }
            status.phase = NodePhase::Stopped;
            status.peers_count = 0;
            status.error_message = None;
            true
        });
    }
}
