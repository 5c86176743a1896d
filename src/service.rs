//! Node service facade.
//!
//! Wires the engine, chain client, lifecycle controller, monitor, sampler,
//! snapshot acquirer, event hub and state store together and exposes the
//! operation surface the daemon (and tests) call. Background loops run on
//! tokio tasks tied to one cancellation token; `shutdown` stops them all.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainQuery, JsonRpcChain};
use crate::config::AppConfig;
use crate::engine::{ComposeEngine, OrchestrationEngine};
use crate::error::{NodeError, NodeResult};
use crate::events::{EventHub, LogEntry, LogEvent, LogLevel};
use crate::lifecycle::LifecycleController;
use crate::monitor::SyncMonitor;
use crate::resources::{self, ResourceSampler};
use crate::snapshot::SnapshotAcquirer;
use crate::store::StateStore;
use crate::types::{DetailedStatus, NodeStatus, ResourceUsage, SystemRequirements};

pub struct NodeService {
    config: AppConfig,
    store: Arc<StateStore>,
    events: Arc<EventHub>,
    engine: Arc<dyn OrchestrationEngine>,
    chain: Arc<dyn ChainQuery>,
    lifecycle: Arc<LifecycleController>,
    snapshot: SnapshotAcquirer,
    resources: Arc<ResourceSampler>,
    cancel: CancellationToken,
}

impl NodeService {
    /// Build the service against the real compose engine and JSON-RPC chain
    pub fn new(config: AppConfig) -> NodeResult<Self> {
        let engine: Arc<dyn OrchestrationEngine> = Arc::new(ComposeEngine::new(
            config.paths.stack_dir.clone(),
            &config.engine,
        ));
        let chain: Arc<dyn ChainQuery> = Arc::new(JsonRpcChain::new(&config.chain)?);
        Self::with_components(config, engine, chain)
    }

    /// Build the service with injected engine and chain implementations
    pub fn with_components(
        config: AppConfig,
        engine: Arc<dyn OrchestrationEngine>,
        chain: Arc<dyn ChainQuery>,
    ) -> NodeResult<Self> {
        let store = Arc::new(StateStore::open(&config.paths.data_dir)?);
        let events = Arc::new(EventHub::new(config.event_capacity));
        let lifecycle = Arc::new(LifecycleController::new(
            engine.clone(),
            events.clone(),
            store.clone(),
            &config.engine,
        ));
        let snapshot = SnapshotAcquirer::new(
            config.paths.data_dir.clone(),
            config.paths.download_dir(),
            store.clone(),
            events.clone(),
            config.snapshot.clone(),
        )?;
        let resources = Arc::new(ResourceSampler::new(
            config.paths.data_dir.clone(),
            &config.resources,
        ));

        Ok(Self {
            config,
            store,
            events,
            engine,
            chain,
            lifecycle,
            snapshot,
            resources,
            cancel: CancellationToken::new(),
        })
    }

    /// Spawn the monitor, sampler and uptime loops. Idempotent only in the
    /// sense that the daemon calls it once after construction.
    pub fn spawn_background_tasks(&self) {
        let monitor = SyncMonitor::new(
            self.lifecycle.clone(),
            self.chain.clone(),
            self.config.monitor.clone(),
        );
        tokio::spawn(monitor.run(self.cancel.child_token()));

        tokio::spawn(self.resources.clone().run(self.cancel.child_token()));

        let store = self.store.clone();
        let lifecycle = self.lifecycle.clone();
        let tick_secs = self.config.uptime_tick_secs;
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(tick_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately and would double-count
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if lifecycle.status().phase.is_active() {
                            if let Err(err) = store.add_uptime(tick_secs) {
                                tracing::warn!(error = %err, "failed to accumulate uptime");
                            }
                        }
                    }
                }
            }
        });
    }

    /// Stop all background loops
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_initialized(&self) -> bool {
        self.store.get().initialized
    }

    /// Probe the host for the orchestration engine and minimum RAM and disk
    pub async fn check_system_requirements(&self) -> SystemRequirements {
        let has_engine = self.engine.version().await.is_ok();
        let engine_running = has_engine && self.engine.ping().await.is_ok();
        let ram_gb = resources::total_memory_gb();
        let available_disk_gb = resources::available_disk_gb(&self.config.paths.data_dir);

        let mut missing = Vec::new();
        if !has_engine {
            missing.push("container engine is not installed".to_string());
        } else if !engine_running {
            missing.push("container engine daemon is not running".to_string());
        }
        if ram_gb < self.config.requirements.min_ram_gb {
            missing.push(format!(
                "{ram_gb}GB RAM available, {}GB required",
                self.config.requirements.min_ram_gb
            ));
        }
        if available_disk_gb < self.config.requirements.min_disk_gb {
            missing.push(format!(
                "{available_disk_gb}GB disk available, {}GB required",
                self.config.requirements.min_disk_gb
            ));
        }

        SystemRequirements {
            has_engine,
            engine_running,
            ram_gb,
            available_disk_gb,
            is_sufficient: missing.is_empty(),
            missing_requirements: missing,
        }
    }

    /// One-time setup: verify host requirements, acquire the snapshot, then
    /// durably mark the node initialized. Safe to re-run after a failure.
    pub async fn initialize(&self) -> NodeResult<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let requirements = self.check_system_requirements().await;
        if !requirements.is_sufficient {
            return Err(NodeError::State {
                message: format!(
                    "host does not meet requirements: {}",
                    requirements.missing_requirements.join("; ")
                ),
            });
        }

        self.download_snapshot().await?;
        self.store.mark_initialized()?;
        self.events.info("Node initialized", None);
        Ok(())
    }

    /// Download, verify and extract the configured snapshot. Resumes a
    /// matching partial download; a `Retryable` failure means call again.
    pub async fn download_snapshot(&self) -> NodeResult<()> {
        self.snapshot
            .acquire(&self.config.snapshot.url, &self.cancel.child_token())
            .await
    }

    pub fn subscribe_download_progress(&self) -> tokio::sync::broadcast::Receiver<f32> {
        self.snapshot.subscribe_progress()
    }

    pub async fn start_node(&self) -> NodeResult<NodeStatus> {
        self.lifecycle.start().await
    }

    pub async fn stop_node(&self) -> NodeResult<NodeStatus> {
        self.lifecycle.stop().await
    }

    pub async fn restart_node(&self) -> NodeResult<NodeStatus> {
        self.lifecycle.restart().await
    }

    /// Last-computed status snapshot; never blocks on external calls
    pub fn node_status(&self) -> NodeStatus {
        self.lifecycle.status()
    }

    pub fn subscribe_status(&self) -> tokio::sync::watch::Receiver<NodeStatus> {
        self.lifecycle.subscribe()
    }

    /// Most recent resource sample
    pub fn resource_usage(&self) -> ResourceUsage {
        self.resources.latest()
    }

    /// On-demand deep status: live engine and port probes plus the cached
    /// sync figures. Each probe degrades independently rather than failing
    /// the whole aggregate.
    pub async fn detailed_status(&self) -> DetailedStatus {
        let services = match self.engine.service_states().await {
            Ok(services) => services,
            Err(err) => {
                tracing::debug!(error = %err, "engine service query failed");
                Vec::new()
            }
        };

        let status = self.lifecycle.status();
        let rpc_reachable = port_reachable(self.config.chain.rpc_port).await;
        let p2p_reachable = port_reachable(self.config.chain.p2p_port).await;

        let data_dir = self.config.paths.data_dir.clone();
        let data_size = tokio::task::spawn_blocking(move || dir_size(&data_dir))
            .await
            .unwrap_or(0);

        let errors: Vec<LogEntry> = self
            .events
            .get_all()
            .into_iter()
            .filter(|entry| entry.level == LogLevel::Error)
            .collect();

        DetailedStatus {
            services,
            current_block: status.current_block,
            target_block: status.target_block,
            sync_percentage: status.sync_progress,
            connected_peers: status.peers_count,
            rpc_reachable,
            p2p_reachable,
            data_size: format_size(data_size),
            recent_error_count: errors.len(),
            last_error: errors.last().map(|entry| entry.message.clone()),
        }
    }

    /// Snapshot of the event buffer, oldest first
    pub fn logs(&self) -> Vec<LogEntry> {
        self.events.get_all()
    }

    pub fn clear_logs(&self) {
        self.events.clear();
    }

    pub fn subscribe_logs(&self) -> tokio::sync::broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }
}

/// TCP connect probe against localhost
async fn port_reachable(port: u16) -> bool {
    timeout(
        Duration::from_secs(2),
        TcpStream::connect(("127.0.0.1", port)),
    )
    .await
    .map(|r| r.is_ok())
    .unwrap_or(false)
}

/// Recursive byte count of a directory tree; unreadable entries count as zero
fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            match entry.metadata() {
                Ok(meta) if meta.is_dir() => dir_size(&path),
                Ok(meta) => meta.len(),
                Err(_) => 0,
            }
        })
        .sum()
}

fn format_size(bytes: u64) -> String {
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let bytes = bytes as f64;
    if bytes >= GB {
        format!("{:.1} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes / MB)
    } else {
        format!("{:.0} KB", bytes / 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_dir_size_counts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b"), vec![0u8; 50]).unwrap();
        assert_eq!(dir_size(dir.path()), 150);
    }

    #[tokio::test]
    async fn test_port_reachable_on_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_reachable(port).await);
    }
}
