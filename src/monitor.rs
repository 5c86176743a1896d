//! Synchronization monitor.
//!
//! Polls the node's query interface on a fixed interval while the stack is
//! starting, syncing or running, and feeds samples into the lifecycle
//! controller. Transient failures are tolerated up to a consecutive-failure
//! threshold (the service is likely still booting); beyond it the status
//! escalates to Error carrying the last underlying error text.

use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::chain::ChainQuery;
use crate::config::MonitorConfig;
use crate::error::NodeResult;
use crate::lifecycle::LifecycleController;

pub struct SyncMonitor {
    lifecycle: Arc<LifecycleController>,
    chain: Arc<dyn ChainQuery>,
    config: MonitorConfig,
    consecutive_failures: u32,
}

impl SyncMonitor {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        chain: Arc<dyn ChainQuery>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            lifecycle,
            chain,
            config,
            consecutive_failures: 0,
        }
    }

    /// Run the polling loop until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("sync monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// One monitor tick. Public so tests can drive the monitor directly.
    pub async fn poll_once(&mut self) {
        let status = self.lifecycle.status();
        if !status.phase.is_active() {
            self.consecutive_failures = 0;
            return;
        }

        if status.phase == crate::types::NodePhase::Starting {
            if let Some(since) = self.lifecycle.starting_since() {
                if since.elapsed() > Duration::from_secs(self.config.starting_deadline_secs) {
                    self.lifecycle.escalate_error(format!(
                        "stack stuck in starting state for over {}s",
                        self.config.starting_deadline_secs
                    ));
                    return;
                }
            }
        }

        match self.sample().await {
            Ok((head, peers)) => {
                self.consecutive_failures = 0;
                // Target is best-effort; a failed checkpoint read reuses the
                // last known target instead of counting as a tick failure.
                let target = self.chain.target_block().await.ok();
                self.lifecycle.apply_sync_sample(head, target, peers);
            }
            Err(err) if err.is_retryable() => {
                self.consecutive_failures += 1;
                tracing::debug!(
                    error = %err,
                    failures = self.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "transient poll failure"
                );
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.lifecycle.escalate_error(err.to_string());
                    self.consecutive_failures = 0;
                }
            }
            Err(err) => {
                self.lifecycle.escalate_error(err.to_string());
                self.consecutive_failures = 0;
            }
        }
    }

    async fn sample(&self) -> NodeResult<(u64, u32)> {
        let head = self.chain.head_block().await?;
        let peers = self.chain.peer_count().await?;
        Ok((head, peers))
    }
}
