//! Shared test doubles: a scriptable orchestration engine and chain client,
//! plus a harness wiring them into a real lifecycle controller and monitor.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use chainhost::config::{EngineConfig, MonitorConfig};
use chainhost::{
    ChainQuery, EventHub, LifecycleController, NodeError, NodeResult, OrchestrationEngine,
    ServiceState, StateStore, SyncMonitor,
};

/// Engine double counting invocations, with injectable failures and hangs
#[derive(Default)]
pub struct MockEngine {
    pub up_calls: AtomicU32,
    pub down_calls: AtomicU32,
    pub fail_up_with: Mutex<Option<String>>,
    pub hang_on_down: AtomicBool,
    pub services: Mutex<Vec<ServiceState>>,
}

#[async_trait]
impl OrchestrationEngine for MockEngine {
    async fn up(&self) -> NodeResult<()> {
        self.up_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_up_with.lock().clone() {
            return Err(NodeError::EngineFailure { message });
        }
        Ok(())
    }

    async fn down(&self) -> NodeResult<()> {
        self.down_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_down.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn service_states(&self) -> NodeResult<Vec<ServiceState>> {
        Ok(self.services.lock().clone())
    }

    async fn version(&self) -> NodeResult<String> {
        Ok("mock engine 1.0".to_string())
    }

    async fn ping(&self) -> NodeResult<()> {
        Ok(())
    }
}

/// What the chain double reports on the next poll
#[derive(Clone)]
pub enum ChainPlan {
    Healthy { head: u64, target: u64, peers: u32 },
    Unreachable,
}

pub struct MockChain {
    plan: Mutex<ChainPlan>,
}

impl MockChain {
    pub fn new(plan: ChainPlan) -> Self {
        Self {
            plan: Mutex::new(plan),
        }
    }

    pub fn set(&self, plan: ChainPlan) {
        *self.plan.lock() = plan;
    }

    fn refused() -> NodeError {
        NodeError::NetworkTransient {
            message: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl ChainQuery for MockChain {
    async fn head_block(&self) -> NodeResult<u64> {
        match self.plan.lock().clone() {
            ChainPlan::Healthy { head, .. } => Ok(head),
            ChainPlan::Unreachable => Err(Self::refused()),
        }
    }

    async fn target_block(&self) -> NodeResult<u64> {
        match self.plan.lock().clone() {
            ChainPlan::Healthy { target, .. } => Ok(target),
            ChainPlan::Unreachable => Err(Self::refused()),
        }
    }

    async fn peer_count(&self) -> NodeResult<u32> {
        match self.plan.lock().clone() {
            ChainPlan::Healthy { peers, .. } => Ok(peers),
            ChainPlan::Unreachable => Err(Self::refused()),
        }
    }
}

/// Lifecycle controller and monitor over mock externals and a tempdir store
pub struct Harness {
    pub lifecycle: Arc<LifecycleController>,
    pub monitor: SyncMonitor,
    pub engine: Arc<MockEngine>,
    pub chain: Arc<MockChain>,
    pub store: Arc<StateStore>,
    pub events: Arc<EventHub>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(initialized: bool, stop_grace_secs: u64) -> Self {
        Self::with_starting_deadline(initialized, stop_grace_secs, 300)
    }

    pub fn with_starting_deadline(
        initialized: bool,
        stop_grace_secs: u64,
        starting_deadline_secs: u64,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path()).unwrap());
        if initialized {
            store.mark_initialized().unwrap();
        }

        let engine = Arc::new(MockEngine::default());
        let chain = Arc::new(MockChain::new(ChainPlan::Unreachable));
        let events = Arc::new(EventHub::new(100));

        let engine_config = EngineConfig {
            profile: "all".to_string(),
            call_timeout_secs: 5,
            up_timeout_secs: 5,
            stop_grace_secs,
        };
        let lifecycle = Arc::new(LifecycleController::new(
            engine.clone(),
            events.clone(),
            store.clone(),
            &engine_config,
        ));

        let monitor_config = MonitorConfig {
            interval_secs: 1,
            failure_threshold: 3,
            starting_deadline_secs,
        };
        let monitor = SyncMonitor::new(lifecycle.clone(), chain.clone(), monitor_config);

        Self {
            lifecycle,
            monitor,
            engine,
            chain,
            store,
            events,
            _dir: dir,
        }
    }
}
