//! Single-host coordinator for a multi-service blockchain node stack.
//!
//! The stack itself runs under an external orchestration engine (docker
//! compose); this crate owns everything around it: lifecycle control with an
//! explicit phase machine, sync monitoring against the node's query
//! interface, resumable snapshot acquisition, host resource telemetry, a
//! bounded event hub and a durable state store.

pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod monitor;
pub mod resources;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod types;

pub use chain::{ChainQuery, JsonRpcChain};
pub use config::AppConfig;
pub use engine::{ComposeEngine, OrchestrationEngine};
pub use error::{NodeError, NodeResult};
pub use events::{EventHub, LogEntry, LogEvent, LogLevel};
pub use lifecycle::LifecycleController;
pub use monitor::SyncMonitor;
pub use resources::ResourceSampler;
pub use service::NodeService;
pub use snapshot::SnapshotAcquirer;
pub use store::{DownloadState, PersistentState, StateStore};
pub use types::{
    DetailedStatus, NodePhase, NodeStatus, ResourceUsage, ServiceState, SystemRequirements,
};
