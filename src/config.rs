//! Centralized application configuration.
//!
//! Single source of truth for paths, ports, tick intervals, timeouts and
//! thresholds, loaded from environment variables with sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default values for configuration
mod defaults {
    use std::path::PathBuf;

    fn home() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    // Paths
    pub fn data_dir() -> PathBuf {
        home().join(".chainhost")
    }
    pub fn stack_dir() -> PathBuf {
        home().join("chainhost-stack")
    }

    // Engine
    pub fn engine_profile() -> String {
        "all".to_string()
    }
    pub fn engine_call_timeout_secs() -> u64 {
        120
    }
    pub fn engine_up_timeout_secs() -> u64 {
        300
    }
    pub fn stop_grace_secs() -> u64 {
        30
    }

    // Chain query interface
    pub fn rpc_url() -> String {
        "http://127.0.0.1:8080".to_string()
    }
    pub fn checkpoint_url() -> String {
        "https://api.chainhost.example.com".to_string()
    }
    pub fn rpc_timeout_secs() -> u64 {
        5
    }
    pub fn rpc_port() -> u16 {
        8080
    }
    pub fn p2p_port() -> u16 {
        8888
    }

    // Sync monitor
    pub fn monitor_interval_secs() -> u64 {
        5
    }
    pub fn monitor_failure_threshold() -> u32 {
        3
    }
    pub fn starting_deadline_secs() -> u64 {
        300
    }

    // Snapshot acquisition
    pub fn snapshot_url() -> String {
        "https://snapshots.chainhost.example.com/latest.tar.gz".to_string()
    }
    pub fn progress_interval_secs() -> u64 {
        5
    }
    pub fn extract_timeout_secs() -> u64 {
        3600
    }

    // Resource sampler
    pub fn resource_interval_secs() -> u64 {
        10
    }

    // Host requirements
    pub fn min_ram_gb() -> u64 {
        4
    }
    pub fn min_disk_gb() -> u64 {
        60
    }

    // Event hub
    pub fn event_capacity() -> usize {
        1000
    }

    // Uptime accounting
    pub fn uptime_tick_secs() -> u64 {
        60
    }
}

/// Configuration load/validation failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Node data directory; holds chain data, persistent state and downloads
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding the stack's compose file
    #[serde(default = "defaults::stack_dir")]
    pub stack_dir: PathBuf,
}

impl PathsConfig {
    pub fn download_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }
}

/// Orchestration engine invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Compose profile selecting the named service set
    #[serde(default = "defaults::engine_profile")]
    pub profile: String,
    /// Timeout for ordinary engine calls (down, ps, version)
    #[serde(default = "defaults::engine_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Timeout for bringing the stack up (may pull images)
    #[serde(default = "defaults::engine_up_timeout_secs")]
    pub up_timeout_secs: u64,
    /// Grace period before a stop force-sets status to Stopped
    #[serde(default = "defaults::stop_grace_secs")]
    pub stop_grace_secs: u64,
}

/// Node query interface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Local JSON-RPC endpoint of the running node
    #[serde(default = "defaults::rpc_url")]
    pub rpc_url: String,
    /// Trusted checkpoint endpoint used to determine the target block
    #[serde(default = "defaults::checkpoint_url")]
    pub checkpoint_url: String,
    #[serde(default = "defaults::rpc_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "defaults::rpc_port")]
    pub rpc_port: u16,
    #[serde(default = "defaults::p2p_port")]
    pub p2p_port: u16,
}

/// Sync monitor cadence and failure tolerance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "defaults::monitor_interval_secs")]
    pub interval_secs: u64,
    /// Consecutive transient failures tolerated before escalating to Error
    #[serde(default = "defaults::monitor_failure_threshold")]
    pub failure_threshold: u32,
    /// Bound on how long the stack may sit in Starting before Error
    #[serde(default = "defaults::starting_deadline_secs")]
    pub starting_deadline_secs: u64,
}

/// Snapshot acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "defaults::snapshot_url")]
    pub url: String,
    /// Expected SHA-256 of the archive, when the provider publishes one
    #[serde(default)]
    pub expected_sha256: Option<String>,
    /// Minimum spacing between progress notifications and resume checkpoints
    #[serde(default = "defaults::progress_interval_secs")]
    pub progress_interval_secs: u64,
    #[serde(default = "defaults::extract_timeout_secs")]
    pub extract_timeout_secs: u64,
}

/// Resource sampler cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default = "defaults::resource_interval_secs")]
    pub interval_secs: u64,
}

/// Minimum host capabilities checked before setup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementsConfig {
    #[serde(default = "defaults::min_ram_gb")]
    pub min_ram_gb: u64,
    #[serde(default = "defaults::min_disk_gb")]
    pub min_disk_gb: u64,
}

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub engine: EngineConfig,
    pub chain: ChainConfig,
    pub monitor: MonitorConfig,
    pub snapshot: SnapshotConfig,
    pub resources: ResourcesConfig,
    pub requirements: RequirementsConfig,
    #[serde(default = "defaults::event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "defaults::uptime_tick_secs")]
    pub uptime_tick_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                data_dir: defaults::data_dir(),
                stack_dir: defaults::stack_dir(),
            },
            engine: EngineConfig {
                profile: defaults::engine_profile(),
                call_timeout_secs: defaults::engine_call_timeout_secs(),
                up_timeout_secs: defaults::engine_up_timeout_secs(),
                stop_grace_secs: defaults::stop_grace_secs(),
            },
            chain: ChainConfig {
                rpc_url: defaults::rpc_url(),
                checkpoint_url: defaults::checkpoint_url(),
                request_timeout_secs: defaults::rpc_timeout_secs(),
                rpc_port: defaults::rpc_port(),
                p2p_port: defaults::p2p_port(),
            },
            monitor: MonitorConfig {
                interval_secs: defaults::monitor_interval_secs(),
                failure_threshold: defaults::monitor_failure_threshold(),
                starting_deadline_secs: defaults::starting_deadline_secs(),
            },
            snapshot: SnapshotConfig {
                url: defaults::snapshot_url(),
                expected_sha256: None,
                progress_interval_secs: defaults::progress_interval_secs(),
                extract_timeout_secs: defaults::extract_timeout_secs(),
            },
            resources: ResourcesConfig {
                interval_secs: defaults::resource_interval_secs(),
            },
            requirements: RequirementsConfig {
                min_ram_gb: defaults::min_ram_gb(),
                min_disk_gb: defaults::min_disk_gb(),
            },
            event_capacity: defaults::event_capacity(),
            uptime_tick_secs: defaults::uptime_tick_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables over defaults
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CHAINHOST_DATA_DIR") {
            config.paths.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CHAINHOST_STACK_DIR") {
            config.paths.stack_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("CHAINHOST_RPC_URL") {
            config.chain.rpc_url = url;
        }
        if let Ok(url) = std::env::var("CHAINHOST_CHECKPOINT_URL") {
            config.chain.checkpoint_url = url;
        }
        if let Ok(url) = std::env::var("CHAINHOST_SNAPSHOT_URL") {
            config.snapshot.url = url;
        }
        if let Ok(sha) = std::env::var("CHAINHOST_SNAPSHOT_SHA256") {
            config.snapshot.expected_sha256 = Some(sha);
        }
        if let Ok(secs) = std::env::var("CHAINHOST_MONITOR_INTERVAL_SECS") {
            config.monitor.interval_secs = parse_env("CHAINHOST_MONITOR_INTERVAL_SECS", &secs)?;
        }
        if let Ok(profile) = std::env::var("CHAINHOST_ENGINE_PROFILE") {
            config.engine.profile = profile;
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
