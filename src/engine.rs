//! Orchestration engine seam.
//!
//! The lifecycle controller delegates container operations to an engine
//! exposing declarative up/down over a fixed named-service set plus
//! per-service running/exited queries. `ComposeEngine` shells out to
//! `docker compose`; the trait exists so tests can substitute the engine.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::EngineConfig;
use crate::error::{NodeError, NodeResult};
use crate::types::ServiceState;

/// External orchestration engine contract
#[async_trait]
pub trait OrchestrationEngine: Send + Sync {
    /// Bring the service stack up (detached)
    async fn up(&self) -> NodeResult<()>;

    /// Tear the service stack down
    async fn down(&self) -> NodeResult<()>;

    /// Per-service running/exited flags
    async fn service_states(&self) -> NodeResult<Vec<ServiceState>>;

    /// Engine version string; fails when the engine is not installed
    async fn version(&self) -> NodeResult<String>;

    /// Check that the engine daemon is reachable
    async fn ping(&self) -> NodeResult<()>;
}

/// `docker compose` engine over a compose directory
pub struct ComposeEngine {
    stack_dir: PathBuf,
    profile: String,
    call_timeout: Duration,
    up_timeout: Duration,
}

impl ComposeEngine {
    pub fn new(stack_dir: PathBuf, config: &EngineConfig) -> Self {
        Self {
            stack_dir,
            profile: config.profile.clone(),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            up_timeout: Duration::from_secs(config.up_timeout_secs),
        }
    }

    /// Resolve a working compose invocation, preferring the `docker compose`
    /// plugin and falling back to the standalone `docker-compose` binary.
    async fn invocation(&self) -> NodeResult<(String, Vec<String>)> {
        if probe("docker", &["compose", "version"]).await {
            return Ok(("docker".to_string(), vec!["compose".to_string()]));
        }
        if probe("docker-compose", &["--version"]).await {
            return Ok(("docker-compose".to_string(), Vec::new()));
        }
        Err(NodeError::EngineFailure {
            message: "neither 'docker compose' nor 'docker-compose' is available".to_string(),
        })
    }

    /// Run a compose subcommand in the stack directory, capturing raw output
    async fn compose(&self, args: &[&str], deadline: Duration) -> NodeResult<String> {
        let (program, mut full_args) = self.invocation().await?;
        full_args.extend(args.iter().map(|s| s.to_string()));

        let operation = format!("{program} {}", full_args.join(" "));
        tracing::debug!(command = %operation, "invoking orchestration engine");

        let output = timeout(
            deadline,
            Command::new(&program)
                .args(&full_args)
                .current_dir(&self.stack_dir)
                .output(),
        )
        .await
        .map_err(|_| NodeError::Timeout {
            operation,
            seconds: deadline.as_secs(),
        })?
        .map_err(|e| NodeError::EngineFailure {
            message: format!("failed to invoke {program}: {e}"),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(NodeError::EngineFailure { message: stderr });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl OrchestrationEngine for ComposeEngine {
    async fn up(&self) -> NodeResult<()> {
        self.compose(
            &["--profile", &self.profile, "up", "-d"],
            self.up_timeout,
        )
        .await?;
        Ok(())
    }

    async fn down(&self) -> NodeResult<()> {
        self.compose(&["--profile", &self.profile, "down"], self.call_timeout)
            .await?;
        Ok(())
    }

    async fn service_states(&self) -> NodeResult<Vec<ServiceState>> {
        let stdout = self
            .compose(&["ps", "--all", "--format", "json"], self.call_timeout)
            .await?;

        // Compose emits one JSON object per line
        let mut states = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let value: serde_json::Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable engine ps line");
                    continue;
                }
            };
            let name = value
                .get("Service")
                .or_else(|| value.get("Name"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if name.is_empty() {
                continue;
            }
            let running = value
                .get("State")
                .and_then(|v| v.as_str())
                .map(|s| s.eq_ignore_ascii_case("running"))
                .unwrap_or(false);
            states.push(ServiceState { name, running });
        }
        Ok(states)
    }

    async fn version(&self) -> NodeResult<String> {
        let output = timeout(
            Duration::from_secs(10),
            Command::new("docker").arg("--version").output(),
        )
        .await
        .map_err(|_| NodeError::Timeout {
            operation: "docker --version".to_string(),
            seconds: 10,
        })?
        .map_err(|e| NodeError::EngineFailure {
            message: format!("docker not found: {e}"),
        })?;

        if !output.status.success() {
            return Err(NodeError::EngineFailure {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn ping(&self) -> NodeResult<()> {
        let output = timeout(
            Duration::from_secs(10),
            Command::new("docker").arg("info").output(),
        )
        .await
        .map_err(|_| NodeError::Timeout {
            operation: "docker info".to_string(),
            seconds: 10,
        })?
        .map_err(|e| NodeError::EngineFailure {
            message: format!("docker not found: {e}"),
        })?;

        if !output.status.success() {
            return Err(NodeError::EngineFailure {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Check whether `program args` runs and exits successfully
async fn probe(program: &str, args: &[&str]) -> bool {
    let status = Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    matches!(timeout(Duration::from_secs(10), status).await, Ok(Ok(s)) if s.success())
}
