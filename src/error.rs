//! Error taxonomy for node stack operations.
//!
//! Every externally surfaced error carries a human-readable message and a
//! distinguishable kind so callers can decide whether a retry action should
//! be offered.

use thiserror::Error;

/// Result type for node stack operations
pub type NodeResult<T> = Result<T, NodeError>;

/// Main error type for the node stack coordinator
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// Setup has not completed; the stack directory or state marker is missing
    #[error("node stack is not initialized, run setup first")]
    NotInitialized,

    /// The orchestration engine call failed; message is the engine's raw output
    #[error("orchestration engine failed: {message}")]
    EngineFailure { message: String },

    /// Connectivity failure; absorbed locally with bounded retry before surfacing
    #[error("network error: {message}")]
    NetworkTransient { message: String },

    /// A bounded external call exceeded its deadline
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// Downloaded or extracted data failed verification; partial data discarded
    #[error("snapshot data failed verification: {reason}")]
    Corrupt { reason: String },

    /// Download interrupted but resumable by re-invoking with the same URL
    #[error("download interrupted at {bytes_downloaded} bytes: {message}")]
    Retryable {
        bytes_downloaded: u64,
        message: String,
    },

    /// Persistent state could not be read or durably written
    #[error("state persistence failed: {message}")]
    State { message: String },

    /// Configuration value missing or malformed
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl NodeError {
    /// Stable machine-readable code for this error kind
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::NotInitialized => "NOT_INITIALIZED",
            NodeError::EngineFailure { .. } => "ENGINE_FAILURE",
            NodeError::NetworkTransient { .. } => "NETWORK_TRANSIENT",
            NodeError::Timeout { .. } => "TIMEOUT",
            NodeError::Corrupt { .. } => "CORRUPT",
            NodeError::Retryable { .. } => "RETRYABLE",
            NodeError::State { .. } => "STATE",
            NodeError::Config { .. } => "CONFIG",
        }
    }

    /// Whether re-invoking the failed operation may succeed without user action.
    ///
    /// Engine and corruption failures are never silently retried; they require
    /// an explicit user-triggered retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NodeError::NetworkTransient { .. }
                | NodeError::Timeout { .. }
                | NodeError::Retryable { .. }
        )
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::State {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::State {
            message: err.to_string(),
        }
    }
}
