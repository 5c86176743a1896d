//! Node query interface seam.
//!
//! Idempotent, side-effect-free reads of the running node's head block, the
//! trusted checkpoint's target block, and the peer count. `JsonRpcChain`
//! speaks the node's JSON-RPC; the trait exists so tests can substitute the
//! chain.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ChainConfig;
use crate::error::{NodeError, NodeResult};

/// Node query interface contract
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Height of the local node's head block
    async fn head_block(&self) -> NodeResult<u64>;

    /// Height of the trusted checkpoint (the catch-up target)
    async fn target_block(&self) -> NodeResult<u64>;

    /// Number of currently connected peers
    async fn peer_count(&self) -> NodeResult<u32>;
}

/// JSON-RPC client for the node's query interface
pub struct JsonRpcChain {
    client: reqwest::Client,
    rpc_url: String,
    checkpoint_url: String,
    timeout_secs: u64,
}

impl JsonRpcChain {
    pub fn new(config: &ChainConfig) -> NodeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| NodeError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
            checkpoint_url: config.checkpoint_url.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// POST a JSON-RPC call and return the raw result value
    async fn call(&self, url: &str, method: &str, operation: &str) -> NodeResult<serde_json::Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": {},
            "id": 1,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e, operation))?;

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.classify(e, operation))?;

        value
            .get("result")
            .cloned()
            .ok_or_else(|| NodeError::NetworkTransient {
                message: format!("{operation}: response carried no result"),
            })
    }

    fn classify(&self, err: reqwest::Error, operation: &str) -> NodeError {
        if err.is_timeout() {
            NodeError::Timeout {
                operation: operation.to_string(),
                seconds: self.timeout_secs,
            }
        } else {
            NodeError::NetworkTransient {
                message: format!("{operation}: {err}"),
            }
        }
    }
}

#[async_trait]
impl ChainQuery for JsonRpcChain {
    async fn head_block(&self) -> NodeResult<u64> {
        let result = self
            .call(&self.rpc_url, "chain.get_head_info", "head block query")
            .await?;
        parse_height(&result).ok_or_else(|| NodeError::NetworkTransient {
            message: "head block query: malformed head info response".to_string(),
        })
    }

    async fn target_block(&self) -> NodeResult<u64> {
        let result = self
            .call(
                &self.checkpoint_url,
                "chain.get_head_info",
                "checkpoint query",
            )
            .await?;
        parse_height(&result).ok_or_else(|| NodeError::NetworkTransient {
            message: "checkpoint query: malformed head info response".to_string(),
        })
    }

    async fn peer_count(&self) -> NodeResult<u32> {
        let result = self
            .call(&self.rpc_url, "p2p.get_peer_count", "peer count query")
            .await?;
        result
            .get("count")
            .and_then(|v| v.as_u64())
            .or_else(|| result.as_u64())
            .map(|n| n as u32)
            .ok_or_else(|| NodeError::NetworkTransient {
                message: "peer count query: malformed response".to_string(),
            })
    }
}

/// Extract a block height from a head-info result; nodes report the height
/// either as a decimal string or a bare number.
fn parse_height(result: &serde_json::Value) -> Option<u64> {
    let height = result.pointer("/head_topology/height")?;
    height
        .as_u64()
        .or_else(|| height.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_height_string_and_number() {
        let as_string = serde_json::json!({"head_topology": {"height": "43210"}});
        assert_eq!(parse_height(&as_string), Some(43_210));

        let as_number = serde_json::json!({"head_topology": {"height": 43210}});
        assert_eq!(parse_height(&as_number), Some(43_210));
    }

    #[test]
    fn test_parse_height_rejects_malformed() {
        assert_eq!(parse_height(&serde_json::json!({})), None);
        assert_eq!(
            parse_height(&serde_json::json!({"head_topology": {"height": "abc"}})),
            None
        );
    }
}
