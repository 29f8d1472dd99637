//! HTTP JSON-RPC client for Hive API nodes, backed by `reqwest`.
//!
//! Features:
//! - Per-request timeout
//! - Retry with exponential backoff for transient errors
//! - Failover across a list of nodes, sticking to the last healthy one

pub mod parse;
pub mod retry;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use chainfeed_core::error::FeedError;

use crate::transport::{BulkBlock, FullBlock, IdentifiedOperation, LedgerTransport};
pub use retry::{RetryConfig, RetryPolicy};

/// Public API nodes used when none are configured.
pub const DEFAULT_NODES: &[&str] = &["https://api.hive.blog", "https://api.deathstar.name"];

// ─── Wire types ──────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request. Hive accepts array params for `condenser_api`
/// and object params for `block_api`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Configuration for [`HiveRpcClient`].
#[derive(Debug, Clone)]
pub struct HiveRpcConfig {
    pub nodes: Vec<String>,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for HiveRpcConfig {
    fn default() -> Self {
        Self {
            nodes: DEFAULT_NODES.iter().map(|s| s.to_string()).collect(),
            request_timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
        }
    }
}

/// Hive ledger transport over JSON-RPC.
pub struct HiveRpcClient {
    nodes: Vec<String>,
    http: reqwest::Client,
    retry: RetryPolicy,
    request_timeout: Duration,
    /// Index of the node that last answered.
    preferred: AtomicUsize,
    next_id: AtomicU64,
}

impl HiveRpcClient {
    pub fn new(config: HiveRpcConfig) -> Result<Self, FeedError> {
        if config.nodes.is_empty() {
            return Err(FeedError::Config("at least one API node is required".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FeedError::Config(format!("http client: {e}")))?;

        Ok(Self {
            nodes: config.nodes,
            http,
            retry: RetryPolicy::new(config.retry),
            request_timeout: config.request_timeout,
            preferred: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    /// Client for the given nodes with default timeouts.
    pub fn with_nodes<I, S>(nodes: I) -> Result<Self, FeedError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(HiveRpcConfig {
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Default::default()
        })
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn map_reqwest(&self, e: reqwest::Error) -> FeedError {
        if e.is_timeout() {
            FeedError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else if e.is_decode() {
            FeedError::Decode(e.to_string())
        } else {
            FeedError::Rpc(e.to_string())
        }
    }

    async fn send_once(&self, url: &str, req: &JsonRpcRequest) -> Result<Value, FeedError> {
        let resp = self
            .http
            .post(url)
            .json(req)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            return Err(FeedError::Rpc(format!("HTTP {status} from {url}")));
        }

        let body: JsonRpcResponse = resp.json().await.map_err(|e| self.map_reqwest(e))?;
        if let Some(err) = body.error {
            return Err(FeedError::Rpc(format!(
                "{} error {}: {}",
                req.method, err.code, err.message
            )));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    /// One node, with retries.
    async fn send_with_retry(&self, url: &str, req: &JsonRpcRequest) -> Result<Value, FeedError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(url, req).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            url,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Call `method` on the preferred node, failing over to the others.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, FeedError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let start = self.preferred.load(Ordering::Relaxed) % self.nodes.len();

        let mut last_err = None;
        for offset in 0..self.nodes.len() {
            let idx = (start + offset) % self.nodes.len();
            let url = &self.nodes[idx];
            match self.send_with_retry(url, &req).await {
                Ok(result) => {
                    if idx != start {
                        debug!(url, "switched API node");
                        self.preferred.store(idx, Ordering::Relaxed);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    warn!(url, method, error = %e, "node failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| FeedError::Rpc("no nodes configured".into())))
    }
}

#[async_trait]
impl LedgerTransport for HiveRpcClient {
    async fn head_block_number(&self) -> Result<u64, FeedError> {
        let result = self
            .call("condenser_api.get_dynamic_global_properties", json!([]))
            .await?;
        parse::head_block(&result)
    }

    async fn get_block(&self, number: u64) -> Result<Option<FullBlock>, FeedError> {
        let result = self.call("condenser_api.get_block", json!([number])).await?;
        parse::full_block(number, &result)
    }

    async fn get_bulk_window(&self, start: u64, count: u64) -> Result<Vec<BulkBlock>, FeedError> {
        let result = self
            .call(
                "block_api.get_block_range",
                json!({"starting_block_num": start, "count": count}),
            )
            .await?;
        parse::bulk_window(start, &result)
    }

    async fn get_ops_with_identifiers(
        &self,
        number: u64,
    ) -> Result<Vec<IdentifiedOperation>, FeedError> {
        let result = self
            .call("condenser_api.get_ops_in_block", json!([number, false]))
            .await?;
        parse::ops_in_block(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_as_jsonrpc() {
        let req = JsonRpcRequest::new(7, "condenser_api.get_block", json!([100]));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], 7);
        assert_eq!(v["params"], json!([100]));
    }

    #[test]
    fn error_response_deserializes() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom"}}"#)
                .unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -32000);
    }

    #[test]
    fn empty_node_list_is_config_error() {
        let err = HiveRpcClient::with_nodes(Vec::<String>::new()).err().unwrap();
        assert!(err.is_fatal());
    }
}
