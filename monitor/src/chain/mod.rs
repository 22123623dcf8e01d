//! JSON-RPC clients for the two chains the bridge connects.
//!
//! Providers only see the [`NearRpc`] and [`EthRpc`] traits, so tests can
//! swap in canned responses without a network.

use async_trait::async_trait;
use common::AccountId;
use serde_json::{json, Value};
use thiserror::Error;

pub mod eth;
pub mod near;

pub use eth::EthJsonRpc;
pub use near::NearJsonRpc;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Account state as reported by `view_account`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountView {
    /// Liquid balance in yoctoNEAR.
    pub amount: u128,
    pub storage_usage: u64,
}

#[async_trait]
pub trait NearRpc: Send + Sync {
    /// Height of the latest final block.
    async fn final_block_height(&self) -> Result<u64, ChainError>;

    async fn view_account(&self, account: &AccountId) -> Result<AccountView, ChainError>;

    /// Call a view method without arguments and return the raw result bytes.
    async fn call_view(&self, contract: &AccountId, method: &str) -> Result<Vec<u8>, ChainError>;
}

#[async_trait]
pub trait EthRpc: Send + Sync {
    /// Number of the `latest` block.
    async fn latest_block_number(&self) -> Result<u64, ChainError>;
}

// ── JSON-RPC plumbing ───────────────────────────────────────────────

pub(crate) async fn call(
    client: &reqwest::Client,
    endpoint: &str,
    method: &str,
    params: Value,
) -> Result<Value, ChainError> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": "bridge-monitor",
        "method": method,
        "params": params,
    });

    let transport = |source| ChainError::Transport {
        endpoint: endpoint.to_string(),
        source,
    };

    let resp = client.post(endpoint).json(&body).send().await.map_err(transport)?;
    if !resp.status().is_success() {
        return Err(ChainError::Status {
            endpoint: endpoint.to_string(),
            status: resp.status().as_u16(),
        });
    }

    let payload: Value = resp.json().await.map_err(transport)?;
    extract_result(payload)
}

/// Pull `result` out of a JSON-RPC envelope, mapping `error` objects.
pub(crate) fn extract_result(mut payload: Value) -> Result<Value, ChainError> {
    if let Some(err) = payload.get("error").filter(|e| !e.is_null()) {
        let code = err["code"].as_i64().unwrap_or(0);
        let mut message = err["message"].as_str().unwrap_or("unknown error").to_string();
        if let Some(data) = err["data"].as_str() {
            message = format!("{message}: {data}");
        }
        return Err(ChainError::Rpc { code, message });
    }

    match payload.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(ChainError::Malformed("missing `result` field".into())),
    }
}
