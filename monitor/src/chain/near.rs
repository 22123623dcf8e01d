//! NEAR JSON-RPC client.

use async_trait::async_trait;
use common::AccountId;
use serde_json::{json, Value};

use super::{call, AccountView, ChainError, NearRpc};

pub struct NearJsonRpc {
    client: reqwest::Client,
    node_url: String,
}

impl NearJsonRpc {
    pub fn new(node_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), node_url: node_url.into() }
    }

    async fn query(&self, params: Value) -> Result<Value, ChainError> {
        let result = call(&self.client, &self.node_url, "query", params).await?;
        // Older nodes report query failures inside `result`
        if let Some(err) = result.get("error").and_then(Value::as_str) {
            return Err(ChainError::Rpc { code: 0, message: err.to_string() });
        }
        Ok(result)
    }
}

#[async_trait]
impl NearRpc for NearJsonRpc {
    async fn final_block_height(&self) -> Result<u64, ChainError> {
        let result = call(&self.client, &self.node_url, "block", json!({"finality": "final"})).await?;
        parse_block_height(&result)
    }

    async fn view_account(&self, account: &AccountId) -> Result<AccountView, ChainError> {
        let result = self
            .query(json!({
                "request_type": "view_account",
                "finality": "final",
                "account_id": account.as_str(),
            }))
            .await?;
        parse_account_view(&result)
    }

    async fn call_view(&self, contract: &AccountId, method: &str) -> Result<Vec<u8>, ChainError> {
        let result = self
            .query(json!({
                "request_type": "call_function",
                "finality": "optimistic",
                "account_id": contract.as_str(),
                "method_name": method,
                "args_base64": "",
            }))
            .await?;
        parse_call_result(&result)
    }
}

pub(crate) fn parse_block_height(result: &Value) -> Result<u64, ChainError> {
    result["header"]["height"]
        .as_u64()
        .ok_or_else(|| ChainError::Malformed("block without `header.height`".into()))
}

pub(crate) fn parse_account_view(result: &Value) -> Result<AccountView, ChainError> {
    let amount = result["amount"]
        .as_str()
        .ok_or_else(|| ChainError::Malformed("account view without `amount`".into()))?
        .parse::<u128>()
        .map_err(|e| ChainError::Malformed(format!("account amount: {e}")))?;
    let storage_usage = result["storage_usage"]
        .as_u64()
        .ok_or_else(|| ChainError::Malformed("account view without `storage_usage`".into()))?;
    Ok(AccountView { amount, storage_usage })
}

pub(crate) fn parse_call_result(result: &Value) -> Result<Vec<u8>, ChainError> {
    let bytes = result["result"]
        .as_array()
        .ok_or_else(|| ChainError::Malformed("call_function without `result` bytes".into()))?;
    bytes
        .iter()
        .map(|b| {
            b.as_u64()
                .and_then(|b| u8::try_from(b).ok())
                .ok_or_else(|| ChainError::Malformed(format!("`{b}` is not a byte")))
        })
        .collect()
}
