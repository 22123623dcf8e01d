//! Ethereum JSON-RPC client.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{call, ChainError, EthRpc};

pub struct EthJsonRpc {
    client: reqwest::Client,
    rpc_url: String,
}

impl EthJsonRpc {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), rpc_url: rpc_url.into() }
    }
}

#[async_trait]
impl EthRpc for EthJsonRpc {
    async fn latest_block_number(&self) -> Result<u64, ChainError> {
        let block = call(
            &self.client,
            &self.rpc_url,
            "eth_getBlockByNumber",
            json!(["latest", false]),
        )
        .await?;
        parse_block_number(&block)
    }
}

pub(crate) fn parse_block_number(block: &Value) -> Result<u64, ChainError> {
    if block.is_null() {
        return Err(ChainError::Malformed("node returned no latest block".into()));
    }
    let number = block["number"]
        .as_str()
        .ok_or_else(|| ChainError::Malformed("block without `number`".into()))?;
    parse_quantity(number)
}

/// Decode a hex `QUANTITY` such as `0x1b4`.
pub(crate) fn parse_quantity(quantity: &str) -> Result<u64, ChainError> {
    let digits = quantity
        .strip_prefix("0x")
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ChainError::Malformed(format!("`{quantity}` is not a hex quantity")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Malformed(format!("`{quantity}`: {e}")))
}
