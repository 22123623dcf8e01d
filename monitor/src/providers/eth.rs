//! Ethereum-side providers.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::{MetricProvider, ProviderContext};
use crate::chain::EthRpc;
use crate::metrics::{GaugeHandle, SinkError};

/// Height of the Ethereum chain (`latest` block).
pub struct EthChainBlock {
    eth: Arc<dyn EthRpc>,
    height: GaugeHandle,
}

impl EthChainBlock {
    pub const NAME: &'static str = "eth_chain_block";

    pub fn register(ctx: &ProviderContext) -> Result<Self, SinkError> {
        Ok(Self {
            eth: Arc::clone(&ctx.eth),
            height: ctx.sink.gauge("eth_chain_block", "Ethereum chain height")?,
        })
    }
}

#[async_trait]
impl MetricProvider for EthChainBlock {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn gauges(&self) -> Vec<GaugeHandle> {
        vec![self.height.clone()]
    }

    async fn sample(&self) -> Result<()> {
        let number = self.eth.latest_block_number().await?;
        self.height.set(number as f64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{context, MockEth, MockNear};

    #[tokio::test]
    async fn test_eth_chain_block() {
        let eth = Arc::new(MockEth::default());
        let ctx = context(Arc::new(MockNear::default()), Arc::clone(&eth));
        let provider = EthChainBlock::register(&ctx).unwrap();

        *eth.block.lock().unwrap() = Some(19_000_000);
        provider.sample().await.unwrap();
        assert_eq!(provider.gauges()[0].get(), Some(19_000_000.0));
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_value() {
        let eth = Arc::new(MockEth::default());
        let ctx = context(Arc::new(MockNear::default()), Arc::clone(&eth));
        let provider = EthChainBlock::register(&ctx).unwrap();

        *eth.block.lock().unwrap() = Some(10);
        provider.sample().await.unwrap();
        *eth.block.lock().unwrap() = None;

        let err = provider.sample().await.unwrap_err();
        assert!(err.to_string().contains("no latest block"));
        assert_eq!(ctx.sink.snapshot()[0].value, Some(10.0));
    }
}
