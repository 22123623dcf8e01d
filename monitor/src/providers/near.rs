//! NEAR-side providers: chain height, account balances and the Ethereum
//! light client height stored on NEAR.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use common::AccountId;
use std::sync::Arc;

use super::{MetricProvider, ProviderContext};
use crate::chain::NearRpc;
use crate::metrics::{GaugeHandle, SinkError};

/// yoctoNEAR per nanoNEAR.
const YOCTO_PER_NANO: u128 = 1_000_000_000_000_000;

// ── Chain height ────────────────────────────────────────────────────

pub struct NearChainBlock {
    near: Arc<dyn NearRpc>,
    height: GaugeHandle,
}

impl NearChainBlock {
    pub const NAME: &'static str = "near_chain_block";

    pub fn register(ctx: &ProviderContext) -> Result<Self, SinkError> {
        Ok(Self {
            near: Arc::clone(&ctx.near),
            height: ctx.sink.gauge("near_chain_block", "NEAR chain height")?,
        })
    }
}

#[async_trait]
impl MetricProvider for NearChainBlock {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn gauges(&self) -> Vec<GaugeHandle> {
        vec![self.height.clone()]
    }

    async fn sample(&self) -> Result<()> {
        let height = self.near.final_block_height().await?;
        self.height.set(height as f64);
        Ok(())
    }
}

// ── Account info ────────────────────────────────────────────────────

/// Balance (nanoNEAR) and storage usage (bytes) of one account.
///
/// Gauges are named after `label`, so the same provider type can watch
/// several accounts: `<label>_nano_near` and `<label>_bytes`.
pub struct NearAccountInfo {
    name: String,
    near: Arc<dyn NearRpc>,
    account: AccountId,
    balance: GaugeHandle,
    storage: GaugeHandle,
}

impl NearAccountInfo {
    pub fn register(ctx: &ProviderContext, account: AccountId, label: &str) -> Result<Self, SinkError> {
        let balance = ctx.sink.gauge(
            &format!("{label}_nano_near"),
            &format!("Balance of {label} account in nanoNEAR"),
        )?;
        let storage = ctx.sink.gauge(
            &format!("{label}_bytes"),
            &format!("Storage used by {label} account in bytes"),
        )?;

        Ok(Self {
            name: format!("{label}_account"),
            near: Arc::clone(&ctx.near),
            account,
            balance,
            storage,
        })
    }
}

#[async_trait]
impl MetricProvider for NearAccountInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn gauges(&self) -> Vec<GaugeHandle> {
        vec![self.balance.clone(), self.storage.clone()]
    }

    async fn sample(&self) -> Result<()> {
        let view = self
            .near
            .view_account(&self.account)
            .await
            .with_context(|| format!("view_account {}", self.account))?;

        self.balance.set((view.amount / YOCTO_PER_NANO) as f64);
        self.storage.set(view.storage_usage as f64);
        Ok(())
    }
}

// ── Ethereum client on NEAR ─────────────────────────────────────────

/// Last Ethereum block number known to the light client contract on NEAR.
pub struct EthClientOnNear {
    near: Arc<dyn NearRpc>,
    client: AccountId,
    height: GaugeHandle,
}

impl EthClientOnNear {
    pub const NAME: &'static str = "eth_client_on_near_height";
    const METHOD: &'static str = "last_block_number";

    pub fn register(ctx: &ProviderContext, client: AccountId) -> Result<Self, SinkError> {
        Ok(Self {
            near: Arc::clone(&ctx.near),
            client,
            height: ctx
                .sink
                .gauge("eth_client_on_near_height", "Height of Ethereum Client on NEAR")?,
        })
    }
}

#[async_trait]
impl MetricProvider for EthClientOnNear {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn gauges(&self) -> Vec<GaugeHandle> {
        vec![self.height.clone()]
    }

    async fn sample(&self) -> Result<()> {
        let raw = self
            .near
            .call_view(&self.client, Self::METHOD)
            .await
            .with_context(|| format!("{}.{}", self.client, Self::METHOD))?;

        let height = decode_le_uint(&raw)?;
        self.height.set(height as f64);
        Ok(())
    }
}

/// Borsh encodes integers little-endian.
fn decode_le_uint(bytes: &[u8]) -> Result<u128> {
    if bytes.is_empty() {
        bail!("empty view result");
    }
    if bytes.len() > 16 {
        bail!("view result of {} bytes does not fit an integer", bytes.len());
    }
    Ok(bytes.iter().rev().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
}
