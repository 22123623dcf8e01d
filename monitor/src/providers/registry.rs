//! Provider registry: the ordered list of providers built at startup.

use common::{BridgeConfig, ConfigError};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::eth::EthChainBlock;
use super::near::{EthClientOnNear, NearAccountInfo, NearChainBlock};
use super::{MetricProvider, ProviderContext};
use crate::metrics::{GaugeHandle, SinkError};

/// Construction-time failures. All of them are fatal: the scheduler never
/// starts with a partially built registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("provider `{provider}` could not register its gauges: {source}")]
    Register {
        provider: String,
        #[source]
        source: SinkError,
    },
    #[error("provider `{0}` is registered twice")]
    DuplicateProvider(String),
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MetricProvider>>,
    names: HashSet<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the bridge providers, in the order they are sampled:
    /// NEAR height, the light client and relayer accounts, the light
    /// client's Ethereum height, then the Ethereum height.
    pub fn from_config(config: &BridgeConfig, ctx: &ProviderContext) -> Result<Self, RegistryError> {
        config.validate()?;

        let client = config.contracts.near.client.clone();
        let relayer = config.eth2near.relayer.clone();

        let mut registry = Self::new();
        registry.add(registered(NearChainBlock::NAME, NearChainBlock::register(ctx))?)?;
        registry.add(registered(
            "eth_client_on_near_account",
            NearAccountInfo::register(ctx, client.clone(), "eth_client_on_near"),
        )?)?;
        registry.add(registered(
            "eth2near_relayer_account",
            NearAccountInfo::register(ctx, relayer, "eth2near_relayer"),
        )?)?;
        registry.add(registered(EthClientOnNear::NAME, EthClientOnNear::register(ctx, client))?)?;
        registry.add(registered(EthChainBlock::NAME, EthChainBlock::register(ctx))?)?;

        Ok(registry)
    }

    /// Append a provider. Names must be unique so failures can be told apart.
    pub fn add(&mut self, provider: impl MetricProvider + 'static) -> Result<&mut Self, RegistryError> {
        let name = provider.name().to_string();
        if !self.names.insert(name.clone()) {
            return Err(RegistryError::DuplicateProvider(name));
        }
        debug!(provider = %name, gauges = provider.gauges().len(), "Provider registered");
        self.providers.push(Arc::new(provider));
        Ok(self)
    }

    pub fn providers(&self) -> &[Arc<dyn MetricProvider>] {
        &self.providers
    }

    /// Every gauge owned by a provider, in registry order.
    pub fn gauges(&self) -> Vec<GaugeHandle> {
        self.providers.iter().flat_map(|p| p.gauges()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn registered<P>(provider: &str, result: Result<P, SinkError>) -> Result<P, RegistryError> {
    result.map_err(|source| RegistryError::Register {
        provider: provider.to_string(),
        source,
    })
}
