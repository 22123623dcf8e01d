//! Metric providers, pluggable units that own a few gauges and know how
//! to refresh them.
//!
//! A provider works in two phases:
//!
//! 1. **Registration**: its constructor receives a [`ProviderContext`],
//!    registers its gauges with the sink and keeps the handles. No I/O.
//! 2. **Sampling**: the scheduler calls [`MetricProvider::sample`] once per
//!    cycle; the provider queries its chain and sets its gauges.
//!
//! Adding a metric = implementing [`MetricProvider`] in a new file, then
//! registering it in [`registry::ProviderRegistry::from_config`].

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::chain::{EthRpc, NearRpc};
use crate::metrics::{GaugeHandle, MetricSink};

pub mod eth;
pub mod near;
pub mod registry;

pub use registry::{ProviderRegistry, RegistryError};

/// Everything a provider may capture at registration time.
#[derive(Clone)]
pub struct ProviderContext {
    pub sink: Arc<MetricSink>,
    pub near: Arc<dyn NearRpc>,
    pub eth: Arc<dyn EthRpc>,
}

#[async_trait]
pub trait MetricProvider: Send + Sync {
    /// Identity used in logs and failure reports.
    fn name(&self) -> &str;

    /// Gauges registered by this provider.
    fn gauges(&self) -> Vec<GaugeHandle>;

    /// Query the external system and update the gauges.
    ///
    /// On error the gauges keep whatever value they had before.
    async fn sample(&self) -> Result<()>;
}
