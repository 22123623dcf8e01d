//! Bridge monitor. Samples NEAR and Ethereum bridge state on a fixed
//! cadence and republishes it as Prometheus gauges.
//!
//! ```text
//! ProviderRegistry ──► Scheduler ──► providers ──► MetricSink ◄── MetricsServer
//!   (built once)      (per cycle)   (chain RPC)    (gauges)      (GET /metrics)
//! ```

pub mod chain;
pub mod metrics;
pub mod providers;
pub mod scheduler;
pub mod server;
