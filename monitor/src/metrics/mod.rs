//! Gauge registry and its Prometheus text rendering.

pub mod exposition;
pub mod sink;

pub use exposition::{render, CONTENT_TYPE};
pub use sink::{GaugeHandle, GaugeSample, MetricSink, SinkError};
