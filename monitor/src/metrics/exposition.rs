//! Prometheus text exposition (format 0.0.4) of a sink snapshot.

use prometheus::proto::{Gauge, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};

use super::sink::GaugeSample;

pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// One gauge family per sampled gauge, names prefixed by `prefix`.
///
/// Gauges that were never set are left out, so scrapers see the metric as
/// absent rather than zero.
pub fn families(prefix: &str, samples: &[GaugeSample]) -> Vec<MetricFamily> {
    samples
        .iter()
        .filter_map(|sample| {
            let value = sample.value?;

            let mut gauge = Gauge::default();
            gauge.set_value(value);
            let mut metric = Metric::default();
            metric.set_gauge(gauge);

            let mut family = MetricFamily::default();
            family.set_name(format!("{prefix}{}", sample.name));
            family.set_help(sample.help.clone());
            family.set_field_type(MetricType::GAUGE);
            family.mut_metric().push(metric);
            Some(family)
        })
        .collect()
}

/// Encode `samples` with the Prometheus text encoder.
pub fn render(prefix: &str, samples: &[GaugeSample]) -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families(prefix, samples), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
