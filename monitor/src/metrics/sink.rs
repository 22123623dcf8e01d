//! In-memory gauge registry shared by providers and the exposition server.
//!
//! Providers register their gauges once at startup and keep the returned
//! handles; every cycle they overwrite the values. The exposition server
//! takes a [`MetricSink::snapshot`] on each scrape.
//!
//! Gauge values are stored as `f64` bits in an `AtomicU64` next to an
//! `AtomicBool` set flag, so setting and reading a value never takes a lock. The registry lock (`RwLock`) is only
//! written during registration.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("gauge `{name}` already registered with help {existing:?}, refusing {requested:?}")]
    Conflict {
        name: String,
        existing: String,
        requested: String,
    },
    #[error("`{0}` is not a valid metric name")]
    InvalidName(String),
}

struct Gauge {
    name: String,
    help: String,
    bits: AtomicU64,
    set: AtomicBool,
}

/// Cheap, cloneable handle to a registered gauge.
#[derive(Clone)]
pub struct GaugeHandle {
    gauge: Arc<Gauge>,
}

impl GaugeHandle {
    pub fn name(&self) -> &str {
        &self.gauge.name
    }

    pub fn help(&self) -> &str {
        &self.gauge.help
    }

    pub fn set(&self, value: f64) {
        self.gauge.bits.store(value.to_bits(), Ordering::Relaxed);
        self.gauge.set.store(true, Ordering::Release);
    }

    /// Current value, `None` until the first successful `set`.
    pub fn get(&self) -> Option<f64> {
        if !self.gauge.set.load(Ordering::Acquire) {
            return None;
        }
        Some(f64::from_bits(self.gauge.bits.load(Ordering::Relaxed)))
    }

    /// Whether both handles point at the same underlying gauge.
    pub fn same_gauge(&self, other: &GaugeHandle) -> bool {
        Arc::ptr_eq(&self.gauge, &other.gauge)
    }
}

impl fmt::Debug for GaugeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaugeHandle")
            .field("name", &self.gauge.name)
            .field("value", &self.get())
            .finish()
    }
}

/// Point-in-time view of a single gauge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeSample {
    pub name: String,
    pub help: String,
    pub value: Option<f64>,
}

#[derive(Default)]
struct Registry {
    /// Insertion order, used for stable exposition output.
    gauges: Vec<Arc<Gauge>>,
    by_name: HashMap<String, usize>,
}

#[derive(Default)]
pub struct MetricSink {
    registry: RwLock<Registry>,
}

impl MetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the gauge `name`.
    ///
    /// Registering an existing name with the same help text returns a handle
    /// to the same gauge; a different help text is a [`SinkError::Conflict`].
    pub fn gauge(&self, name: &str, help: &str) -> Result<GaugeHandle, SinkError> {
        if !is_valid_name(name) {
            return Err(SinkError::InvalidName(name.to_string()));
        }

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(&idx) = registry.by_name.get(name) {
            let existing = &registry.gauges[idx];
            if existing.help != help {
                return Err(SinkError::Conflict {
                    name: name.to_string(),
                    existing: existing.help.clone(),
                    requested: help.to_string(),
                });
            }
            return Ok(GaugeHandle { gauge: Arc::clone(existing) });
        }

        let gauge = Arc::new(Gauge {
            name: name.to_string(),
            help: help.to_string(),
            bits: AtomicU64::new(0),
            set: AtomicBool::new(false),
        });
        let idx = registry.gauges.len();
        registry.gauges.push(Arc::clone(&gauge));
        registry.by_name.insert(name.to_string(), idx);

        Ok(GaugeHandle { gauge })
    }

    /// Every gauge in registration order with its current value.
    pub fn snapshot(&self) -> Vec<GaugeSample> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .gauges
            .iter()
            .map(|g| {
                let handle = GaugeHandle { gauge: Arc::clone(g) };
                GaugeSample {
                    name: g.name.clone(),
                    help: g.help.clone(),
                    value: handle.get(),
                }
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.gauges.iter().map(|g| g.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Prometheus metric name: `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        _ => false,
    }
}
