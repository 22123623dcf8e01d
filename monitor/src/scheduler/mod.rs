//! Polling scheduler. Samples every provider once per cycle.
//!
//! Each cycle spawns one task per provider (registry order), bounds each
//! task by the provider timeout and waits for all of them. Outcomes are
//! inspected one by one: a failing, hanging or panicking provider is logged
//! and counted, and the others keep their fresh values. After the join the
//! scheduler sleeps for the poll interval, so cycles never overlap.
//!
//! Shutdown is cooperative through a [`CancellationToken`], checked before
//! each cycle, during the join and during the sleep.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use common::config::MonitorConfig;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::providers::ProviderRegistry;

pub mod stats;

pub use stats::{SchedulerState, SchedulerStats, StatsSnapshot};

/// Floor for the derived provider timeout.
const MIN_PROVIDER_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep between the end of one cycle and the start of the next.
    pub poll_interval: Duration,
    /// Per-provider deadline; defaults to 3/4 of `poll_interval`.
    pub provider_timeout: Option<Duration>,
}

impl SchedulerConfig {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval, provider_timeout: None }
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = Some(timeout);
        self
    }

    pub fn from_monitor(monitor: &MonitorConfig) -> Self {
        Self {
            poll_interval: monitor.poll_interval(),
            provider_timeout: monitor.provider_timeout(),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        self.provider_timeout
            .unwrap_or_else(|| (self.poll_interval * 3 / 4).max(MIN_PROVIDER_TIMEOUT))
    }
}

/// Why a provider produced no fresh value in a cycle. Never fatal.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("provider {provider} failed: {error:#}")]
    ProviderError { provider: String, error: anyhow::Error },
    #[error("provider {provider} timed out after {}ms", .timeout.as_millis())]
    ProviderTimeout { provider: String, timeout: Duration },
}

impl CycleError {
    pub fn provider(&self) -> &str {
        match self {
            Self::ProviderError { provider, .. } | Self::ProviderTimeout { provider, .. } => provider,
        }
    }
}

/// Summary of one cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub succeeded: usize,
    pub failures: Vec<CycleError>,
    /// Cancelled before every provider settled.
    pub abandoned: bool,
}

pub struct Scheduler {
    registry: ProviderRegistry,
    config: SchedulerConfig,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(registry: ProviderRegistry, config: SchedulerConfig) -> Self {
        Self {
            registry,
            config,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Run cycles until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            providers = self.registry.len(),
            interval_ms = self.config.poll_interval.as_millis() as u64,
            timeout_ms = self.config.provider_timeout().as_millis() as u64,
            "⏱  Scheduler starting"
        );
        self.stats.set_state(SchedulerState::Running);

        while !cancel.is_cancelled() {
            let report = self.run_cycle(&cancel).await;
            if report.abandoned {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = time::sleep(self.config.poll_interval) => {}
            }
        }

        self.stats.set_state(SchedulerState::Stopped);
        info!(
            cycles = self.stats.cycles_completed(),
            "Scheduler stopped"
        );
    }

    /// Fire every provider, wait for all of them, report what happened.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let started_at = Utc::now();
        let cycle = self.stats.cycle_started(started_at);
        let start = Instant::now();
        let timeout = self.config.provider_timeout();

        info!(cycle, providers = self.registry.len(), "Cycle started");

        let mut names = Vec::with_capacity(self.registry.len());
        let mut aborts = Vec::with_capacity(self.registry.len());
        let mut tasks = Vec::with_capacity(self.registry.len());

        for provider in self.registry.providers() {
            let provider = Arc::clone(provider);
            names.push(provider.name().to_string());
            let task = tokio::spawn(async move { time::timeout(timeout, provider.sample()).await });
            aborts.push(task.abort_handle());
            tasks.push(task);
        }

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            results = join_all(tasks) => Some(results),
        };

        let Some(results) = joined else {
            for abort in &aborts {
                abort.abort();
            }
            self.stats.cycle_abandoned();
            warn!(cycle, "Cycle abandoned on shutdown");
            return CycleReport {
                cycle,
                started_at,
                elapsed: start.elapsed(),
                succeeded: 0,
                failures: Vec::new(),
                abandoned: true,
            };
        };

        let mut succeeded = 0;
        let mut failures = Vec::new();

        for (provider, result) in names.into_iter().zip(results) {
            let failure = match result {
                Ok(Ok(Ok(()))) => {
                    succeeded += 1;
                    continue;
                }
                Ok(Ok(Err(error))) => CycleError::ProviderError { provider, error },
                Ok(Err(_elapsed)) => CycleError::ProviderTimeout { provider, timeout },
                Err(join_err) => {
                    let error = if join_err.is_panic() {
                        anyhow!("sampling task panicked")
                    } else {
                        anyhow!("sampling task was cancelled")
                    };
                    CycleError::ProviderError { provider, error }
                }
            };

            match &failure {
                CycleError::ProviderError { provider, .. } => {
                    self.stats.provider_error();
                    error!(cycle, provider = %provider, "{failure}");
                }
                CycleError::ProviderTimeout { provider, .. } => {
                    self.stats.provider_timeout();
                    warn!(cycle, provider = %provider, "{failure}");
                }
            }
            failures.push(failure);
        }

        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        self.stats.cycle_completed(elapsed_ms);
        info!(
            cycle,
            succeeded,
            failed = failures.len(),
            "Cycle completed in {}ms",
            elapsed_ms
        );

        CycleReport {
            cycle,
            started_at,
            elapsed,
            succeeded,
            failures,
            abandoned: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{GaugeHandle, MetricSink};
    use crate::providers::MetricProvider;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Sets its gauge to 1, 2, 3... on successive samples.
    struct Counting {
        gauge: GaugeHandle,
        calls: AtomicU64,
    }

    impl Counting {
        fn register(sink: &MetricSink, name: &str) -> Self {
            Self { gauge: sink.gauge(name, "counting").unwrap(), calls: AtomicU64::new(0) }
        }
    }

    #[async_trait]
    impl MetricProvider for Counting {
        fn name(&self) -> &str {
            self.gauge.name()
        }
        fn gauges(&self) -> Vec<GaugeHandle> {
            vec![self.gauge.clone()]
        }
        async fn sample(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.set(n as f64);
            Ok(())
        }
    }

    /// Registers a gauge but never manages to sample it.
    struct Failing {
        gauge: GaugeHandle,
    }

    #[async_trait]
    impl MetricProvider for Failing {
        fn name(&self) -> &str {
            self.gauge.name()
        }
        fn gauges(&self) -> Vec<GaugeHandle> {
            vec![self.gauge.clone()]
        }
        async fn sample(&self) -> Result<()> {
            bail!("rpc endpoint unreachable")
        }
    }

    #[derive(Default)]
    struct Concurrency {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    /// Sleeps for `delay`, then sets its gauge.
    struct Slow {
        gauge: GaugeHandle,
        delay: Duration,
        value: f64,
        seen: Arc<Concurrency>,
    }

    #[async_trait]
    impl MetricProvider for Slow {
        fn name(&self) -> &str {
            self.gauge.name()
        }
        fn gauges(&self) -> Vec<GaugeHandle> {
            vec![self.gauge.clone()]
        }
        async fn sample(&self) -> Result<()> {
            self.seen.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.seen.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.max_in_flight.fetch_max(now, Ordering::SeqCst);
            time::sleep(self.delay).await;
            self.seen.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.gauge.set(self.value);
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl MetricProvider for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn gauges(&self) -> Vec<GaugeHandle> {
            vec![]
        }
        async fn sample(&self) -> Result<()> {
            panic!("provider bug")
        }
    }

    fn slow(sink: &MetricSink, name: &str, delay: Duration) -> (Slow, Arc<Concurrency>) {
        let seen = Arc::new(Concurrency::default());
        let provider = Slow {
            gauge: sink.gauge(name, "slow").unwrap(),
            delay,
            value: 99.0,
            seen: Arc::clone(&seen),
        };
        (provider, seen)
    }

    fn value(sink: &MetricSink, name: &str) -> Option<f64> {
        sink.snapshot().into_iter().find(|s| s.name == name).and_then(|s| s.value)
    }

    #[test]
    fn test_default_provider_timeout() {
        let config = SchedulerConfig::new(Duration::from_secs(10));
        assert_eq!(config.provider_timeout(), Duration::from_millis(7_500));

        let config = config.with_provider_timeout(Duration::from_secs(2));
        assert_eq!(config.provider_timeout(), Duration::from_secs(2));

        let tiny = SchedulerConfig::new(Duration::from_nanos(1));
        assert_eq!(tiny.provider_timeout(), MIN_PROVIDER_TIMEOUT);
    }

    #[tokio::test]
    async fn test_failing_provider_does_not_block_others() {
        let sink = MetricSink::new();
        let mut registry = ProviderRegistry::new();
        registry
            .add(Counting::register(&sink, "a"))
            .unwrap()
            .add(Failing { gauge: sink.gauge("b", "always fails").unwrap() })
            .unwrap();

        let scheduler = Scheduler::new(registry, SchedulerConfig::new(Duration::from_millis(100)));
        let cancel = CancellationToken::new();

        let first = scheduler.run_cycle(&cancel).await;
        assert_eq!(value(&sink, "a"), Some(1.0));
        let second = scheduler.run_cycle(&cancel).await;

        assert_eq!(value(&sink, "a"), Some(2.0));
        assert_eq!(value(&sink, "b"), None);

        for report in [&first, &second] {
            assert!(!report.abandoned);
            assert_eq!(report.succeeded, 1);
            assert_eq!(report.failures.len(), 1);
            assert_eq!(report.failures[0].provider(), "b");
            let message = report.failures[0].to_string();
            assert!(message.starts_with("provider b failed"), "{message}");
            assert!(message.contains("rpc endpoint unreachable"));
        }
        assert_eq!((first.cycle, second.cycle), (1, 2));

        let stats = scheduler.stats();
        assert_eq!(stats.provider_errors(), 2);
        assert_eq!(stats.cycles_completed(), 2);
        assert_eq!(
            stats.last_cycle_started_at().map(|t| t.timestamp_millis()),
            Some(second.started_at.timestamp_millis())
        );
    }

    /// In-memory log sink for asserting on emitted lines.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_and_timeouts_are_logged() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let sink = MetricSink::new();
        let (hanging, _) = slow(&sink, "hang", Duration::from_secs(1));
        let mut registry = ProviderRegistry::new();
        registry
            .add(Counting::register(&sink, "a"))
            .unwrap()
            .add(Failing { gauge: sink.gauge("b", "always fails").unwrap() })
            .unwrap()
            .add(hanging)
            .unwrap();

        let config = SchedulerConfig::new(Duration::from_secs(1))
            .with_provider_timeout(Duration::from_millis(100));
        let scheduler = Scheduler::new(registry, config);
        let cancel = CancellationToken::new();
        scheduler.run_cycle(&cancel).await;
        scheduler.run_cycle(&cancel).await;

        let lines = logs.lines();
        let failed: Vec<_> = lines.iter().filter(|l| l.contains("provider b failed")).collect();
        assert_eq!(failed.len(), 2, "{lines:#?}");
        assert!(failed.iter().all(|l| l.contains("ERROR") && l.contains("rpc endpoint unreachable")));

        let timed_out: Vec<_> = lines
            .iter()
            .filter(|l| l.contains("provider hang timed out after 100ms"))
            .collect();
        assert_eq!(timed_out.len(), 2, "{lines:#?}");
        assert!(timed_out.iter().all(|l| l.contains("WARN")));

        assert_eq!(lines.iter().filter(|l| l.contains("Cycle completed in")).count(), 2);
        assert!(!lines.iter().any(|l| l.contains("provider a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_previous_value() {
        let sink = MetricSink::new();
        let (provider, _) = slow(&sink, "slow", Duration::from_secs(1));
        provider.gauge.set(7.0);

        let mut registry = ProviderRegistry::new();
        registry.add(provider).unwrap().add(Counting::register(&sink, "fast")).unwrap();

        let config = SchedulerConfig::new(Duration::from_secs(1))
            .with_provider_timeout(Duration::from_millis(100));
        let scheduler = Scheduler::new(registry, config);

        let start = time::Instant::now();
        let report = scheduler.run_cycle(&CancellationToken::new()).await;
        assert!(start.elapsed() < Duration::from_secs(1));

        assert_eq!(report.succeeded, 1);
        assert!(matches!(
            &report.failures[..],
            [CycleError::ProviderTimeout { provider, timeout }]
                if provider == "slow" && *timeout == Duration::from_millis(100)
        ));
        assert_eq!(value(&sink, "slow"), Some(7.0));
        assert_eq!(value(&sink, "fast"), Some(1.0));

        // The late result is discarded, not applied after the fact
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(value(&sink, "slow"), Some(7.0));
        assert_eq!(scheduler.stats().provider_timeouts(), 1);
    }

    #[tokio::test]
    async fn test_panicking_provider_is_isolated() {
        let sink = MetricSink::new();
        let mut registry = ProviderRegistry::new();
        registry.add(Panicking).unwrap().add(Counting::register(&sink, "a")).unwrap();

        let scheduler = Scheduler::new(registry, SchedulerConfig::new(Duration::from_millis(10)));
        let report = scheduler.run_cycle(&CancellationToken::new()).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].to_string().contains("panicked"));
        assert_eq!(value(&sink, "a"), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_run_concurrently() {
        let sink = MetricSink::new();
        let (a, _) = slow(&sink, "a", Duration::from_millis(300));
        let (b, _) = slow(&sink, "b", Duration::from_millis(300));
        let mut registry = ProviderRegistry::new();
        registry.add(a).unwrap().add(b).unwrap();

        let scheduler = Scheduler::new(
            registry,
            SchedulerConfig::new(Duration::from_secs(1)).with_provider_timeout(Duration::from_secs(1)),
        );

        let start = time::Instant::now();
        let report = scheduler.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.succeeded, 2);
        // Sequential sampling would take 600ms
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_cycles_do_not_overlap() {
        let sink = MetricSink::new();
        let (provider, seen) = slow(&sink, "slow", Duration::from_millis(250));
        let mut registry = ProviderRegistry::new();
        registry.add(provider).unwrap();

        let config = SchedulerConfig::new(Duration::from_millis(100))
            .with_provider_timeout(Duration::from_millis(500));
        let scheduler = Scheduler::new(registry, config);
        let stats = scheduler.stats();

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });

        time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        task.await.unwrap();

        let completed = stats.cycles_completed();
        assert!((3..=4).contains(&completed), "completed {completed} cycles");
        assert_eq!(seen.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(stats.provider_timeouts(), 0);
        assert_eq!(stats.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_repeated_failures() {
        let sink = Arc::new(MetricSink::new());
        let mut registry = ProviderRegistry::new();
        registry
            .add(Failing { gauge: sink.gauge("b", "always fails").unwrap() })
            .unwrap()
            .add(Counting::register(&sink, "a"))
            .unwrap();

        let scheduler = Scheduler::new(registry, SchedulerConfig::new(Duration::from_millis(100)));
        let stats = scheduler.stats();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });

        time::sleep(Duration::from_millis(550)).await;
        assert_eq!(stats.state(), SchedulerState::Running);
        cancel.cancel();
        task.await.unwrap();

        let cycles = stats.cycles_completed();
        assert!(cycles >= 5, "only {cycles} cycles");
        assert_eq!(stats.provider_errors(), cycles);
        assert_eq!(value(&sink, "a"), Some(cycles as f64));
        assert_eq!(value(&sink, "b"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_cycle_stops_promptly() {
        let sink = MetricSink::new();
        let (provider, seen) = slow(&sink, "hang", Duration::from_secs(10));
        let mut registry = ProviderRegistry::new();
        registry.add(provider).unwrap();

        let config = SchedulerConfig::new(Duration::from_millis(100))
            .with_provider_timeout(Duration::from_secs(5));
        let scheduler = Scheduler::new(registry, config);
        let stats = scheduler.stats();

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });

        time::sleep(Duration::from_secs(1)).await;
        let cancelled_at = time::Instant::now();
        cancel.cancel();
        task.await.unwrap();

        assert!(cancelled_at.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.cycles_started(), 1);
        assert_eq!(stats.cycles_completed(), 0);
        assert_eq!(stats.cycles_abandoned(), 1);
        assert_eq!(stats.state(), SchedulerState::Stopped);

        // No further cycles, and the abandoned sample never lands
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(stats.cycles_started(), 1);
        assert_eq!(seen.calls.load(Ordering::SeqCst), 1);
        assert_eq!(value(&sink, "hang"), None);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let sink = MetricSink::new();
        let mut registry = ProviderRegistry::new();
        registry.add(Counting::register(&sink, "a")).unwrap();

        let scheduler = Scheduler::new(registry, SchedulerConfig::new(Duration::from_millis(10)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        scheduler.run(cancel).await;

        assert_eq!(scheduler.stats().cycles_started(), 0);
        assert_eq!(value(&sink, "a"), None);
        assert_eq!(scheduler.stats().state(), SchedulerState::Stopped);
    }
}
