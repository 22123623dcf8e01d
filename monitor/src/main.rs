//! Bridge monitor daemon.
//!
//! Loads the bridge configuration, registers the metric providers, then
//! runs the polling scheduler and the `/metrics` server side by side until
//! SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use common::config::{self, BridgeConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use bridge_monitor::chain::{EthJsonRpc, NearJsonRpc};
use bridge_monitor::metrics::MetricSink;
use bridge_monitor::providers::{ProviderContext, ProviderRegistry};
use bridge_monitor::scheduler::{Scheduler, SchedulerConfig};
use bridge_monitor::server::MetricsServer;

/// Expose bridge information through Prometheus metrics.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bridge folder under ~/.rainbow holding a config.yml
    bridge_id: Option<String>,
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// List information tracked and exit
    #[arg(short, long)]
    list: bool,
    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let path = match &args.config {
        Some(path) => path.clone(),
        None => config::resolve_config_path(
            None,
            args.bridge_id.as_deref(),
            &config::default_root()?,
        )?,
    };
    let config = BridgeConfig::load(&path)?;

    init_tracing(config.global.tracing_level(), args.json_logs);
    info!("🌉 Bridge monitor v{}", env!("CARGO_PKG_VERSION"));
    info!(path = %path.display(), "Config file");

    // ── Providers ───────────────────────────────────────────────────
    let sink = Arc::new(MetricSink::new());
    let ctx = ProviderContext {
        sink: Arc::clone(&sink),
        near: Arc::new(NearJsonRpc::new(config.near.node_url.as_str())),
        eth: Arc::new(EthJsonRpc::new(config.eth.rpc_url.as_str())),
    };
    let registry = ProviderRegistry::from_config(&config, &ctx)
        .context("Failed to build provider registry")?;

    if args.list {
        for gauge in registry.gauges() {
            println!("{}{}\t{}", config.monitor.prefix, gauge.name(), gauge.help());
        }
        return Ok(());
    }

    let addr: SocketAddr = format!("{}:{}", config.monitor.bind_address, config.monitor.port)
        .parse()
        .context("Invalid monitor.bindAddress")?;

    // ── Scheduler ───────────────────────────────────────────────────
    let scheduler = Scheduler::new(registry, SchedulerConfig::from_monitor(&config.monitor));
    let stats = scheduler.stats();
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown requested");
            cancel.cancel();
        }
    });

    let scheduler_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    // ── Exposition ──────────────────────────────────────────────────
    let server = MetricsServer::new(addr, sink, stats, &config.monitor.prefix);
    let served = server.run(cancel.clone()).await;
    if let Err(e) = &served {
        error!("{:#}", e);
    }

    // Server gone (shutdown or failure): stop sampling too
    cancel.cancel();
    scheduler_task.await.context("Scheduler task failed")?;

    served
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("bridge_monitor={level},common={level},tower_http=warn").into()
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
