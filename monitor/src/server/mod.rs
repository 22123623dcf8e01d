//! HTTP exposition server.
//!
//! - `GET /metrics`: Prometheus text snapshot of the sink
//! - `GET /health`: scheduler state and counters as JSON
//!
//! Both handlers only read shared state; a scrape never waits for a cycle.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics::{self, MetricSink};
use crate::scheduler::{SchedulerStats, StatsSnapshot};

#[derive(Clone)]
struct AppState {
    sink: Arc<MetricSink>,
    stats: Arc<SchedulerStats>,
    prefix: Arc<str>,
}

pub struct MetricsServer {
    addr: SocketAddr,
    state: AppState,
}

impl MetricsServer {
    pub fn new(
        addr: SocketAddr,
        sink: Arc<MetricSink>,
        stats: Arc<SchedulerStats>,
        prefix: &str,
    ) -> Self {
        Self {
            addr,
            state: AppState { sink, stats, prefix: Arc::from(prefix) },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(render_metrics))
            .route("/health", get(health))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Failed to bind metrics server on {}", self.addr))?;

        info!("📈 Metrics exposed at http://{}/metrics", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .context("Metrics server failed")?;

        info!("Metrics server stopped");
        Ok(())
    }
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match metrics::render(&state.prefix, &state.sink.snapshot()) {
        Ok(body) => ([(header::CONTENT_TYPE, metrics::CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn server() -> (MetricsServer, Arc<MetricSink>) {
        let sink = Arc::new(MetricSink::new());
        let server = MetricsServer::new(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            Arc::clone(&sink),
            Arc::new(SchedulerStats::default()),
            "bridge_monitor_",
        );
        (server, sink)
    }

    async fn get_body(router: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let resp = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_snapshot() {
        let (server, sink) = server();
        sink.gauge("near_chain_block", "NEAR chain height").unwrap().set(42.0);
        sink.gauge("eth_chain_block", "Ethereum chain height").unwrap();

        let (status, content_type, body) = get_body(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(metrics::CONTENT_TYPE));
        assert!(body.contains("# TYPE bridge_monitor_near_chain_block gauge\n"));
        assert!(body.contains("bridge_monitor_near_chain_block 42\n"));
        // Registered but never sampled
        assert!(!body.lines().any(|l| l.starts_with("bridge_monitor_eth_chain_block ")));
        assert!(!body.contains("# HELP bridge_monitor_eth_chain_block"));
    }

    #[tokio::test]
    async fn test_metrics_reflect_latest_values() {
        let (server, sink) = server();
        let gauge = sink.gauge("a", "h").unwrap();

        gauge.set(1.0);
        let (_, _, body) = get_body(server.router(), "/metrics").await;
        assert!(body.contains("bridge_monitor_a 1\n"));

        gauge.set(2.0);
        let (_, _, body) = get_body(server.router(), "/metrics").await;
        assert!(body.contains("bridge_monitor_a 2\n"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (server, _) = server();
        let (status, _, body) = get_body(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["cycles_completed"], 0);
        assert!(json["last_cycle_started_at"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (server, _) = server();
        let (status, _, _) = get_body(server.router(), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (server, _) = server();
        let cancel = CancellationToken::new();
        cancel.cancel();
        server.run(cancel).await.unwrap();
    }
}
