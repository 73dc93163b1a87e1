//! Prometheus metrics and the probe/metrics HTTP endpoint.

use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Allocation path a latency sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    /// Fresh allocation (stateless, or first creation of a stateful pod)
    Normal,
    /// Reuse or pre-assignment of a stateful pod
    Stateful,
}

impl AllocationKind {
    fn label(self) -> &'static str {
        match self {
            AllocationKind::Normal => "normal",
            AllocationKind::Stateful => "stateful",
        }
    }
}

/// Controller metrics, registered in an owned registry.
pub struct Metrics {
    registry: Registry,
    allocation_duration: HistogramVec,
    compensation_failures: IntCounter,
    ready: AtomicBool,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let allocation_duration = HistogramVec::new(
            HistogramOpts::new(
                "pod_ip_allocation_duration_seconds",
                "Latency of pod IP allocation",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["type", "success"],
        )?;
        let compensation_failures = IntCounter::new(
            "pod_ipam_compensation_failures_total",
            "Releases after a failed couple that failed themselves (possible leaked addresses)",
        )?;

        registry.register(Box::new(allocation_duration.clone()))?;
        registry.register(Box::new(compensation_failures.clone()))?;

        Ok(Self {
            registry,
            allocation_duration,
            compensation_failures,
            ready: AtomicBool::new(false),
        })
    }

    /// Records one allocation latency sample.
    pub fn observe_allocation(&self, kind: AllocationKind, success: bool, elapsed: Duration) {
        self.allocation_duration
            .with_label_values(&[kind.label(), if success { "true" } else { "false" }])
            .observe(elapsed.as_secs_f64());
    }

    pub fn compensation_failed(&self) {
        self.compensation_failures.inc();
    }

    #[cfg(test)]
    pub fn compensation_failures(&self) -> u64 {
        self.compensation_failures.get()
    }

    #[cfg(test)]
    pub fn allocation_samples(&self, kind: AllocationKind, success: bool) -> u64 {
        self.allocation_duration
            .with_label_values(&[kind.label(), if success { "true" } else { "false" }])
            .get_sample_count()
    }

    /// Marks the controller as ready once caches are synced.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Routes `/metrics`, `/healthz` and `/readyz`.
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(metrics)
}

/// Serves the router until the listener fails.
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics listening on {}", addr);
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}

async fn serve_metrics(State(metrics): State<Arc<Metrics>>) -> String {
    metrics.render()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> (StatusCode, &'static str) {
    if metrics.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
