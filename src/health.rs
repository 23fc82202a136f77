//! Probe and metrics endpoints
//!
//! - `/healthz` answers as long as the process runs
//! - `/readyz` answers 200 once the controller is running, 503 otherwise
//! - `/metrics` exposes per-instance pass counters in the Prometheus text format

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::crd::State as InstanceState;

/// Default bind address of the probe server
pub const HEALTH_ADDR: &str = "0.0.0.0:8080";

const METRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// How a reconcile pass ended, as seen by the metrics
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum PassResult {
    Done,
    Requeue,
    Error,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PassLabels {
    namespace: String,
    name: String,
    result: PassResult,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct InstanceLabels {
    namespace: String,
    name: String,
    state: String,
}

/// Operator metrics registered under the `dockerregistry` prefix
pub struct Metrics {
    passes: Family<PassLabels, Counter>,
    pass_duration: Histogram,
    instance_state: Family<InstanceLabels, Gauge>,
    last_pass: Gauge,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("dockerregistry");

        let passes = Family::<PassLabels, Counter>::default();
        registry.register(
            "reconcile_passes",
            "Reconcile passes by instance and result",
            passes.clone(),
        );

        let pass_duration = Histogram::new(exponential_buckets(0.005, 2.0, 12));
        registry.register(
            "reconcile_pass_duration_seconds",
            "Wall time of one reconcile pass",
            pass_duration.clone(),
        );

        let instance_state = Family::<InstanceLabels, Gauge>::default();
        registry.register(
            "instance_state",
            "1 for the state each DockerRegistry is in",
            instance_state.clone(),
        );

        let last_pass = Gauge::default();
        registry.register(
            "last_reconcile_timestamp_seconds",
            "Unix time of the last finished pass",
            last_pass.clone(),
        );

        Self {
            passes,
            pass_duration,
            instance_state,
            last_pass,
            registry,
        }
    }

    /// Count one finished pass of `namespace/name`
    pub fn observe_pass(&self, namespace: &str, name: &str, result: PassResult, seconds: f64) {
        self.passes
            .get_or_create(&PassLabels {
                namespace: namespace.to_string(),
                name: name.to_string(),
                result,
            })
            .inc();
        self.pass_duration.observe(seconds);
        self.last_pass.set(Utc::now().timestamp());
    }

    /// Publish `current` as the only active state of `namespace/name`
    pub fn set_instance_state(&self, namespace: &str, name: &str, current: InstanceState) {
        for state in InstanceState::ALL {
            let labels = InstanceLabels {
                namespace: namespace.to_string(),
                name: name.to_string(),
                state: state.to_string(),
            };
            self.instance_state
                .get_or_create(&labels)
                .set(i64::from(state == current));
        }
    }

    /// Drop every series of a released instance
    pub fn forget_instance(&self, namespace: &str, name: &str) {
        for state in InstanceState::ALL {
            self.instance_state.remove(&InstanceLabels {
                namespace: namespace.to_string(),
                name: name.to_string(),
                state: state.to_string(),
            });
        }
    }

    fn render(&self) -> Option<String> {
        let mut body = String::new();
        match encode(&mut body, &self.registry) {
            Ok(()) => Some(body),
            Err(e) => {
                error!(error = %e, "failed to encode metrics");
                None
            }
        }
    }
}

/// State shared between the controller and the probe server
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    pub metrics: Metrics,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
            body,
        ),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            String::new(),
        ),
    }
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the probe endpoints on `addr` until `shutdown` is cancelled
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: &str,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "probe server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
