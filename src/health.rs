//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 once the controller runs)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Port the health server listens on.
pub const HEALTH_PORT: u16 = 8080;

/// Labels identifying a MultiClusterObservability (cluster-scoped, so no namespace)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ObservabilityLabels {
    pub name: String,
}

impl EncodeLabelSet for ObservabilityLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for reconciliation errors
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ErrorLabels {
    pub name: String,
    pub reason: String,
}

impl EncodeLabelSet for ErrorLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("reason", self.reason.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    pub reconciliations_total: Family<ObservabilityLabels, Counter>,
    pub reconciliation_errors_total: Family<ErrorLabels, Counter>,
    pub reconcile_duration_seconds: Family<ObservabilityLabels, Histogram>,
    /// Number of manifests produced by the last successful render
    pub rendered_manifests: Family<ObservabilityLabels, Gauge>,
    /// Rendered Deployments and StatefulSets
    pub workloads_desired: Family<ObservabilityLabels, Gauge>,
    /// Rendered Deployments and StatefulSets with all replicas ready
    pub workloads_ready: Family<ObservabilityLabels, Gauge>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ObservabilityLabels, Counter>::default();
        registry.register(
            "mco_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "mco_reconciliation_errors",
            "Total number of reconciliation errors by reason",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ObservabilityLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "mco_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let rendered_manifests = Family::<ObservabilityLabels, Gauge>::default();
        registry.register(
            "mco_rendered_manifests",
            "Number of manifests produced by the last render",
            rendered_manifests.clone(),
        );

        let workloads_desired = Family::<ObservabilityLabels, Gauge>::default();
        registry.register(
            "mco_workloads_desired",
            "Number of rendered Deployments and StatefulSets",
            workloads_desired.clone(),
        );

        let workloads_ready = Family::<ObservabilityLabels, Gauge>::default();
        registry.register(
            "mco_workloads_ready",
            "Number of rendered Deployments and StatefulSets with all replicas ready",
            workloads_ready.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            rendered_manifests,
            workloads_desired,
            workloads_ready,
            registry,
        }
    }

    fn labels(name: &str) -> ObservabilityLabels {
        ObservabilityLabels {
            name: name.to_string(),
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, name: &str, duration_secs: f64) {
        let labels = Self::labels(name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, name: &str, reason: &str) {
        let labels = ErrorLabels {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    pub fn set_rendered_manifests(&self, name: &str, count: i64) {
        self.rendered_manifests
            .get_or_create(&Self::labels(name))
            .set(count);
    }

    pub fn set_workloads(&self, name: &str, desired: i64, ready: i64) {
        let labels = Self::labels(name);
        self.workloads_desired.get_or_create(&labels).set(desired);
        self.workloads_ready.get_or_create(&labels).set(ready);
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controller)
    ready: RwLock<bool>,
    pub metrics: Metrics,
    /// Last successful reconcile timestamp (Unix epoch seconds)
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Remember when a reconcile last succeeded.
    pub fn touch_reconcile(&self) {
        let now = jiff::Timestamp::now().as_second();
        self.last_reconcile
            .store(u64::try_from(now).unwrap_or_default(), Ordering::Relaxed);
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the controller is running.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on 0.0.0.0:8080.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], HEALTH_PORT));
    info!(port = HEALTH_PORT, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
