//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe
//! - `/readyz` - Readiness probe (leadership acquired, controllers running)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Labels identifying one reconciled object
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl prometheus_client::encoding::EncodeLabelSet for ReconcileLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for phase transition metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TransitionLabels {
    pub kind: String,
    pub from: String,
    pub to: String,
}

impl prometheus_client::encoding::EncodeLabelSet for TransitionLabels {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("from", self.from.as_str()).encode(encoder.encode_label())?;
        ("to", self.to.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    /// Applied phase transitions
    pub phase_transitions_total: Family<TransitionLabels, Counter>,
    /// Advisory (non-fatal) step failures
    pub advisories_total: Family<ReconcileLabels, Counter>,

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

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "managed_db_operator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "managed_db_operator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "managed_db_operator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let phase_transitions_total = Family::<TransitionLabels, Counter>::default();
        registry.register(
            "managed_db_operator_phase_transitions",
            "Total number of applied phase transitions",
            phase_transitions_total.clone(),
        );

        let advisories_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "managed_db_operator_advisories",
            "Best-effort steps that failed without failing the reconciliation",
            advisories_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            phase_transitions_total,
            advisories_total,
            registry,
        }
    }

    fn labels(kind: &str, namespace: &str, name: &str) -> ReconcileLabels {
        ReconcileLabels {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, kind: &str, namespace: &str, name: &str, duration_secs: f64) {
        let labels = Self::labels(kind, namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, kind: &str, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&Self::labels(kind, namespace, name))
            .inc();
    }

    /// Record advisory failures reported by one reconciliation
    pub fn record_advisories(&self, kind: &str, namespace: &str, name: &str, count: usize) {
        if count == 0 {
            return;
        }
        self.advisories_total
            .get_or_create(&Self::labels(kind, namespace, name))
            .inc_by(count as u64);
    }

    pub fn record_transition(&self, kind: &str, from: &str, to: &str) {
        let labels = TransitionLabels {
            kind: kind.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        };
        self.phase_transitions_total.get_or_create(&labels).inc();
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails.
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (leader, controllers started)
    pub ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Unix timestamp of the last successful reconcile
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    pub fn touch(&self) {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.last_reconcile.store(now, Ordering::Relaxed);
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the controllers are running.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
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
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server on the given address
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: &str,
) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, app).await
}
