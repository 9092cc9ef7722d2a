//! Health and metrics endpoints for the Quiz Controller.
//!
//! - `GET /health` - Liveness probe, reports the instance id
//! - `GET /ready` - Readiness probe, 503 until the WebSocket listener is up
//!   and again once shutdown begins
//! - `GET /metrics` - Prometheus text rendering, when a handle is supplied

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags shared between `main` and the probe handlers.
#[derive(Debug)]
pub struct HealthState {
    qc_id: String,
    live: AtomicBool,
    ready: AtomicBool,
}

impl HealthState {
    /// New state for `qc_id` (live, not yet ready).
    #[must_use]
    pub fn new(qc_id: impl Into<String>) -> Self {
        Self {
            qc_id: qc_id.into(),
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Stop advertising readiness, e.g. while draining.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize)]
struct ProbeBody {
    status: &'static str,
    qc_id: String,
}

/// Build the probe router, adding `/metrics` when a Prometheus handle is given.
pub fn health_router(health_state: Arc<HealthState>, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state);

    match metrics {
        Some(handle) => router.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        ),
        None => router,
    }
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<ProbeBody>) {
    probe(state.is_live(), &state.qc_id)
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<ProbeBody>) {
    probe(state.is_ready(), &state.qc_id)
}

fn probe(ok: bool, qc_id: &str) -> (StatusCode, Json<ProbeBody>) {
    let (code, status) = if ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        code,
        Json(ProbeBody {
            status,
            qc_id: qc_id.to_string(),
        }),
    )
}
