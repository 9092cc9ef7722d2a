//! Metrics definitions for the Quiz Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `qc_` prefix for Quiz Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 2 values (registry, session)
//! - `message_type`: bounded by inbound client message types (4 values)
//! - `trigger`: 2 values (timeout, all_answered)
//! - `reason`: bounded by session close reasons (4 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("qc_message".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Session & Participant Metrics (Gauges)
// ============================================================================

/// Set the number of live sessions.
///
/// Metric: `qc_sessions_active`
/// Labels: none
pub fn set_sessions_active(count: u64) {
    // u64 to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("qc_sessions_active").set(count as f64);
}

/// Set the number of participants attached to live sessions.
///
/// Metric: `qc_participants_active`
/// Labels: none
pub fn set_participants_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("qc_participants_active").set(count as f64);
}

// ============================================================================
// Round Lifecycle Metrics (Counters)
// ============================================================================

/// Record a round reveal.
///
/// Metric: `qc_rounds_revealed_total`
/// Labels: `trigger` (timeout, all_answered)
pub fn record_round_revealed(trigger: &str) {
    counter!("qc_rounds_revealed_total", "trigger" => trigger.to_string()).increment(1);
}

/// Record a session being destroyed.
///
/// Metric: `qc_sessions_closed_total`
/// Labels: `reason` (host_left, empty, expired, shutdown)
pub fn record_session_closed(reason: &str) {
    counter!("qc_sessions_closed_total", "reason" => reason.to_string()).increment(1);
}

/// Record an outbound delivery failure that dropped a participant.
///
/// Metric: `qc_transport_faults_total`
/// Labels: none
pub fn record_transport_fault() {
    counter!("qc_transport_faults_total").increment(1);
}

// ============================================================================
// Latency Metrics (Histograms)
// ============================================================================

/// Record inbound client message handling latency.
///
/// Metric: `qc_message_latency_seconds`
/// Labels: `message_type`
pub fn record_message_latency(message_type: &str, duration: Duration) {
    histogram!("qc_message_latency_seconds", "message_type" => message_type.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Operational Metrics
// ============================================================================

/// Record an actor panic event.
///
/// Metric: `qc_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("qc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// Record error by category.
///
/// Metric: `qc_errors_total`
/// Labels: `operation`, `error_type`
pub fn record_error(operation: &str, error_type: &str) {
    counter!("qc_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}
