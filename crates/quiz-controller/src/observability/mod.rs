//! Observability for the Quiz Controller.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Participant identities are logged; chat text and answers are not.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `qc_sessions_active` | Gauge | none | Live rooms |
//! | `qc_participants_active` | Gauge | none | Participants across live rooms |
//! | `qc_rounds_revealed_total` | Counter | `trigger` | Reveals by timeout vs early completion |
//! | `qc_transport_faults_total` | Counter | none | Participants dropped on send failure |
//! | `qc_sessions_closed_total` | Counter | `reason` | Room teardown causes |
//! | `qc_actor_panics_total` | Counter | `actor_type` | Actor task panics |
//! | `qc_message_latency_seconds` | Histogram | `message_type` | Inbound message handling time |
//! | `qc_errors_total` | Counter | `operation`, `error_type` | Request failures |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_actor_panic, record_error, record_message_latency,
    record_round_revealed, record_session_closed, record_transport_fault,
    set_participants_active, set_sessions_active,
};
