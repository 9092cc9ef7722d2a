//! Quiz Controller
//!
//! Real-time multiplayer quiz coordinator. Serves:
//! - WebSocket endpoint for players (`/ws/:room_code/:player_name`)
//! - Health probes and Prometheus metrics on a separate listener
//!
//! # Startup
//!
//! 1. Load configuration from `QC_*` environment variables
//! 2. Install the Prometheus recorder
//! 3. Load the question bank
//! 4. Spawn the session registry actor
//! 5. Bind the health and WebSocket listeners, then report ready
//!
//! # Shutdown
//!
//! On Ctrl+C readiness is withdrawn, every room receives `room_closed` and
//! both listeners drain.

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use quiz_controller::actors::{ActorMetrics, SessionRegistryHandle};
use quiz_controller::config::Config;
use quiz_controller::observability::{health_router, init_metrics_recorder, HealthState};
use quiz_controller::questions::QuestionBank;
use quiz_controller::transport::{ws_router, TransportState};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quiz_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Quiz Controller");

    let config = Config::from_env()
        .inspect_err(|e| error!(error = %e, "Failed to load configuration"))
        .context("loading configuration")?;

    info!(
        qc_id = %config.qc_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        questions_per_game = config.questions_per_game,
        tick_ms = config.timings.tick.as_millis(),
        question_time_limit = config.timings.question_time_limit,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder()
        .map_err(anyhow::Error::msg)
        .context("installing metrics recorder")?;
    info!("Prometheus metrics recorder initialized");

    let bank = match config.question_bank_path.as_deref() {
        Some(path) => match QuestionBank::from_path(path) {
            Ok(bank) => {
                info!(
                    path = %path,
                    questions = bank.len(),
                    categories = ?bank.categories(),
                    "Question bank loaded"
                );
                bank
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to load question bank, rooms will have no questions");
                QuestionBank::empty()
            }
        },
        None => {
            warn!("QC_QUESTION_BANK_PATH not set, rooms will have no questions");
            QuestionBank::empty()
        }
    };

    let health_state = Arc::new(HealthState::new(config.qc_id.clone()));

    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let registry = SessionRegistryHandle::new(
        config.qc_id.clone(),
        config.timings,
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    let shutdown_token = registry.child_token();

    // Health + metrics listener
    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .with_context(|| format!("invalid health bind address {}", config.health_bind_address))?;
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("binding health server to {health_addr}"))?;
    let health_app = health_router(Arc::clone(&health_state), Some(prometheus_handle));

    let health_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // WebSocket listener
    let ws_addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address))?;
    let ws_listener = tokio::net::TcpListener::bind(ws_addr)
        .await
        .with_context(|| format!("binding WebSocket server to {ws_addr}"))?;
    let ws_app = ws_router(TransportState {
        registry: registry.clone(),
        bank: Arc::new(bank),
        questions_per_game: config.questions_per_game,
        outbound_buffer: config.outbound_buffer,
    })
    .layer(TraceLayer::new_for_http());

    let ws_shutdown = shutdown_token.clone();
    let ws_server = tokio::spawn(async move {
        info!(addr = %ws_addr, "WebSocket server starting");
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_shutdown.cancelled().await;
            info!("WebSocket server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "WebSocket server failed");
        }
    });

    health_state.set_ready();
    info!("Quiz Controller running - press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    health_state.set_not_ready();

    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }

    if let Err(e) = ws_server.await {
        warn!(error = %e, "WebSocket server task failed");
    }

    info!(
        sessions = actor_metrics.session_count(),
        "Quiz Controller shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}
