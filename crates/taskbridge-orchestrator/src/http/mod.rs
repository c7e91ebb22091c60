//! HTTP server for the orchestration layer.
//!
//! Provides endpoints for:
//! - Scheduling tasks (`/v1/tasks`)
//! - Status, cancel, signal and result per execution (`/v1/tasks/:id/...`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bridge::OrchestratorBridge;

mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(bridge: Arc<OrchestratorBridge>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Task routes
        .route("/v1/tasks", post(handlers::schedule_task))
        .route("/v1/tasks/:id", get(handlers::get_task_status))
        .route("/v1/tasks/:id/cancel", post(handlers::cancel_task))
        .route("/v1/tasks/:id/signals/:name", post(handlers::signal_task))
        .route("/v1/tasks/:id/result", get(handlers::get_task_result))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(bridge)
}
