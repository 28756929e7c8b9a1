//! HTTP router
//!
//! Public routes (`/health`, `/metrics`) plus the token-protected `/api`
//! surface for lifecycle, telemetry, logs and workspace files.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{any, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::orchestrator::Orchestrator;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the HTTP router with all routes.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/instances", get(handlers::instances::list_instances))
        .route("/launch", post(handlers::instances::launch_instance))
        .route("/stop", post(handlers::instances::stop_instance))
        .route("/destroy", post(handlers::instances::destroy_instance))
        .route("/stats/:id", get(handlers::instances::instance_stats))
        .route("/logs/:id", get(handlers::logs::tail_logs))
        .route("/logs/:id/stream", any(handlers::logs::stream_logs))
        .route("/files/:id", get(handlers::files::list_files))
        .route(
            "/files/:id/:name",
            get(handlers::files::read_file).put(handlers::files::write_file),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(handlers::system::health))
        .route("/metrics", get(handlers::system::metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
