//! Public health and metrics endpoints

use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde_json::json;

use crate::metrics;

use super::super::AppState;

/// Liveness probe. Answers even with the runtime down.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "instances": state.orchestrator.instance_count(),
    }))
}

/// Scrape-friendly text exposition of the fleet state.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let records = state.orchestrator.records();
    let body = metrics::render(&records, state.orchestrator.board());

    ([(header::CONTENT_TYPE, metrics::CONTENT_TYPE)], body)
}
