use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub task_count: usize,
    pub source_plugins: Vec<String>,
}

/// GET /health -- liveness plus a small inventory.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
        task_count: state.manager.store().task_count(),
        source_plugins: state.manager.registry().source_types(),
    })
}
