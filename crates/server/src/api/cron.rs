//! Cron tick surface. The process owns no timer: an external scheduler
//! POSTs here and every enabled cron task due at the tick time runs.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use foerderband_manager::RunSummary;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CronTickRequest {
    /// Tick time override for skew-controlled schedulers; defaults to
    /// wall clock.
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CronTaskResult {
    pub task_id: String,
    pub summary: RunSummary,
}

#[derive(Debug, Serialize)]
pub struct CronTickResponse {
    pub triggered: usize,
    pub results: Vec<CronTaskResult>,
}

/// POST /cron/tick
pub async fn cron_tick(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CronTickRequest>>,
) -> Json<CronTickResponse> {
    let time = body.and_then(|Json(req)| req.time);
    let results: Vec<CronTaskResult> = state
        .manager
        .trigger_all_enabled_cron_tasks(time)
        .await
        .into_iter()
        .map(|(task_id, summary)| CronTaskResult { task_id, summary })
        .collect();

    Json(CronTickResponse {
        triggered: results.len(),
        results,
    })
}
