//! Task CRUD and manual-trigger endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;

use foerderband_manager::{RunSummary, Task, TaskDefinition, TaskPatch};

use crate::state::AppState;

use super::common::{pipeline_err, ApiResult};

/// POST /tasks -- schedule a new task.
pub async fn tasks_create(
    State(state): State<Arc<AppState>>,
    Json(def): Json<TaskDefinition>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state
        .manager
        .schedule_task(def)
        .await
        .map_err(pipeline_err)?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /tasks -- list all tasks.
pub async fn tasks_list(State(state): State<Arc<AppState>>) -> Json<Vec<Task>> {
    Json(state.manager.list_tasks())
}

/// GET /tasks/{id}
pub async fn tasks_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    let task = state.manager.get_task(&id).map_err(pipeline_err)?;
    Ok(Json(task))
}

/// PUT /tasks/{id} -- partial update.
pub async fn tasks_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<Task>> {
    let task = state
        .manager
        .update_task(&id, patch)
        .await
        .map_err(pipeline_err)?;
    Ok(Json(task))
}

/// DELETE /tasks/{id} -- deregisters the webhook link first; a failed
/// deregistration aborts the delete.
pub async fn tasks_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.manager.delete_task(&id).await.map_err(pipeline_err)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /tasks/{id}/enable
pub async fn tasks_enable(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    let task = state.manager.enable_task(&id).await.map_err(pipeline_err)?;
    Ok(Json(task))
}

/// POST /tasks/{id}/disable
pub async fn tasks_disable(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    let task = state
        .manager
        .disable_task(&id)
        .await
        .map_err(pipeline_err)?;
    Ok(Json(task))
}

/// POST /tasks/{id}/trigger -- manual run with an optional payload body.
/// Disabled tasks are rejected with 403.
pub async fn tasks_trigger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Option<Json<Value>>,
) -> ApiResult<Json<RunSummary>> {
    let summary = state
        .manager
        .trigger_manual(&id, payload.map(|Json(v)| v))
        .await
        .map_err(pipeline_err)?;
    Ok(Json(summary))
}
