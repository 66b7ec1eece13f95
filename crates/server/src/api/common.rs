//! Shared helpers and type aliases for API handlers.

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use foerderband_core::PipelineError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

/// Map a control-plane error to its HTTP response.
pub fn pipeline_err(e: PipelineError) -> (StatusCode, Json<ErrorResponse>) {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}
