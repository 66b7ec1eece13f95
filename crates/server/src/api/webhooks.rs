//! Webhook ingress: the HTTP surface external services call back into.
//!
//! Request headers and body are opaque here; verification, fan-out, and
//! cursor bookkeeping all happen in the manager. Responses use the
//! dispatch status mapping: 200 processed (possibly "no task matched"),
//! 400 malformed, 401 signature/token mismatch, 404 no enabled task.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use foerderband_manager::RunSummary;

use crate::state::AppState;

use super::common::{pipeline_err, ApiResult};

/// POST /webhooks/{endpoint_id}
pub async fn webhook_receive(
    State(state): State<Arc<AppState>>,
    Path(endpoint_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<RunSummary>> {
    let headers = header_map(&headers);
    let summary = state
        .manager
        .trigger_webhook(&endpoint_id, &headers, &body)
        .await
        .map_err(pipeline_err)?;
    Ok(Json(summary))
}

/// Flatten HTTP headers into the verifier's map shape. Non-UTF8 values
/// are dropped; webhook signatures and tokens are always ASCII.
fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}
