//! HTTP router construction.
//!
//! Assembles all Axum routes and middleware into a single `Router`.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/tasks", get(api::tasks_list).post(api::tasks_create))
        .route(
            "/tasks/{id}",
            get(api::tasks_get)
                .put(api::tasks_update)
                .delete(api::tasks_delete),
        )
        .route("/tasks/{id}/enable", post(api::tasks_enable))
        .route("/tasks/{id}/disable", post(api::tasks_disable))
        .route("/tasks/{id}/trigger", post(api::tasks_trigger))
        .route("/webhooks/{*endpoint_id}", post(api::webhook_receive))
        .route("/cron/tick", post(api::cron_tick))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
