//! HTTP API — the submission/status surface in front of the execution
//! core. Progress is activity-grained: clients poll job views with an
//! activity watermark.

pub mod capabilities;
pub mod chat;
pub mod conversations;
pub mod jobs;
pub mod schedules;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, patch, post};
use axum::Router;

use minder_store::StoreError;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat::submit))
        .route("/jobs", get(jobs::list))
        .route("/jobs/:id", get(jobs::view))
        .route("/jobs/:id/respond", post(jobs::respond))
        .route("/jobs/:id/cancel", post(jobs::cancel))
        .route("/conversations", get(conversations::list))
        .route("/conversations/:id/messages", get(conversations::messages))
        .route("/conversations/:id/fork", post(conversations::fork))
        .route("/conversations/:id/archive", post(conversations::archive))
        .route("/schedules", get(schedules::list).post(schedules::create))
        .route(
            "/schedules/:id",
            patch(schedules::update).delete(schedules::delete),
        )
        .route("/schedules/:id/trigger", post(schedules::trigger))
        .route(
            "/capabilities",
            get(capabilities::list).post(capabilities::register),
        )
        .route("/health", get(health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let depth = state.store.queue_depth().unwrap_or(0);
    Json(serde_json::json!({
        "status": "ok",
        "queue_depth": depth,
    }))
}

/// Map store failures onto HTTP statuses.
pub(crate) fn store_error(e: StoreError) -> (StatusCode, Json<serde_json::Value>) {
    let (status, kind) = match &e {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        StoreError::NoPendingQuestion(_) => (StatusCode::CONFLICT, "no_pending_question"),
        StoreError::IllegalTransition { .. } => (StatusCode::CONFLICT, "illegal_transition"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (
        status,
        Json(serde_json::json!({ "error": kind, "detail": e.to_string() })),
    )
}
