//! Capability catalogue admin surface: list and register at runtime.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use minder_domain::capability::CapabilityDef;

use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "capabilities": state.catalog.defs() }))
}

/// Register (or replace) a capability. API-registered capabilities carry
/// instructions only; extra tool handlers require code.
pub async fn register(
    State(state): State<AppState>,
    Json(def): Json<CapabilityDef>,
) -> impl IntoResponse {
    if def.name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "capability name must not be empty" })),
        )
            .into_response();
    }
    let name = def.name.clone();
    state.catalog.register(def, Vec::new());
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "name": name })),
    )
        .into_response()
}
