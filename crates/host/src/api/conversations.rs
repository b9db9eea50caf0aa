//! Read-only conversation views and forking.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use minder_store::StoreError;

use crate::state::AppState;

use super::store_error;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub include_archived: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    match state.store.list_conversations(query.include_archived) {
        Ok(conversations) => {
            Json(serde_json::json!({ "conversations": conversations })).into_response()
        }
        Err(e) => store_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    pub since_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /conversations/{id}/messages` — internal messages stay hidden
/// from clients. Fetching marks the conversation read.
pub async fn messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> impl IntoResponse {
    if let Ok(None) | Err(_) = state.store.get_conversation(&id) {
        return store_error(StoreError::NotFound(format!("conversation {id}"))).into_response();
    }
    match state.store.read_messages(&id, query.since_id, query.limit) {
        Ok(records) => {
            if let Err(e) = state.store.mark_read(&id, chrono::Utc::now()) {
                tracing::warn!(conversation_id = %id, error = %e, "mark_read failed");
            }
            let visible: Vec<_> = records.into_iter().filter(|m| !m.internal).collect();
            Json(serde_json::json!({ "messages": visible })).into_response()
        }
        Err(e) => store_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ArchiveBody {
    pub archived: bool,
}

/// `POST /conversations/{id}/archive` — flip the archived flag.
pub async fn archive(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ArchiveBody>,
) -> impl IntoResponse {
    match state.store.set_archived(&id, body.archived) {
        Ok(()) => Json(serde_json::json!({ "id": id, "archived": body.archived })).into_response(),
        Err(e) => store_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ForkBody {
    pub message_id: i64,
}

/// `POST /conversations/{id}/fork` — branch a conversation at a message.
pub async fn fork(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ForkBody>,
) -> impl IntoResponse {
    match state.store.fork_conversation(&id, body.message_id) {
        Ok(conversation) => Json(serde_json::json!({
            "conversation_id": conversation.id,
            "forked_from": conversation.forked_from,
            "branch_number": conversation.branch_number,
        }))
        .into_response(),
        Err(e) => store_error(e).into_response(),
    }
}
