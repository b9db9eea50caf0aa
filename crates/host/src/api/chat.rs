//! `POST /chat` — submit a user message, creating the conversation on
//! first contact.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::runtime::queue;
use crate::state::AppState;

use super::store_error;

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

pub async fn submit(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> impl IntoResponse {
    match queue::submit(
        &state,
        body.conversation_id.as_deref(),
        &body.message,
        None,
        None,
    ) {
        Ok((conversation_id, message_id, job)) => Json(serde_json::json!({
            "job_id": job.id,
            "conversation_id": conversation_id,
            "message_id": message_id,
        }))
        .into_response(),
        Err(e) => store_error(e).into_response(),
    }
}
