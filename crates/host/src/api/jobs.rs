//! Job views, responses, and cancellation.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::Value;

use minder_store::{JobStatus, StoreError};

use crate::runtime::agent::finalize_cancelled;
use crate::state::AppState;

use super::store_error;

#[derive(Debug, Deserialize)]
pub struct ViewQuery {
    #[serde(default)]
    pub since_activity_id: Option<i64>,
}

/// `GET /jobs/{id}` — status, activity delta since the watermark, and the
/// pending question / OAuth payload when suspended.
pub async fn view(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ViewQuery>,
) -> impl IntoResponse {
    let job = match state.store.get_job(&id) {
        Ok(Some(job)) => job,
        Ok(None) => return store_error(StoreError::NotFound(format!("job {id}"))).into_response(),
        Err(e) => return store_error(e).into_response(),
    };

    let (activities, latest) = match state.store.read_activities(&id, query.since_activity_id) {
        Ok(pair) => pair,
        Err(e) => return store_error(e).into_response(),
    };
    let current_activity = activities.last().map(|a| a.message.clone());

    let mut view = serde_json::json!({
        "id": job.id,
        "conversation_id": job.conversation_id,
        "status": job.status,
        "created_at": job.created_at,
        "started_at": job.started_at,
        "ended_at": job.ended_at,
        "result": job.result,
        "error": job.error,
        "activities": activities,
        "latest_activity_id": latest,
        "current_activity": current_activity,
    });

    if let Some(payload) = &job.pending_payload {
        match payload.get("kind").and_then(Value::as_str) {
            Some("question") => {
                view["question"] = payload.get("question").cloned().unwrap_or(Value::Null);
                view["options"] = payload.get("options").cloned().unwrap_or(Value::Null);
            }
            Some("oauth") => {
                view["oauth"] = serde_json::json!({
                    "provider": payload.get("provider"),
                    "auth_url": payload.get("auth_url"),
                });
            }
            _ => {}
        }
    }

    Json(view).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default = "d_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn d_limit() -> usize {
    50
}

/// `GET /jobs` — filtered, paginated listing, newest first.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let status = match query.status.as_deref() {
        Some(s) => match JobStatus::parse(s) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": format!("unknown status '{s}'") })),
                )
                    .into_response();
            }
        },
        None => None,
    };

    match state.store.list_jobs(
        status,
        query.conversation_id.as_deref(),
        query.limit.min(500),
        query.offset,
    ) {
        Ok((jobs, total)) => Json(serde_json::json!({ "jobs": jobs, "total": total })).into_response(),
        Err(e) => store_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RespondBody {
    pub response: String,
}

/// `POST /jobs/{id}/respond` — resolve a suspended job.
///
/// With a live waiter the blocked worker is signalled directly; after a
/// restart the job is requeued and a worker rebuilds the pending tool
/// result from persisted state.
pub async fn respond(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RespondBody>,
) -> impl IntoResponse {
    let job = match state.store.get_job(&id) {
        Ok(Some(job)) => job,
        Ok(None) => return store_error(StoreError::NotFound(format!("job {id}"))).into_response(),
        Err(e) => return store_error(e).into_response(),
    };

    if !matches!(
        job.status,
        JobStatus::WaitingForInput | JobStatus::OauthPending
    ) {
        return store_error(StoreError::NoPendingQuestion(id)).into_response();
    }

    if state.gate.is_armed(&id) {
        match state
            .store
            .resume_suspended(&id, &body.response, JobStatus::Running)
        {
            Ok((_, job)) => {
                if !state.gate.signal_response(&id, &body.response) {
                    // The waiter vanished between the check and the
                    // signal; hand the job back to the pool instead.
                    if let Err(e) = state.store.update_job_status(&id, JobStatus::Pending) {
                        tracing::error!(job_id = %id, error = %e, "requeue after lost waiter failed");
                    }
                    state.queue.wake();
                }
                Json(serde_json::json!({ "status": job.status })).into_response()
            }
            Err(e) => store_error(e).into_response(),
        }
    } else {
        match state
            .store
            .resume_suspended(&id, &body.response, JobStatus::Pending)
        {
            Ok((_, job)) => {
                state.queue.wake();
                Json(serde_json::json!({ "status": job.status })).into_response()
            }
            Err(e) => store_error(e).into_response(),
        }
    }
}

/// `POST /jobs/{id}/cancel` — cooperative cancellation. Idempotent on
/// terminal jobs (returns the current status unchanged).
pub async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let status = match state.store.request_cancel(&id) {
        Ok(status) => status,
        Err(e) => return store_error(e).into_response(),
    };

    if status.is_terminal() {
        return Json(serde_json::json!({ "status": status })).into_response();
    }

    state.cancel_map.cancel(&id);

    if matches!(
        status,
        JobStatus::WaitingForInput | JobStatus::OauthPending
    ) && !state.gate.signal_cancel(&id)
    {
        // No live waiter (restart case): finalize here.
        if let Ok(Some(job)) = state.store.get_job(&id) {
            finalize_cancelled(&state, &job).await;
        }
    }

    let current = state
        .store
        .get_job(&id)
        .ok()
        .flatten()
        .map(|j| j.status)
        .unwrap_or(status);
    Json(serde_json::json!({ "status": current })).into_response()
}
