//! Schedule CRUD and manual triggering.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use minder_store::{ScheduleRecord, StoreError};

use crate::runtime::cron::{cron_next_tz, parse_tz, validate_cron};
use crate::runtime::scheduler::trigger_now;
use crate::state::AppState;

use super::store_error;

pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_schedules() {
        Ok(schedules) => Json(serde_json::json!({ "schedules": schedules })).into_response(),
        Err(e) => store_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    pub name: String,
    pub prompt: String,
    pub cron: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub context: Option<String>,
}

fn d_true() -> bool {
    true
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBody>,
) -> impl IntoResponse {
    if let Err(e) = validate_cron(&body.cron) {
        return bad_request(e);
    }

    let tz_name = body
        .timezone
        .unwrap_or_else(|| state.config.timezone.clone());
    let now = Utc::now();
    let next_fire_at = if body.enabled {
        cron_next_tz(&body.cron, &now, parse_tz(&tz_name))
    } else {
        None
    };

    let record = ScheduleRecord {
        id: Uuid::new_v4().to_string(),
        conversation_id: None,
        name: body.name,
        prompt: body.prompt,
        cron: body.cron,
        timezone: tz_name,
        enabled: body.enabled,
        next_fire_at,
        run_count: 0,
        source_conversation_id: None,
        context: body.context,
        created_at: now,
        updated_at: now,
    };

    match state.store.upsert_schedule(&record) {
        Ok(()) => {
            state.scheduler.notify();
            (StatusCode::CREATED, Json(serde_json::json!(record))).into_response()
        }
        Err(e) => store_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub context: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateBody>,
) -> impl IntoResponse {
    let mut record = match state.store.get_schedule(&id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            return store_error(StoreError::NotFound(format!("schedule {id}"))).into_response()
        }
        Err(e) => return store_error(e).into_response(),
    };

    if let Some(cron) = &body.cron {
        if let Err(e) = validate_cron(cron) {
            return bad_request(e);
        }
        record.cron = cron.clone();
    }
    if let Some(name) = body.name {
        record.name = name;
    }
    if let Some(prompt) = body.prompt {
        record.prompt = prompt;
    }
    if let Some(tz) = body.timezone {
        record.timezone = tz;
    }
    if let Some(context) = body.context {
        record.context = Some(context);
    }
    if let Some(enabled) = body.enabled {
        record.enabled = enabled;
    }

    // Re-enabling (or editing an enabled schedule) recomputes the cursor
    // from now; a disabled schedule has no next fire.
    record.next_fire_at = if record.enabled {
        cron_next_tz(&record.cron, &Utc::now(), parse_tz(&record.timezone))
    } else {
        None
    };
    record.updated_at = Utc::now();

    match state.store.upsert_schedule(&record) {
        Ok(()) => {
            state.scheduler.notify();
            Json(serde_json::json!(record)).into_response()
        }
        Err(e) => store_error(e).into_response(),
    }
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.delete_schedule(&id) {
        Ok(()) => {
            state.scheduler.notify();
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error(e).into_response(),
    }
}

/// `POST /schedules/{id}/trigger` — run now, without moving the cursor.
pub async fn trigger(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match trigger_now(&state, &id) {
        Ok((conversation_id, job)) => Json(serde_json::json!({
            "job_id": job.id,
            "conversation_id": conversation_id,
        }))
        .into_response(),
        Err(e) => store_error(e).into_response(),
    }
}

fn bad_request(message: String) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}
