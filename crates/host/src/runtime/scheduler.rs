//! CRON scheduler — one coroutine sleeping until the earliest enabled
//! next-fire, woken early when schedules change.
//!
//! At-most-once: the cursor (`next_fire_at`) is advanced and persisted
//! *before* the fire's job is enqueued, and fires that became due while
//! the process was down are dropped at startup reconciliation rather than
//! replayed.

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use minder_store::ScheduleRecord;

use crate::state::AppState;

use super::cron::{cron_next_tz, parse_tz};
use super::queue;

/// Wakes the scheduler when schedules are created, changed, or removed.
#[derive(Default)]
pub struct SchedulerSignal {
    notify: Notify,
}

impl SchedulerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Startup reconciliation: fires that came due while the process was not
/// running are skipped — the cursor jumps to the next occurrence from
/// now.
pub fn reconcile_missed(state: &AppState, now: DateTime<Utc>) -> usize {
    let Ok(schedules) = state.store.list_schedules() else {
        return 0;
    };
    let mut skipped = 0;
    for schedule in schedules {
        if !schedule.enabled {
            continue;
        }
        let Some(next) = schedule.next_fire_at else {
            continue;
        };
        if next <= now {
            let tz = parse_tz(&schedule.timezone);
            let recomputed = cron_next_tz(&schedule.cron, &now, tz);
            tracing::info!(
                schedule_id = %schedule.id,
                missed = %next,
                recomputed = ?recomputed,
                "dropping schedule fire missed while offline"
            );
            if let Err(e) = state
                .store
                .set_schedule_enabled(&schedule.id, true, recomputed)
            {
                tracing::warn!(schedule_id = %schedule.id, error = %e, "reconcile failed");
            }
            skipped += 1;
        }
    }
    skipped
}

/// Spawn the scheduler coroutine.
pub fn spawn_scheduler(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        scheduler_loop(state).await;
    })
}

pub async fn scheduler_loop(state: AppState) {
    tracing::info!("scheduler started");
    loop {
        let now = Utc::now();
        fire_due(&state, now).await;

        // Sleep until the earliest upcoming fire (capped so config drift
        // self-heals), or until schedules change.
        let sleep_for = match state.store.earliest_next_fire() {
            Ok(Some(next)) => {
                let delta = (next - Utc::now()).num_milliseconds().max(0) as u64;
                std::time::Duration::from_millis(delta.min(60_000))
            }
            _ => std::time::Duration::from_secs(60),
        };

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = state.scheduler.wait() => {}
        }
    }
}

/// Evaluate due schedules and fire each at most once.
pub async fn fire_due(state: &AppState, now: DateTime<Utc>) {
    let due = match state.store.due_schedules(now) {
        Ok(due) => due,
        Err(e) => {
            tracing::error!(error = %e, "reading due schedules failed");
            return;
        }
    };

    for schedule in due {
        let intended = schedule.next_fire_at.unwrap_or(now);
        let tz = parse_tz(&schedule.timezone);
        // Advance from the intended fire instant, not from now, so the
        // cadence never drifts with execution latency.
        let next = cron_next_tz(&schedule.cron, &intended, tz);

        // Persisted before the job exists: a crash after this point
        // drops the fire instead of doubling it.
        if let Err(e) = state.store.advance_schedule_fire(&schedule.id, next) {
            tracing::error!(schedule_id = %schedule.id, error = %e, "cursor advance failed");
            continue;
        }

        if let Err(e) = enqueue_fire(state, &schedule, intended) {
            tracing::error!(schedule_id = %schedule.id, error = %e, "schedule fire enqueue failed");
        }
    }
}

fn enqueue_fire(
    state: &AppState,
    schedule: &ScheduleRecord,
    intended: DateTime<Utc>,
) -> Result<(), minder_store::StoreError> {
    let prompt = match &schedule.context {
        Some(context) => format!("{context}\n\n{}", schedule.prompt),
        None => schedule.prompt.clone(),
    };

    let conversation = state.store.create_conversation(Some(&schedule.id))?;
    let (_, job) = state
        .store
        .submit_job(&conversation.id, &prompt, Some(intended))?;
    state.queue.wake();

    tracing::info!(
        schedule_id = %schedule.id,
        name = %schedule.name,
        job_id = %job.id,
        intended = %intended,
        "schedule fired"
    );
    Ok(())
}

/// Manual trigger: enqueue immediately without touching the cron cursor.
pub fn trigger_now(
    state: &AppState,
    schedule_id: &str,
) -> Result<(String, minder_store::Job), minder_store::StoreError> {
    let schedule = state
        .store
        .get_schedule(schedule_id)?
        .ok_or_else(|| minder_store::StoreError::NotFound(format!("schedule {schedule_id}")))?;

    let (conversation_id, _, job) =
        queue::submit(state, None, &schedule.prompt, None, Some(&schedule.id))?;
    Ok((conversation_id, job))
}
