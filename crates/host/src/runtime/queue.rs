//! Job queue dispatch: durable `jobs` rows in the store plus an
//! in-process `Notify` for low-latency wakeups. Claiming enforces the
//! per-conversation exclusivity invariant inside the store transaction.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::state::AppState;

use super::agent::run_job;

/// Wakes sleeping workers when work may be available.
#[derive(Default)]
pub struct QueueSignal {
    notify: Notify,
}

impl QueueSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after a job submission or any event that may unpark work
    /// (job finished, suspended job requeued).
    pub fn wake(&self) {
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Spawn the configured worker pool. Handles are returned so the caller
/// (or a test) can abort them.
pub fn spawn_workers(state: AppState) -> Vec<JoinHandle<()>> {
    let count = state.config.queue.worker_count.max(1);
    (0..count)
        .map(|i| {
            let state = state.clone();
            let worker_id = format!("worker-{i}");
            tokio::spawn(async move {
                worker_loop(state, worker_id).await;
            })
        })
        .collect()
}

/// One worker: claim → run → repeat; park on the queue signal when no
/// claimable job exists. The idle timeout is a safety net against a lost
/// wakeup, not the primary dispatch path.
pub async fn worker_loop(state: AppState, worker_id: String) {
    tracing::info!(worker_id, "worker started");
    loop {
        let claimed = match state.store.claim_next_pending(&worker_id) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "claim failed");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        match claimed {
            Some(job) => {
                tracing::info!(worker_id, job_id = %job.id, "job claimed");
                run_job(state.clone(), job, &worker_id).await;
                // Finishing may unblock a parked job of the same
                // conversation.
                state.queue.wake();
            }
            None => {
                tokio::select! {
                    _ = state.queue.wait() => {}
                    _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
                }
            }
        }
    }
}

/// Submission helper shared by the HTTP layer and the scheduler: ensures
/// the conversation, persists message + pending job atomically, wakes the
/// pool, and reports the queue-depth soft warning.
pub fn submit(
    state: &AppState,
    conversation_id: Option<&str>,
    text: &str,
    trigger_time: Option<chrono::DateTime<chrono::Utc>>,
    scheduler_id: Option<&str>,
) -> Result<(String, i64, minder_store::Job), minder_store::StoreError> {
    let conversation_id = match conversation_id {
        Some(id) => {
            state
                .store
                .get_conversation(id)?
                .ok_or_else(|| minder_store::StoreError::NotFound(format!("conversation {id}")))?;
            id.to_string()
        }
        None => state.store.create_conversation(scheduler_id)?.id,
    };

    let (message_seq, job) = state.store.submit_job(&conversation_id, text, trigger_time)?;

    let depth = state.store.queue_depth().unwrap_or(0);
    if depth > state.config.queue.warn_depth {
        tracing::warn!(depth, threshold = state.config.queue.warn_depth, "queue depth high");
    }

    state.queue.wake();
    Ok((conversation_id, message_seq, job))
}

pub type WorkerHandles = Vec<JoinHandle<()>>;

/// Abort the worker pool (test teardown).
pub fn stop_workers(handles: &WorkerHandles) {
    for handle in handles {
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wake_unparks_a_waiter() {
        let signal = Arc::new(QueueSignal::new());
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
            7
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        signal.wake();
        assert_eq!(handle.await.unwrap(), 7);
    }
}
