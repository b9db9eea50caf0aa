//! Question gate — the rendezvous between a worker blocked inside
//! `ask_user` (or `oauth_required`) and the HTTP caller that answers it.
//!
//! Each suspended job owns one oneshot primitive keyed by job id. The
//! worker awaits the receiver; `POST /jobs/{id}/respond` signals it. After
//! a restart no primitive exists; the respond path then requeues the job
//! and the worker resume path rebuilds the pending tool result from the
//! persisted state instead of resuming a stack frame.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// What woke a blocked worker.
#[derive(Debug)]
pub enum GateSignal {
    /// The user's answer text.
    Response(String),
    /// The job was cancelled while suspended.
    Cancelled,
}

#[derive(Default)]
pub struct QuestionGate {
    waiters: Mutex<HashMap<String, oneshot::Sender<GateSignal>>>,
}

impl QuestionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the primitive for a job and return the receiver the worker
    /// blocks on. At most one pending question per job: arming again
    /// replaces (and thereby drops) a stale waiter.
    pub fn arm(&self, job_id: &str) -> oneshot::Receiver<GateSignal> {
        let (tx, rx) = oneshot::channel();
        let previous = self.waiters.lock().insert(job_id.to_owned(), tx);
        if previous.is_some() {
            tracing::warn!(job_id, "replacing stale question-gate waiter");
        }
        rx
    }

    /// Deliver the user's response. Returns false when no live waiter
    /// exists (the caller then takes the requeue path).
    pub fn signal_response(&self, job_id: &str, response: &str) -> bool {
        match self.waiters.lock().remove(job_id) {
            Some(tx) => tx.send(GateSignal::Response(response.to_owned())).is_ok(),
            None => false,
        }
    }

    /// Release a suspended worker with a cancellation.
    pub fn signal_cancel(&self, job_id: &str) -> bool {
        match self.waiters.lock().remove(job_id) {
            Some(tx) => tx.send(GateSignal::Cancelled).is_ok(),
            None => false,
        }
    }

    pub fn is_armed(&self, job_id: &str) -> bool {
        self.waiters.lock().contains_key(job_id)
    }

    /// Drop the waiter without signalling (job finalized elsewhere).
    pub fn disarm(&self, job_id: &str) {
        self.waiters.lock().remove(job_id);
    }
}
