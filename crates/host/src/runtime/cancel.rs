//! Per-job cancellation tokens. Delegate sub-agents share their parent
//! job's token, so cancelling a job cancels its whole tree.

use std::collections::HashMap;

use parking_lot::Mutex;

use minder_domain::cancel::CancelToken;

#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a job.
    pub fn register(&self, job_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(job_id.to_owned(), token.clone());
        token
    }

    /// Signal cancellation. Returns true when a live token existed.
    pub fn cancel(&self, job_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(job_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token when the job finishes.
    pub fn remove(&self, job_id: &str) {
        self.tokens.lock().remove(job_id);
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.tokens.lock().contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_cancel_remove() {
        let map = CancelMap::new();
        let token = map.register("job-1");
        assert!(map.is_running("job-1"));
        assert!(!token.is_cancelled());

        assert!(map.cancel("job-1"));
        assert!(token.is_cancelled());

        map.remove("job-1");
        assert!(!map.is_running("job-1"));
        assert!(!map.cancel("job-1"));
    }

    #[test]
    fn cancel_unknown_job_is_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
    }
}
