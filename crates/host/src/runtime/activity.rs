//! Activity hub — durable append plus an in-process broadcast per job so
//! API pollers can wake without busy-looping the store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use minder_store::{Activity, NewActivity, Store, StoreResult};

pub struct ActivityHub {
    store: Arc<Store>,
    channels: RwLock<HashMap<String, broadcast::Sender<Activity>>>,
}

impl ActivityHub {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Append to the durable log and fan out to live subscribers.
    /// Append failures are logged, never propagated — losing one progress
    /// record must not abort a job.
    pub fn record(&self, job_id: &str, activity: NewActivity) -> i64 {
        match self.try_record(job_id, activity) {
            Ok(seq) => seq,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "failed to append activity");
                0
            }
        }
    }

    fn try_record(&self, job_id: &str, activity: NewActivity) -> StoreResult<i64> {
        let seq = self.store.append_activity(job_id, activity)?;
        let channels = self.channels.read();
        if let Some(tx) = channels.get(job_id) {
            if let Ok((records, _)) = self.store.read_activities(job_id, Some(seq - 1)) {
                for record in records {
                    let _ = tx.send(record);
                }
            }
        }
        Ok(seq)
    }

    /// Subscribe to a job's live activity feed.
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<Activity> {
        let mut channels = self.channels.write();
        channels
            .entry(job_id.to_owned())
            .or_insert_with(|| broadcast::channel(128).0)
            .subscribe()
    }

    /// Drop the broadcast channel once a job is terminal.
    pub fn cleanup(&self, job_id: &str) {
        self.channels.write().remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minder_store::ActivityKind;

    fn hub_with_job() -> (ActivityHub, String) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let conv = store.create_conversation(None).unwrap();
        let (_, job) = store.submit_job(&conv.id, "t", None).unwrap();
        (ActivityHub::new(store), job.id)
    }

    #[tokio::test]
    async fn record_appends_and_broadcasts() {
        let (hub, job) = hub_with_job();
        let mut rx = hub.subscribe(&job);

        let seq = hub.record(&job, NewActivity::new(ActivityKind::Start, "go"));
        assert_eq!(seq, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.seq, 1);
        assert_eq!(received.kind, ActivityKind::Start);
    }

    #[tokio::test]
    async fn record_without_subscribers_is_fine() {
        let (hub, job) = hub_with_job();
        assert_eq!(hub.record(&job, NewActivity::new(ActivityKind::Start, "go")), 1);
        assert_eq!(hub.record(&job, NewActivity::new(ActivityKind::Step, "s")), 2);
    }
}
