//! Channel supersession tracking.
//!
//! Per (channel, target) pair the tracker keeps a pointer to the most
//! recently enqueued job. Replaceable channels use it twice: at enqueue
//! time to best-effort remove the previous pending occupant, and at claim
//! time as the authoritative "still latest?" check. Non-replaceable
//! channels get pointers too, for telemetry and cleanup symmetry, but are
//! never skipped at claim time: every enqueued non-replaceable job
//! executes.

use std::sync::Arc;

use clickrush_common::AppResult;
use clickrush_store::SortedStore;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::job_store::JobStore;

/// Tracker for per-(channel, target) latest-occupant pointers.
#[derive(Clone)]
pub struct SupersessionTracker {
    store: Arc<dyn SortedStore>,
    prefix: String,
    pointer_ttl_secs: i64,
}

impl SupersessionTracker {
    /// Create a tracker over the given store.
    pub fn new(store: Arc<dyn SortedStore>, prefix: &str, pointer_ttl_secs: i64) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            pointer_ttl_secs,
        }
    }

    fn pointer_key(&self, channel_full_name: &str, target: &str) -> String {
        format!("{}:chan:{channel_full_name}:{target}", self.prefix)
    }

    /// Enqueue-time pre-removal for a replaceable channel: if the pointer
    /// names a job that is still pending, remove it.
    ///
    /// Best-effort by design. A failure here is logged and swallowed; the
    /// claim-time check is the authoritative safety net.
    pub async fn supersede_pending(
        &self,
        channel: &Channel,
        target: &str,
        jobs: &JobStore,
    ) -> AppResult<()> {
        let key = self.pointer_key(&channel.full_name(), target);
        let Some(previous) = self.store.get(&key).await? else {
            return Ok(());
        };

        match jobs.remove(&previous).await {
            Ok(true) => {
                debug!(
                    channel = %channel,
                    target = %target,
                    job_id = %previous,
                    "Superseded pending job at enqueue"
                );
            }
            Ok(false) => {
                // Already claimed or terminal; the claim-time check covers it.
                debug!(
                    channel = %channel,
                    target = %target,
                    job_id = %previous,
                    "Previous occupant no longer pending"
                );
            }
            Err(e) => {
                warn!(
                    channel = %channel,
                    target = %target,
                    job_id = %previous,
                    error = %e,
                    "Failed to remove superseded job"
                );
            }
        }
        Ok(())
    }

    /// Point the channel at a newly enqueued job. Last writer wins.
    pub async fn record(
        &self,
        channel_full_name: &str,
        target: &str,
        job_id: &str,
    ) -> AppResult<()> {
        let key = self.pointer_key(channel_full_name, target);
        self.store.set_ex(&key, job_id, self.pointer_ttl_secs).await
    }

    /// Claim-time check: is this job still the latest occupant?
    ///
    /// An absent pointer (expired TTL) means no newer occupant is on
    /// record, so the job executes.
    pub async fn is_current(
        &self,
        channel_full_name: &str,
        target: &str,
        job_id: &str,
    ) -> AppResult<bool> {
        let key = self.pointer_key(channel_full_name, target);
        Ok(self
            .store
            .get(&key)
            .await?
            .is_none_or(|current| current == job_id))
    }

    /// Terminal-outcome cleanup: delete the pointer only if it still names
    /// this job, so a newer occupant's pointer is never clobbered.
    pub async fn clear_if_current(
        &self,
        channel_full_name: &str,
        target: &str,
        job_id: &str,
    ) -> AppResult<()> {
        let key = self.pointer_key(channel_full_name, target);
        self.store.del_if_eq(&key, job_id).await?;
        Ok(())
    }

    /// Current pointer value, for telemetry.
    pub async fn current(
        &self,
        channel_full_name: &str,
        target: &str,
    ) -> AppResult<Option<String>> {
        self.store
            .get(&self.pointer_key(channel_full_name, target))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::job::{Job, JobKind, JobPayload, JobState};
    use crate::retry::RetryConfig;
    use crate::transport::MessageOptions;
    use chrono::Utc;
    use clickrush_store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, JobStore, SupersessionTracker) {
        let store = Arc::new(MemoryStore::new());
        let jobs = JobStore::new(store.clone(), "test", RetryConfig::default(), 30);
        let tracker = SupersessionTracker::new(store.clone(), "test", 300);
        (store, jobs, tracker)
    }

    fn test_job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            kind: JobKind::SendMessage,
            target: "chat-1".to_string(),
            payload: JobPayload::Message {
                text: "hi".to_string(),
                options: MessageOptions::default(),
            },
            priority: 0,
            ready_at: 0,
            attempt: 0,
            max_attempts: 3,
            channel: None,
            state: JobState::Waiting,
            seq: 0,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_record_and_is_current() {
        let (_, _, tracker) = setup();

        tracker.record("Menu:navigation", "chat-1", "j1").await.unwrap();
        assert!(tracker.is_current("Menu:navigation", "chat-1", "j1").await.unwrap());

        tracker.record("Menu:navigation", "chat-1", "j2").await.unwrap();
        assert!(!tracker.is_current("Menu:navigation", "chat-1", "j1").await.unwrap());
        assert!(tracker.is_current("Menu:navigation", "chat-1", "j2").await.unwrap());
    }

    #[tokio::test]
    async fn test_absent_pointer_counts_as_current() {
        let (_, _, tracker) = setup();
        assert!(tracker.is_current("Menu:navigation", "chat-1", "j1").await.unwrap());
    }

    #[tokio::test]
    async fn test_supersede_pending_removes_old_job() {
        let (_, jobs, tracker) = setup();
        let channel = Channel::new("Menu", "navigation", true).unwrap();

        jobs.enqueue(test_job("old")).await.unwrap();
        tracker.record("Menu:navigation", "chat-1", "old").await.unwrap();

        tracker
            .supersede_pending(&channel, "chat-1", &jobs)
            .await
            .unwrap();

        assert!(jobs.claim_next().await.unwrap().is_none());
        let old = jobs.load("old").await.unwrap().unwrap();
        assert_eq!(old.state, JobState::Removed);
    }

    #[tokio::test]
    async fn test_clear_if_current_spares_newer_pointer() {
        let (_, _, tracker) = setup();

        tracker.record("Menu:navigation", "chat-1", "j2").await.unwrap();

        // j1's terminal cleanup must not delete j2's pointer.
        tracker
            .clear_if_current("Menu:navigation", "chat-1", "j1")
            .await
            .unwrap();
        assert_eq!(
            tracker.current("Menu:navigation", "chat-1").await.unwrap(),
            Some("j2".to_string())
        );

        tracker
            .clear_if_current("Menu:navigation", "chat-1", "j2")
            .await
            .unwrap();
        assert_eq!(tracker.current("Menu:navigation", "chat-1").await.unwrap(), None);
    }
}
