//! Durable, shared job store with priority ordering and delayed visibility.
//!
//! Layout in the backing store (all keys under a configurable prefix):
//!
//! - `job:{id}` — serialized job record
//! - `queue:ready` — claimable jobs, scored so that a single atomic
//!   pop yields the highest-priority, oldest job
//! - `queue:delayed` — jobs not yet visible, scored by `ready_at`
//! - `queue:active` — claimed jobs, scored by their lease deadline
//! - `queue:paused` — pause flag
//! - `queue:seq` — monotone enqueue sequence
//! - `stats:completed` / `stats:failed` — terminal outcome counters
//!
//! Claim atomicity rests on the store's `zpop_min_move`, which pops the
//! ready member and registers its lease in one step, so a claimed job is
//! always in exactly one queue zset. Promotion and stall recovery rest on
//! `zrem` returning whether the caller won the member. Both are safe with
//! multiple worker processes sharing one store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clickrush_common::AppResult;
use clickrush_store::SortedStore;
use tracing::{debug, warn};

use crate::job::{Job, JobState};
use crate::retry::RetryConfig;

/// Width of one priority tier in the ready-queue score space.
///
/// Sequence numbers occupy the low bits; priorities are negated so that a
/// higher priority sorts to a lower score and `zpop_min` claims it first.
const PRIORITY_BAND: f64 = (1_u64 << 40) as f64;

/// How long terminal job records are kept for inspection.
const TERMINAL_RECORD_TTL_SECS: i64 = 3600;

/// Batch size for promotion and stall-recovery sweeps.
const MAINTENANCE_BATCH: u64 = 100;

/// Queue depth statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Jobs ready to be claimed.
    pub waiting: u64,
    /// Jobs currently held by workers.
    pub active: u64,
    /// Jobs that completed successfully.
    pub completed: u64,
    /// Jobs that exhausted their retries.
    pub failed: u64,
    /// Jobs waiting on a future `ready_at` or retry backoff.
    pub delayed: u64,
}

/// Shared record of pending/active/terminal work items.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn SortedStore>,
    prefix: String,
    retry: RetryConfig,
    lease_secs: i64,
}

impl JobStore {
    /// Create a job store over the given backing store.
    pub fn new(
        store: Arc<dyn SortedStore>,
        prefix: &str,
        retry: RetryConfig,
        lease_secs: i64,
    ) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            retry,
            lease_secs,
        }
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:job:{id}", self.prefix)
    }

    fn ready_key(&self) -> String {
        format!("{}:queue:ready", self.prefix)
    }

    fn delayed_key(&self) -> String {
        format!("{}:queue:delayed", self.prefix)
    }

    fn active_key(&self) -> String {
        format!("{}:queue:active", self.prefix)
    }

    fn paused_key(&self) -> String {
        format!("{}:queue:paused", self.prefix)
    }

    fn seq_key(&self) -> String {
        format!("{}:queue:seq", self.prefix)
    }

    fn stat_key(&self, outcome: &str) -> String {
        format!("{}:stats:{outcome}", self.prefix)
    }

    #[allow(clippy::cast_precision_loss)]
    fn ready_score(priority: i32, seq: i64) -> f64 {
        -f64::from(priority) * PRIORITY_BAND + seq as f64
    }

    async fn save(&self, job: &Job) -> AppResult<()> {
        let record = serde_json::to_string(job)?;
        self.store.set(&self.job_key(&job.id), &record).await
    }

    async fn save_terminal(&self, job: &Job) -> AppResult<()> {
        let record = serde_json::to_string(job)?;
        self.store
            .set_ex(&self.job_key(&job.id), &record, TERMINAL_RECORD_TTL_SECS)
            .await
    }

    /// Load a job record, if it still exists.
    pub async fn load(&self, id: &str) -> AppResult<Option<Job>> {
        match self.store.get(&self.job_key(id)).await? {
            Some(record) => Ok(Some(serde_json::from_str(&record)?)),
            None => Ok(None),
        }
    }

    /// Persist a new job and make it claimable (or delayed).
    pub async fn enqueue(&self, mut job: Job) -> AppResult<String> {
        job.seq = self.store.incr(&self.seq_key()).await?;

        let now_ms = Utc::now().timestamp_millis();
        job.state = if job.ready_at > now_ms {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        self.save(&job).await?;

        #[allow(clippy::cast_precision_loss)]
        if job.state == JobState::Delayed {
            self.store
                .zadd(&self.delayed_key(), job.ready_at as f64, &job.id)
                .await?;
        } else {
            self.store
                .zadd(
                    &self.ready_key(),
                    Self::ready_score(job.priority, job.seq),
                    &job.id,
                )
                .await?;
        }

        debug!(
            job_id = %job.id,
            priority = job.priority,
            state = ?job.state,
            "Enqueued job"
        );
        Ok(job.id)
    }

    /// Atomically claim the next ready job, highest priority first, FIFO
    /// within a tier. Returns `None` when the queue is empty or paused.
    pub async fn claim_next(&self) -> AppResult<Option<Job>> {
        if self.is_paused().await? {
            return Ok(None);
        }

        loop {
            // Pop and lease in one store call; the job moves straight from
            // the ready zset to the active zset, so a crash here still
            // leaves it visible to stall recovery.
            let deadline_ms = Utc::now().timestamp_millis() + self.lease_secs * 1000;
            #[allow(clippy::cast_precision_loss)]
            let moved = self
                .store
                .zpop_min_move(&self.ready_key(), &self.active_key(), deadline_ms as f64)
                .await?;
            let Some(id) = moved else {
                return Ok(None);
            };

            let Some(mut job) = self.load(&id).await? else {
                debug!(job_id = %id, "Skipping claim of vanished job record");
                self.store.zrem(&self.active_key(), &id).await?;
                continue;
            };
            if job.state != JobState::Waiting {
                debug!(job_id = %id, state = ?job.state, "Skipping claim of non-waiting job");
                self.store.zrem(&self.active_key(), &id).await?;
                continue;
            }

            job.state = JobState::Active;
            job.attempt += 1;
            self.save(&job).await?;

            return Ok(Some(job));
        }
    }

    /// Record a successful execution.
    pub async fn mark_completed(&self, job: &mut Job) -> AppResult<()> {
        self.store.zrem(&self.active_key(), &job.id).await?;
        job.state = JobState::Completed;
        self.save_terminal(job).await?;
        self.store.incr(&self.stat_key("completed")).await?;
        debug!(job_id = %job.id, attempt = job.attempt, "Job completed");
        Ok(())
    }

    /// Record a failed execution. Returns whether the job was re-queued
    /// for another attempt.
    ///
    /// `delay_hint` overrides the exponential backoff when the platform
    /// suggested its own retry delay.
    pub async fn mark_failed(
        &self,
        job: &mut Job,
        error: &str,
        delay_hint: Option<Duration>,
    ) -> AppResult<bool> {
        self.store.zrem(&self.active_key(), &job.id).await?;
        job.last_error = Some(error.to_string());

        if job.attempt < job.max_attempts {
            let delay = delay_hint.unwrap_or_else(|| self.retry.delay_for_attempt(job.attempt));
            job.ready_at =
                Utc::now().timestamp_millis() + i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            job.state = JobState::Delayed;
            self.save(job).await?;
            #[allow(clippy::cast_precision_loss)]
            self.store
                .zadd(&self.delayed_key(), job.ready_at as f64, &job.id)
                .await?;
            debug!(
                job_id = %job.id,
                attempt = job.attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Job failed, retrying after backoff"
            );
            Ok(true)
        } else {
            self.fail_terminal(job).await?;
            Ok(false)
        }
    }

    /// Fail a job immediately, bypassing remaining retries.
    ///
    /// Used when retrying cannot help, e.g. an effect payload lost to a
    /// process restart.
    pub async fn mark_failed_permanently(&self, job: &mut Job, error: &str) -> AppResult<()> {
        self.store.zrem(&self.active_key(), &job.id).await?;
        job.last_error = Some(error.to_string());
        self.fail_terminal(job).await
    }

    async fn fail_terminal(&self, job: &mut Job) -> AppResult<()> {
        job.state = JobState::Failed;
        self.save_terminal(job).await?;
        self.store.incr(&self.stat_key("failed")).await?;
        warn!(
            job_id = %job.id,
            attempt = job.attempt,
            error = job.last_error.as_deref().unwrap_or(""),
            "Job failed permanently"
        );
        Ok(())
    }

    /// Record a claim-time supersession skip. Counted as a success for
    /// retry purposes; the channel pointer is left untouched.
    pub async fn mark_superseded(&self, job: &mut Job) -> AppResult<()> {
        self.store.zrem(&self.active_key(), &job.id).await?;
        job.state = JobState::Removed;
        self.save_terminal(job).await?;
        debug!(job_id = %job.id, "Job superseded at claim time");
        Ok(())
    }

    /// Remove a job that has not been claimed yet.
    ///
    /// Returns `false` if the job is already active or terminal; the
    /// pending zsets arbitrate the race against a concurrent claim.
    pub async fn remove(&self, job_id: &str) -> AppResult<bool> {
        let mut removed = self.store.zrem(&self.ready_key(), job_id).await?;
        if !removed {
            removed = self.store.zrem(&self.delayed_key(), job_id).await?;
        }
        if !removed {
            return Ok(false);
        }

        if let Some(mut job) = self.load(job_id).await? {
            job.state = JobState::Removed;
            self.save_terminal(&job).await?;
        }
        debug!(job_id = %job_id, "Removed pending job");
        Ok(true)
    }

    /// Queue depth statistics.
    pub async fn counts(&self) -> AppResult<QueueCounts> {
        let waiting = self.store.zcard(&self.ready_key()).await?;
        let delayed = self.store.zcard(&self.delayed_key()).await?;
        let active = self.store.zcard(&self.active_key()).await?;
        let completed = self.read_counter("completed").await?;
        let failed = self.read_counter("failed").await?;

        Ok(QueueCounts {
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }

    async fn read_counter(&self, outcome: &str) -> AppResult<u64> {
        Ok(self
            .store
            .get(&self.stat_key(outcome))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Stop handing out jobs to workers.
    pub async fn pause(&self) -> AppResult<()> {
        self.store.set(&self.paused_key(), "1").await
    }

    /// Resume handing out jobs.
    pub async fn resume(&self) -> AppResult<()> {
        self.store.del(&self.paused_key()).await?;
        Ok(())
    }

    /// Whether claiming is currently paused.
    pub async fn is_paused(&self) -> AppResult<bool> {
        Ok(self.store.get(&self.paused_key()).await?.is_some())
    }

    /// Discard all pending (waiting and delayed) work. Active jobs finish
    /// normally.
    pub async fn clear(&self) -> AppResult<u64> {
        let mut cleared = 0;
        for key in [self.ready_key(), self.delayed_key()] {
            let members = self
                .store
                .zrange_by_score(&key, f64::NEG_INFINITY, f64::INFINITY, None)
                .await?;
            for (id, _) in members {
                self.store.del(&self.job_key(&id)).await?;
                cleared += 1;
            }
            self.store.del(&key).await?;
        }
        Ok(cleared)
    }

    /// Move delayed jobs whose `ready_at` has passed into the ready queue.
    /// Returns the number promoted.
    pub async fn promote_delayed(&self) -> AppResult<u64> {
        let now_ms = Utc::now().timestamp_millis();
        #[allow(clippy::cast_precision_loss)]
        let due = self
            .store
            .zrange_by_score(
                &self.delayed_key(),
                f64::NEG_INFINITY,
                now_ms as f64,
                Some(MAINTENANCE_BATCH),
            )
            .await?;

        let mut promoted = 0;
        for (id, _) in due {
            // Winner of the zrem promotes; losers saw another process do it.
            if !self.store.zrem(&self.delayed_key(), &id).await? {
                continue;
            }
            let Some(mut job) = self.load(&id).await? else {
                continue;
            };
            job.state = JobState::Waiting;
            self.save(&job).await?;
            self.store
                .zadd(
                    &self.ready_key(),
                    Self::ready_score(job.priority, job.seq),
                    &id,
                )
                .await?;
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Return jobs whose lease expired to the ready queue, or fail them if
    /// they already used their last attempt. Returns the number recovered.
    pub async fn recover_stalled(&self) -> AppResult<u64> {
        let now_ms = Utc::now().timestamp_millis();
        #[allow(clippy::cast_precision_loss)]
        let expired = self
            .store
            .zrange_by_score(
                &self.active_key(),
                f64::NEG_INFINITY,
                now_ms as f64,
                Some(MAINTENANCE_BATCH),
            )
            .await?;

        let mut recovered = 0;
        for (id, _) in expired {
            if !self.store.zrem(&self.active_key(), &id).await? {
                continue;
            }
            let Some(mut job) = self.load(&id).await? else {
                continue;
            };

            if job.attempt >= job.max_attempts {
                job.last_error = Some("lease expired on final attempt".to_string());
                self.fail_terminal(&mut job).await?;
            } else {
                warn!(
                    job_id = %id,
                    attempt = job.attempt,
                    "Recovered stalled job"
                );
                job.state = JobState::Waiting;
                self.save(&job).await?;
                self.store
                    .zadd(
                        &self.ready_key(),
                        Self::ready_score(job.priority, job.seq),
                        &id,
                    )
                    .await?;
            }
            recovered += 1;
        }
        Ok(recovered)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobPayload};
    use clickrush_store::MemoryStore;

    fn test_store() -> JobStore {
        JobStore::new(
            Arc::new(MemoryStore::new()),
            "test",
            RetryConfig::default(),
            30,
        )
    }

    fn test_job(id: &str, priority: i32) -> Job {
        Job {
            id: id.to_string(),
            kind: JobKind::SendMessage,
            target: "chat-1".to_string(),
            payload: JobPayload::Message {
                text: "hi".to_string(),
                options: crate::transport::MessageOptions::default(),
            },
            priority,
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
    async fn test_claim_order_priority_then_fifo() {
        let store = test_store();
        store.enqueue(test_job("low", -10)).await.unwrap();
        store.enqueue(test_job("mid-a", 0)).await.unwrap();
        store.enqueue(test_job("high", 10)).await.unwrap();
        store.enqueue(test_job("mid-b", 0)).await.unwrap();

        let order: Vec<String> = [
            store.claim_next().await.unwrap().unwrap().id,
            store.claim_next().await.unwrap().unwrap().id,
            store.claim_next().await.unwrap().unwrap().id,
            store.claim_next().await.unwrap().unwrap().id,
        ]
        .into();
        assert_eq!(order, ["high", "mid-a", "mid-b", "low"]);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_marks_active_and_counts_attempt() {
        let store = test_store();
        store.enqueue(test_job("j", 0)).await.unwrap();

        let job = store.claim_next().await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.attempt, 1);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn test_claim_skips_vanished_record_without_leaking_lease() {
        let store = test_store();
        store.enqueue(test_job("ghost", 0)).await.unwrap();
        store.enqueue(test_job("real", -1)).await.unwrap();
        store.store.del("test:job:ghost").await.unwrap();

        let job = store.claim_next().await.unwrap().unwrap();
        assert_eq!(job.id, "real");

        // The skipped member leaves no stale lease behind.
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn test_delayed_job_needs_promotion() {
        let store = test_store();
        let mut job = test_job("later", 0);
        job.ready_at = Utc::now().timestamp_millis() + 50;
        store.enqueue(job).await.unwrap();

        assert!(store.claim_next().await.unwrap().is_none());
        assert_eq!(store.counts().await.unwrap().delayed, 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.promote_delayed().await.unwrap(), 1);

        let job = store.claim_next().await.unwrap().unwrap();
        assert_eq!(job.id, "later");
    }

    #[tokio::test]
    async fn test_failure_requeues_with_backoff_then_exhausts() {
        let store = test_store();
        store.enqueue(test_job("flaky", 0)).await.unwrap();

        let mut job = store.claim_next().await.unwrap().unwrap();
        let retried = store.mark_failed(&mut job, "boom", None).await.unwrap();
        assert!(retried);
        assert_eq!(job.state, JobState::Delayed);
        assert!(job.ready_at > Utc::now().timestamp_millis());

        // Force it ready and burn the remaining attempts.
        job.state = JobState::Waiting;
        job.ready_at = 0;
        store.save(&job).await.unwrap();
        store
            .store
            .zadd("test:queue:ready", JobStore::ready_score(0, job.seq), "flaky")
            .await
            .unwrap();
        store.store.zrem("test:queue:delayed", "flaky").await.unwrap();

        let mut job = store.claim_next().await.unwrap().unwrap();
        assert_eq!(job.attempt, 2);
        assert!(store.mark_failed(&mut job, "boom", None).await.unwrap());

        job.state = JobState::Waiting;
        job.ready_at = 0;
        store.save(&job).await.unwrap();
        store
            .store
            .zadd("test:queue:ready", JobStore::ready_score(0, job.seq), "flaky")
            .await
            .unwrap();
        store.store.zrem("test:queue:delayed", "flaky").await.unwrap();

        let mut job = store.claim_next().await.unwrap().unwrap();
        assert_eq!(job.attempt, 3);
        let retried = store.mark_failed(&mut job, "boom", None).await.unwrap();
        assert!(!retried);
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(store.counts().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_remove_only_pending() {
        let store = test_store();
        store.enqueue(test_job("a", 0)).await.unwrap();
        store.enqueue(test_job("b", 0)).await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, "a");

        assert!(!store.remove("a").await.unwrap(), "active job not removable");
        assert!(store.remove("b").await.unwrap());
        assert!(!store.remove("b").await.unwrap(), "already removed");

        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pause_blocks_claims() {
        let store = test_store();
        store.enqueue(test_job("j", 0)).await.unwrap();

        store.pause().await.unwrap();
        assert!(store.claim_next().await.unwrap().is_none());

        store.resume().await.unwrap();
        assert!(store.claim_next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stall_recovery_requeues_and_increments() {
        let store = JobStore::new(
            Arc::new(MemoryStore::new()),
            "test",
            RetryConfig::default(),
            0, // lease expires immediately
        );
        store.enqueue(test_job("stuck", 0)).await.unwrap();

        let job = store.claim_next().await.unwrap().unwrap();
        assert_eq!(job.attempt, 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.recover_stalled().await.unwrap(), 1);

        // Re-claim counts a fresh attempt.
        let job = store.claim_next().await.unwrap().unwrap();
        assert_eq!(job.attempt, 2);
    }

    #[tokio::test]
    async fn test_stalled_final_attempt_fails() {
        let store = JobStore::new(
            Arc::new(MemoryStore::new()),
            "test",
            RetryConfig::default(),
            0,
        );
        let mut job = test_job("stuck", 0);
        job.max_attempts = 1;
        store.enqueue(job).await.unwrap();

        store.claim_next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.recover_stalled().await.unwrap(), 1);

        assert!(store.claim_next().await.unwrap().is_none());
        assert_eq!(store.counts().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_clear_discards_pending_only() {
        let store = test_store();
        store.enqueue(test_job("a", 0)).await.unwrap();
        let mut delayed = test_job("b", 0);
        delayed.ready_at = Utc::now().timestamp_millis() + 60_000;
        store.enqueue(delayed).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        let counts = store.counts().await.unwrap();
        assert_eq!(counts.waiting, 0);
        assert_eq!(counts.delayed, 0);
    }

    #[tokio::test]
    async fn test_completed_counter() {
        let store = test_store();
        store.enqueue(test_job("j", 0)).await.unwrap();
        let mut job = store.claim_next().await.unwrap().unwrap();
        store.mark_completed(&mut job).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.active, 0);
    }
}
