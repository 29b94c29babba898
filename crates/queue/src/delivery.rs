//! Delivery queue facade.
//!
//! The single entry point the rest of the application talks to: enqueue
//! messages, actions, edits, and broadcasts; start and stop the worker
//! pool; inspect and administer the queue. All ordering, supersession,
//! retry, and pacing behavior lives in the modules underneath.

use std::sync::Arc;
use std::time::Duration;

use clickrush_common::{AppResult, IdGenerator, QueueConfig};
use clickrush_store::SortedStore;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::dispatcher::{self, DispatcherHandle, WorkerContext};
use crate::effects::EffectRegistry;
use crate::governor::DispatchGovernor;
use crate::job::{ChannelRef, Job, JobKind, JobPayload, JobState};
use crate::job_store::{JobStore, QueueCounts};
use crate::retry::RetryConfig;
use crate::supersession::SupersessionTracker;
use crate::transport::{MessageOptions, MessagingApi, SendError};

/// How often the maintenance task promotes delayed jobs and recovers
/// stalled leases.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Per-enqueue dispatch options.
#[derive(Default, Clone)]
pub struct DispatchOptions {
    /// Channel the job occupies, if any.
    pub channel: Option<Channel>,
    /// Priority tier; higher executes first. Defaults to 0.
    pub priority: i32,
    /// Hold the job invisible for this long before it becomes claimable.
    pub delay: Option<Duration>,
}

impl DispatchOptions {
    /// Options placing the job on `channel`.
    #[must_use]
    pub fn on_channel(channel: Channel) -> Self {
        Self {
            channel: Some(channel),
            ..Self::default()
        }
    }

    /// Options at the given priority tier.
    #[must_use]
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

/// Outbound delivery queue.
pub struct DeliveryQueue {
    jobs: JobStore,
    tracker: SupersessionTracker,
    effects: Arc<EffectRegistry>,
    api: Arc<dyn MessagingApi>,
    ids: IdGenerator,
    config: QueueConfig,
}

impl DeliveryQueue {
    /// Create a delivery queue over the given store and messaging API.
    pub fn new(
        store: Arc<dyn SortedStore>,
        api: Arc<dyn MessagingApi>,
        prefix: &str,
        config: QueueConfig,
    ) -> Self {
        let retry = RetryConfig {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_retry_delay_ms),
            ..RetryConfig::default()
        };
        Self {
            jobs: JobStore::new(store.clone(), prefix, retry, config.lease_secs),
            tracker: SupersessionTracker::new(store, prefix, config.pointer_ttl_secs),
            effects: Arc::new(EffectRegistry::new()),
            api,
            ids: IdGenerator::new(),
            config,
        }
    }

    /// Spawn the worker pool and maintenance task.
    #[must_use]
    pub fn start(&self) -> DispatcherHandle {
        let ctx = Arc::new(WorkerContext {
            jobs: self.jobs.clone(),
            tracker: self.tracker.clone(),
            effects: Arc::clone(&self.effects),
            api: Arc::clone(&self.api),
            governor: DispatchGovernor::new(self.config.dispatch_rate_per_sec),
            poll_interval: Duration::from_millis(self.config.poll_interval_ms),
        });
        dispatcher::spawn(ctx, self.config.workers, MAINTENANCE_INTERVAL)
    }

    /// Enqueue a literal message for delivery. Returns the job id.
    pub async fn queue_message(
        &self,
        target: &str,
        text: &str,
        options: MessageOptions,
        dispatch: DispatchOptions,
    ) -> AppResult<String> {
        let job = self.build_job(
            JobKind::SendMessage,
            target,
            JobPayload::Message {
                text: text.to_string(),
                options,
            },
            &dispatch,
        );
        self.submit(job, dispatch.channel.as_ref()).await
    }

    /// Enqueue a deferred action. The effect runs in-process when the job
    /// is claimed; it does not survive a restart. Returns the job id.
    pub async fn queue_action<F, Fut>(
        &self,
        target: &str,
        effect: F,
        dispatch: DispatchOptions,
    ) -> AppResult<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), SendError>> + Send + 'static,
    {
        self.queue_effect(JobKind::RunAction, target, effect, dispatch)
            .await
    }

    /// Enqueue a deferred message edit. Same effect semantics as
    /// [`queue_action`](Self::queue_action). Returns the job id.
    pub async fn queue_edit<F, Fut>(
        &self,
        target: &str,
        effect: F,
        dispatch: DispatchOptions,
    ) -> AppResult<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), SendError>> + Send + 'static,
    {
        self.queue_effect(JobKind::RunEdit, target, effect, dispatch)
            .await
    }

    async fn queue_effect<F, Fut>(
        &self,
        kind: JobKind,
        target: &str,
        effect: F,
        dispatch: DispatchOptions,
    ) -> AppResult<String>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), SendError>> + Send + 'static,
    {
        let token = self.effects.register(effect);
        let job = self.build_job(
            kind,
            target,
            JobPayload::Effect {
                token: token.clone(),
            },
            &dispatch,
        );

        match self.submit(job, dispatch.channel.as_ref()).await {
            Ok(id) => Ok(id),
            Err(e) => {
                self.effects.discard(&token);
                Err(e)
            }
        }
    }

    /// Fan a message out to many targets in rate-friendly chunks.
    ///
    /// Each chunk after the first is delayed by a fixed step, and all
    /// broadcast jobs run at the lowest priority tier so interactive
    /// traffic is never starved. Returns the enqueued job ids.
    pub async fn broadcast_message(
        &self,
        targets: &[String],
        text: &str,
        options: MessageOptions,
    ) -> AppResult<Vec<String>> {
        let chunk_size = self.config.broadcast_chunk_size.max(1);
        let step = Duration::from_millis(self.config.broadcast_chunk_delay_ms);

        let mut ids = Vec::with_capacity(targets.len());
        for (chunk_index, chunk) in targets.chunks(chunk_size).enumerate() {
            // The first chunk carries no delay at all; it is claimable
            // the moment it lands.
            let dispatch = DispatchOptions {
                channel: None,
                priority: self.config.broadcast_priority,
                delay: (chunk_index > 0).then(|| step * u32::try_from(chunk_index).unwrap_or(u32::MAX)),
            };
            for target in chunk {
                let id = self
                    .queue_message(target, text, options.clone(), dispatch.clone())
                    .await?;
                ids.push(id);
            }
        }

        info!(
            targets = targets.len(),
            chunks = targets.len().div_ceil(chunk_size),
            "Broadcast enqueued"
        );
        Ok(ids)
    }

    /// Queue depth statistics.
    ///
    /// Callers can use `waiting` for load shedding; once it climbs past
    /// roughly 100 the backlog exceeds a few seconds at the default
    /// dispatch rate and non-critical traffic should hold off.
    pub async fn stats(&self) -> AppResult<QueueCounts> {
        self.jobs.counts().await
    }

    /// Stop handing out jobs to workers. Enqueueing continues.
    pub async fn pause(&self) -> AppResult<()> {
        info!("Pausing delivery queue");
        self.jobs.pause().await
    }

    /// Resume handing out jobs.
    pub async fn resume(&self) -> AppResult<()> {
        info!("Resuming delivery queue");
        self.jobs.resume().await
    }

    /// Discard all pending work. Active jobs finish normally. Returns the
    /// number of jobs discarded.
    pub async fn clear(&self) -> AppResult<u64> {
        let cleared = self.jobs.clear().await?;
        info!(cleared = cleared, "Cleared pending jobs");
        Ok(cleared)
    }

    /// Remove a single pending job by id. Returns `false` if it was
    /// already claimed or finished.
    pub async fn remove(&self, job_id: &str) -> AppResult<bool> {
        self.jobs.remove(job_id).await
    }

    /// Look up a job record.
    pub async fn job(&self, job_id: &str) -> AppResult<Option<Job>> {
        self.jobs.load(job_id).await
    }

    fn build_job(
        &self,
        kind: JobKind,
        target: &str,
        payload: JobPayload,
        dispatch: &DispatchOptions,
    ) -> Job {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let ready_at = dispatch.delay.map_or(0, |d| {
            now_ms + i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
        });

        Job {
            id: self.ids.generate(),
            kind,
            target: target.to_string(),
            payload,
            priority: dispatch.priority,
            ready_at,
            attempt: 0,
            max_attempts: self.config.max_attempts,
            channel: dispatch.channel.as_ref().map(ChannelRef::from),
            state: JobState::Waiting,
            seq: 0,
            created_at: chrono::Utc::now(),
            last_error: None,
        }
    }

    /// Supersede the previous occupant, move the pointer, then enqueue.
    ///
    /// The pointer is written before the job record becomes claimable, so
    /// no worker can claim the new job and miss its own pointer.
    async fn submit(&self, job: Job, channel: Option<&Channel>) -> AppResult<String> {
        if let Some(channel) = channel {
            if channel.replaceable() {
                self.tracker
                    .supersede_pending(channel, &job.target, &self.jobs)
                    .await?;
            }
            self.tracker
                .record(&channel.full_name(), &job.target, &job.id)
                .await?;
            debug!(
                channel = %channel,
                target = %job.target,
                job_id = %job.id,
                "Channel pointer moved"
            );
        }
        self.jobs.enqueue(job).await
    }
}
