//! Worker pool claiming and executing jobs.
//!
//! Each worker loops claim -> supersession check -> governor slot ->
//! execute -> report. A separate maintenance task promotes due delayed
//! jobs and recovers stalled leases. All loops stop on the shared
//! shutdown signal and are awaited by [`DispatcherHandle::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::effects::EffectRegistry;
use crate::governor::DispatchGovernor;
use crate::job::{Job, JobPayload};
use crate::job_store::JobStore;
use crate::supersession::SupersessionTracker;
use crate::transport::{MessagingApi, SendError};

/// Shared state every worker needs.
pub(crate) struct WorkerContext {
    pub(crate) jobs: JobStore,
    pub(crate) tracker: SupersessionTracker,
    pub(crate) effects: Arc<EffectRegistry>,
    pub(crate) api: Arc<dyn MessagingApi>,
    pub(crate) governor: DispatchGovernor,
    pub(crate) poll_interval: Duration,
}

/// Handle over the spawned worker pool.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Signal all workers to stop and wait for them to finish their
    /// current job.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Dispatcher task panicked during shutdown");
            }
        }
        info!("Dispatcher stopped");
    }
}

/// Spawn the worker pool and maintenance loop.
pub(crate) fn spawn(
    ctx: Arc<WorkerContext>,
    workers: usize,
    maintenance_interval: Duration,
) -> DispatcherHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::with_capacity(workers + 1);

    for worker_id in 0..workers {
        let ctx = Arc::clone(&ctx);
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(worker_loop(ctx, rx, worker_id)));
    }

    let jobs = ctx.jobs.clone();
    tasks.push(tokio::spawn(maintenance_loop(
        jobs,
        shutdown_rx,
        maintenance_interval,
    )));

    info!(workers = workers, "Dispatcher started");
    DispatcherHandle {
        shutdown: shutdown_tx,
        tasks,
    }
}

async fn worker_loop(ctx: Arc<WorkerContext>, mut shutdown: watch::Receiver<bool>, worker_id: usize) {
    debug!(worker_id = worker_id, "Worker started");
    while !*shutdown.borrow() {
        match ctx.jobs.claim_next().await {
            // A claimed job always runs to completion; shutdown is only
            // observed between jobs, so nothing is stranded mid-lease.
            Ok(Some(job)) => process_job(&ctx, job).await,
            Ok(None) => idle(&ctx, &mut shutdown).await,
            Err(e) => {
                error!(error = %e, "Failed to claim next job");
                idle(&ctx, &mut shutdown).await;
            }
        }
    }
    debug!(worker_id = worker_id, "Worker stopped");
}

/// Back off while the queue is empty, waking early on shutdown.
async fn idle(ctx: &WorkerContext, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = shutdown.changed() => {}
        () = tokio::time::sleep(ctx.poll_interval) => {}
    }
}

async fn process_job(ctx: &WorkerContext, mut job: Job) {
    // Claim-time supersession check, replaceable channels only:
    // non-replaceable jobs always execute, no matter how the pointer moved.
    if let Some(channel) = job.channel.clone() {
        if channel.replaceable {
            match ctx
                .tracker
                .is_current(&channel.full_name, &job.target, &job.id)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    if let Err(e) = ctx.jobs.mark_superseded(&mut job).await {
                        error!(job_id = %job.id, error = %e, "Failed to record supersession");
                    }
                    discard_effect(ctx, &job);
                    return;
                }
                Err(e) => {
                    // Store trouble: retry later rather than guessing.
                    error!(job_id = %job.id, error = %e, "Supersession check failed");
                    report_failure(ctx, &mut job, &e.to_string(), None).await;
                    return;
                }
            }
        }
    }

    ctx.governor.acquire().await;

    match execute(ctx, &job).await {
        Outcome::Done => {
            if let Err(e) = ctx.jobs.mark_completed(&mut job).await {
                error!(job_id = %job.id, error = %e, "Failed to record completion");
            }
            finalize(ctx, &job).await;
        }
        Outcome::EffectLost => {
            if let Err(e) = ctx
                .jobs
                .mark_failed_permanently(&mut job, "effect payload lost to restart")
                .await
            {
                error!(job_id = %job.id, error = %e, "Failed to record effect loss");
            }
            finalize(ctx, &job).await;
        }
        Outcome::Error(send_err) => {
            let delay_hint = match &send_err {
                SendError::RateLimited {
                    retry_after_secs: Some(secs),
                } => Some(Duration::from_secs(*secs)),
                _ => None,
            };
            report_failure(ctx, &mut job, &send_err.to_string(), delay_hint).await;
        }
    }
}

enum Outcome {
    Done,
    EffectLost,
    Error(SendError),
}

async fn execute(ctx: &WorkerContext, job: &Job) -> Outcome {
    match &job.payload {
        JobPayload::Message { text, options } => {
            match ctx.api.send_message(&job.target, text, options).await {
                Ok(()) => Outcome::Done,
                Err(e) => Outcome::Error(e),
            }
        }
        JobPayload::Effect { token } => match ctx.effects.get(token) {
            Some(effect) => match effect().await {
                Ok(()) => Outcome::Done,
                Err(e) => Outcome::Error(e),
            },
            None => {
                warn!(job_id = %job.id, "Effect token not in registry");
                Outcome::EffectLost
            }
        },
    }
}

async fn report_failure(
    ctx: &WorkerContext,
    job: &mut Job,
    error: &str,
    delay_hint: Option<Duration>,
) {
    match ctx.jobs.mark_failed(job, error, delay_hint).await {
        Ok(true) => {}
        Ok(false) => finalize(ctx, job).await,
        Err(e) => error!(job_id = %job.id, error = %e, "Failed to record failure"),
    }
}

/// Terminal-outcome cleanup: pointer (if still ours) and effect handle.
async fn finalize(ctx: &WorkerContext, job: &Job) {
    if let Some(channel) = &job.channel {
        if let Err(e) = ctx
            .tracker
            .clear_if_current(&channel.full_name, &job.target, &job.id)
            .await
        {
            warn!(job_id = %job.id, error = %e, "Failed to clear channel pointer");
        }
    }
    discard_effect(ctx, job);
}

fn discard_effect(ctx: &WorkerContext, job: &Job) {
    if let JobPayload::Effect { token } = &job.payload {
        ctx.effects.discard(token);
    }
}

async fn maintenance_loop(
    jobs: JobStore,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                match jobs.promote_delayed().await {
                    Ok(promoted) if promoted > 0 => {
                        debug!(count = promoted, "Promoted delayed jobs");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Failed to promote delayed jobs"),
                }
                match jobs.recover_stalled().await {
                    Ok(recovered) if recovered > 0 => {
                        warn!(count = recovered, "Recovered stalled jobs");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Failed to recover stalled jobs"),
                }
            }
        }
    }
}
